use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};
use std::process::Command;

use super::init::require_revision;
use super::{PluginError, PluginParams};
use crate::stage::staged_workspace_dir;

/// Render the application with `jsonnet`, writing the manifest to stdout.
pub fn run_generate(
    params: &PluginParams,
    revision: Option<&str>,
    jsonnet: &Path,
) -> Result<(), PluginError> {
    let staged = if params.has_git_repos() {
        Some(staged_workspace_dir(require_revision(revision)?)?)
    } else {
        None
    };

    let args = jsonnet_args(params, staged.as_deref(), |name| std::env::var(name).ok());
    log::debug!("Running {} {:?}", jsonnet.display(), args);

    let status = Command::new(jsonnet)
        .args(&args)
        .status()
        .map_err(|source| PluginError::Spawn {
            program: jsonnet.to_path_buf(),
            source,
        })?;

    if !status.success() {
        return Err(PluginError::Render {
            program: jsonnet.to_path_buf(),
            status,
        });
    }
    Ok(())
}

/// Command line for jsonnet. `env` resolves variables referenced from
/// ext-vars and top-level arguments.
pub fn jsonnet_args<F>(params: &PluginParams, staged: Option<&Path>, env: F) -> Vec<OsString>
where
    F: Fn(&str) -> Option<String>,
{
    let mut args: Vec<OsString> = vec!["-y".into(), "--jpath".into(), (&params.path).into()];

    for lib in params.local_libs() {
        args.push("--jpath".into());
        args.push(lib.into());
    }

    if let Some(staged) = staged {
        args.push("--jpath".into());
        args.push(staged.into());
    }

    for ext_var in &params.ext_vars {
        args.push("--ext-str".into());
        args.push(expand_with(ext_var, &env).into());
    }

    for tla in &params.tlas {
        args.push("--tla-str".into());
        args.push(expand_with(tla, &env).into());
    }

    args.push(entry_file(&params.path, &params.entrypoint).into());
    args
}

/// `<path>/<entrypoint>` without `.` components, rooted at `./` when relative.
fn entry_file(path: &str, entrypoint: &str) -> PathBuf {
    let joined = Path::new(path).join(entrypoint);
    let cleaned: PathBuf = joined
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect();

    if cleaned.is_absolute() {
        cleaned
    } else {
        Path::new(".").join(cleaned)
    }
}

/// Replace `$NAME` and `${NAME}` with values from `lookup`. Unknown
/// variables expand to nothing; a `$` not followed by a name is kept.
///
/// Values written for Go's `os.ExpandEnv` mostly expand the same way, except:
/// - `$-x` stays `$-x` (Go gives `x`)
/// - an unterminated `${NAME` is kept as is (Go drops it)
/// - `$50` looks up `50` (Go looks up `5` and keeps the `0`)
pub fn expand_with<F>(value: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let mut expanded = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(pos) = rest.find('$') {
        expanded.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        if let Some(braced) = after.strip_prefix('{') {
            match braced.find('}') {
                Some(end) => {
                    expanded.push_str(&lookup(&braced[..end]).unwrap_or_default());
                    rest = &braced[end + 1..];
                }
                None => {
                    // Unterminated
                    expanded.push('$');
                    rest = after;
                }
            }
            continue;
        }

        let len = after
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(after.len());
        if len == 0 {
            expanded.push('$');
        } else {
            expanded.push_str(&lookup(&after[..len]).unwrap_or_default());
        }
        rest = &after[len..];
    }

    expanded.push_str(rest);
    expanded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::params::parse_parameters;

    fn env(name: &str) -> Option<String> {
        match name {
            "REGION" => Some("eu-west-1".to_string()),
            "ENV" => Some("prod".to_string()),
            _ => None,
        }
    }

    fn strings(args: Vec<OsString>) -> Vec<String> {
        args.into_iter()
            .map(|a| a.into_string().unwrap())
            .collect()
    }

    #[test]
    fn default_args() {
        let args = strings(jsonnet_args(&PluginParams::default(), None, env));
        assert_eq!(
            args,
            vec!["-y", "--jpath", "./", "./application.jsonnet"]
        );
    }

    #[test]
    fn full_args_in_order() {
        let parameters = parse_parameters(
            r#"[
                {"name": "path", "string": "apps/web"},
                {"name": "entrypoint", "string": "main.jsonnet"},
                {"name": "libs", "array": ["vendor", "https://github.com/a/lib.git", "lib"]},
                {"name": "extVars", "array": ["region=$REGION", "env=${ENV}"]},
                {"name": "tlas", "array": ["missing=$NOPE"]}
            ]"#,
        )
        .unwrap();
        let params = PluginParams::from_parameters(&parameters);

        let args = strings(jsonnet_args(
            &params,
            Some(Path::new("/tmp/konn-abc123")),
            env,
        ));
        assert_eq!(
            args,
            vec![
                "-y",
                "--jpath",
                "apps/web",
                "--jpath",
                "vendor",
                "--jpath",
                "lib",
                "--jpath",
                "/tmp/konn-abc123",
                "--ext-str",
                "region=eu-west-1",
                "--ext-str",
                "env=prod",
                "--tla-str",
                "missing=",
                "./apps/web/main.jsonnet",
            ]
        );
    }

    #[test]
    fn entry_file_is_cleaned() {
        assert_eq!(
            entry_file("./", "./application.jsonnet"),
            PathBuf::from("./application.jsonnet")
        );
        assert_eq!(
            entry_file("apps/./web/", "main.jsonnet"),
            PathBuf::from("./apps/web/main.jsonnet")
        );
        assert_eq!(
            entry_file("/srv/app", "main.jsonnet"),
            PathBuf::from("/srv/app/main.jsonnet")
        );
    }

    #[test]
    fn expansion_rules() {
        assert_eq!(expand_with("plain", env), "plain");
        assert_eq!(expand_with("$REGION", env), "eu-west-1");
        assert_eq!(expand_with("${REGION}-a", env), "eu-west-1-a");
        assert_eq!(expand_with("$REGION.zone", env), "eu-west-1.zone");
        assert_eq!(expand_with("a=$UNSET;b", env), "a=;b");
        assert_eq!(expand_with("cost=$5", env), "cost=");
        assert_eq!(expand_with("cost=$50", env), "cost=");
        assert_eq!(expand_with("100$", env), "100$");
        assert_eq!(expand_with("$-x", env), "$-x");
        assert_eq!(expand_with("${REGION", env), "${REGION");
    }

    #[test]
    fn revision_required_only_with_git_libs() {
        let parameters = parse_parameters(
            r#"[{"name": "libs", "array": ["git@github.com:a/lib.git"]}]"#,
        )
        .unwrap();
        let params = PluginParams::from_parameters(&parameters);
        let err = run_generate(&params, None, Path::new("true")).unwrap_err();
        assert!(matches!(err, PluginError::MissingRevision));

        run_generate(&PluginParams::default(), None, Path::new("true")).unwrap();
    }

    #[test]
    fn renderer_failures() {
        let params = PluginParams::default();
        let err = run_generate(&params, None, Path::new("false")).unwrap_err();
        assert!(matches!(err, PluginError::Render { .. }));

        let err = run_generate(&params, None, Path::new("/nonexistent/jsonnet")).unwrap_err();
        assert!(matches!(err, PluginError::Spawn { .. }));
    }
}
