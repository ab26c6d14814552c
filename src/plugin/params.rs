use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{PARAMETERS_ENV, PluginError};

pub const DEFAULT_ENTRYPOINT: &str = "./application.jsonnet";
pub const DEFAULT_PATH: &str = "./";

/// One entry of the plugin parameter list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Parameter {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub string: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub array: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub map: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection_type: Option<String>,
}

pub fn parse_parameters(json: &str) -> Result<Vec<Parameter>, PluginError> {
    Ok(serde_json::from_str(json)?)
}

/// Read the parameter list from `ARGOCD_APP_PARAMETERS`.
pub fn app_parameters() -> Result<Vec<Parameter>, PluginError> {
    parameters_from(std::env::var(PARAMETERS_ENV).ok())
}

fn parameters_from(value: Option<String>) -> Result<Vec<Parameter>, PluginError> {
    match value {
        Some(json) if !json.trim().is_empty() => parse_parameters(&json),
        _ => Err(PluginError::MissingEnv(PARAMETERS_ENV)),
    }
}

/// Plugin settings resolved from the parameter list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginParams {
    pub entrypoint: String,
    pub path: String,
    pub ext_vars: Vec<String>,
    pub tlas: Vec<String>,
    pub libs: Vec<String>,
}

impl Default for PluginParams {
    fn default() -> Self {
        Self {
            entrypoint: DEFAULT_ENTRYPOINT.to_string(),
            path: DEFAULT_PATH.to_string(),
            ext_vars: Vec::new(),
            tlas: Vec::new(),
            libs: Vec::new(),
        }
    }
}

impl PluginParams {
    pub fn from_parameters(parameters: &[Parameter]) -> Self {
        let mut params = Self::default();

        for parameter in parameters {
            match parameter.name.as_str() {
                "entrypoint" => {
                    if let Some(entrypoint) = non_empty(&parameter.string) {
                        params.entrypoint = entrypoint;
                    }
                }
                "path" => {
                    if let Some(path) = non_empty(&parameter.string) {
                        params.path = path;
                    }
                }
                "extVars" => params.ext_vars = parameter.array.clone().unwrap_or_default(),
                "tlas" => params.tlas = parameter.array.clone().unwrap_or_default(),
                "libs" => params.libs = parameter.array.clone().unwrap_or_default(),
                other => log::debug!("Ignoring unknown parameter {:?}", other),
            }
        }

        params
    }

    /// Libraries that are git repositories, in order.
    pub fn git_repos(&self) -> Vec<&str> {
        self.libs
            .iter()
            .map(String::as_str)
            .filter(|lib| is_git_repository(lib))
            .collect()
    }

    /// Libraries that are local search paths, in order.
    pub fn local_libs(&self) -> Vec<&str> {
        self.libs
            .iter()
            .map(String::as_str)
            .filter(|lib| !is_git_repository(lib))
            .collect()
    }

    pub fn has_git_repos(&self) -> bool {
        self.libs.iter().any(|lib| is_git_repository(lib))
    }
}

pub fn is_git_repository(lib: &str) -> bool {
    lib.starts_with("https://") || lib.starts_with("git@")
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_ref().filter(|v| !v.is_empty()).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PARAMETERS: &str = r#"[
        {"name": "entrypoint", "string": "main.jsonnet"},
        {"name": "path", "string": "apps/web"},
        {"name": "extVars", "array": ["env=prod", "region=$REGION"]},
        {"name": "tlas", "array": ["replicas=3"]},
        {"name": "libs", "array": [
            "vendor",
            "https://github.com/acme/k8s-libsonnet.git",
            "lib",
            "git@github.com:acme/konn.git"
        ]},
        {"name": "labels", "map": {"team": "web"}, "collectionType": "map"}
    ]"#;

    #[test]
    fn parse_full_parameter_list() {
        let parameters = parse_parameters(PARAMETERS).unwrap();
        assert_eq!(parameters.len(), 6);
        assert_eq!(parameters[0].string.as_deref(), Some("main.jsonnet"));
        assert_eq!(parameters[5].collection_type.as_deref(), Some("map"));
        assert_eq!(
            parameters[5].map.as_ref().unwrap().get("team").map(String::as_str),
            Some("web")
        );

        let params = PluginParams::from_parameters(&parameters);
        assert_eq!(params.entrypoint, "main.jsonnet");
        assert_eq!(params.path, "apps/web");
        assert_eq!(params.ext_vars, vec!["env=prod", "region=$REGION"]);
        assert_eq!(params.tlas, vec!["replicas=3"]);
        assert_eq!(params.libs.len(), 4);
    }

    #[test]
    fn defaults_when_not_given() {
        let params = PluginParams::from_parameters(&parse_parameters("[]").unwrap());
        assert_eq!(params, PluginParams::default());
        assert_eq!(params.entrypoint, "./application.jsonnet");
        assert_eq!(params.path, "./");
    }

    #[test]
    fn empty_string_keeps_default() {
        let parameters = parse_parameters(r#"[{"name": "entrypoint", "string": ""}]"#).unwrap();
        let params = PluginParams::from_parameters(&parameters);
        assert_eq!(params.entrypoint, DEFAULT_ENTRYPOINT);
    }

    #[test]
    fn libs_split_by_kind_in_order() {
        let params = PluginParams::from_parameters(&parse_parameters(PARAMETERS).unwrap());
        assert_eq!(
            params.git_repos(),
            vec![
                "https://github.com/acme/k8s-libsonnet.git",
                "git@github.com:acme/konn.git"
            ]
        );
        assert_eq!(params.local_libs(), vec!["vendor", "lib"]);
        assert!(params.has_git_repos());
    }

    #[test]
    fn git_repository_detection() {
        assert!(is_git_repository("https://github.com/a/b.git"));
        assert!(is_git_repository("git@github.com:a/b.git"));
        assert!(!is_git_repository("http://github.com/a/b.git"));
        assert!(!is_git_repository("./vendor"));
        assert!(!is_git_repository("git"));
        assert!(!is_git_repository(""));
    }

    #[test]
    fn missing_or_empty_env_value() {
        assert!(matches!(
            parameters_from(None),
            Err(PluginError::MissingEnv(PARAMETERS_ENV))
        ));
        assert!(matches!(
            parameters_from(Some("  ".to_string())),
            Err(PluginError::MissingEnv(_))
        ));
        assert_eq!(parameters_from(Some("[]".to_string())).unwrap(), vec![]);
    }

    #[test]
    fn malformed_json_is_rejected() {
        assert!(matches!(
            parse_parameters("{not json"),
            Err(PluginError::InvalidParameters(_))
        ));
    }
}
