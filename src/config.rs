use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::EgaError;

/// Explicit configuration for every component: archive endpoints, graph
/// store endpoints per environment, and the fixed submission identity.
/// Always passed in at construction, never read from ambient state.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EgaConfig {
    pub archive: ArchiveConfig,
    #[serde(default)]
    pub environments: BTreeMap<String, GraphEndpoints>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ArchiveConfig {
    pub submit_url_production: String,
    pub submit_url_test: String,
    /// Root of the session-token API used for login and retrieval.
    pub api_url: String,
    #[serde(default = "default_broker_name")]
    pub broker_name: String,
    pub center_name: String,
    pub lab_name: String,
    #[serde(default)]
    pub account_name: Option<String>,
    #[serde(default)]
    pub contacts: Vec<Contact>,
    pub icgc_policy_accession: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Contact {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GraphEndpoints {
    pub query_url: String,
    pub update_url: String,
}

fn default_broker_name() -> String {
    "EGA".to_string()
}

fn default_timeout_secs() -> u64 {
    120
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<EgaConfig, EgaError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from("egameta.json"),
        };

        if path.is_none() && !config_path.exists() {
            return Err(EgaError::MissingConfig);
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| EgaError::ConfigRead(config_path.display().to_string()))?;
        serde_json::from_str(&content).map_err(|err| EgaError::ConfigParse(err.to_string()))
    }
}

impl EgaConfig {
    /// Graph endpoints for a named environment.
    pub fn environment(&self, name: &str) -> Result<&GraphEndpoints, EgaError> {
        self.environments
            .get(name)
            .ok_or_else(|| EgaError::UnknownEnvironment(name.to_string()))
    }

    /// Environment names for CLI argument validation.
    pub fn environment_names(&self) -> Vec<&str> {
        self.environments.keys().map(|name| name.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    const MINIMAL: &str = r#"{
        "archive": {
            "submit_url_production": "https://www.ebi.ac.uk/ena/submit/drop-box/",
            "submit_url_test": "https://wwwdev.ebi.ac.uk/ena/submit/drop-box/",
            "api_url": "https://ega-archive.org/submission-api/v1/",
            "center_name": "Example Institute",
            "lab_name": "Sequencing Core",
            "icgc_policy_accession": "EGAP00001000001"
        },
        "environments": {
            "dev": {
                "query_url": "http://localhost:3030/grafli/query",
                "update_url": "http://localhost:3030/grafli/update"
            }
        }
    }"#;

    #[test]
    fn parse_minimal_config() {
        let config: EgaConfig = serde_json::from_str(MINIMAL).unwrap();
        assert_eq!(config.archive.broker_name, "EGA");
        assert_eq!(config.archive.timeout_secs, 120);
        assert!(config.archive.contacts.is_empty());
        assert_eq!(config.environment_names(), vec!["dev"]);
    }

    #[test]
    fn unknown_environment_is_an_error() {
        let config: EgaConfig = serde_json::from_str(MINIMAL).unwrap();
        assert!(config.environment("dev").is_ok());
        assert_matches!(
            config.environment("production"),
            Err(EgaError::UnknownEnvironment(_))
        );
    }

    #[test]
    fn unreadable_explicit_config_path() {
        let result = ConfigLoader::resolve(Some("/definitely/not/here/egameta.json"));
        assert_matches!(result, Err(EgaError::ConfigRead(_)));
    }
}
