//! Runtime configuration, resolved once at startup and passed into the sources.

use std::time::Duration;

use reqwest::Url;
use serde::{Deserialize, Serialize};

/// Top-level configuration for every source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TriageConfig {
    pub vitals: VitalsConfig,
    pub epic: EpicConfig,
    /// Upper bound for every outgoing HTTP request.
    pub request_timeout_secs: u64,
    /// Number of patients requested when the caller does not say.
    pub default_count: usize,
    /// Artificial delay before serving the mock dataset.
    pub mock_delay_ms: u64,
}

impl Default for TriageConfig {
    fn default() -> Self {
        Self {
            vitals: VitalsConfig::default(),
            epic: EpicConfig::default(),
            request_timeout_secs: 10,
            default_count: 15,
            mock_delay_ms: 0,
        }
    }
}

/// Legacy vitals endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VitalsConfig {
    pub base_url: String,
    pub list_path: String,
    pub vitals_path: String,
}

impl Default for VitalsConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8001".to_string(),
            list_path: "LIST".to_string(),
            vitals_path: "VITALS".to_string(),
        }
    }
}

/// Epic OAuth2 + FHIR R4 endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EpicConfig {
    pub authorize_url: String,
    pub token_url: String,
    pub fhir_base_url: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    /// Patient whose record seeds the FHIR dataset.
    pub patient_id: String,
}

impl Default for EpicConfig {
    fn default() -> Self {
        Self {
            authorize_url: "https://oauth.epic.com/authorize".to_string(),
            token_url: "https://oauth.epic.com/token".to_string(),
            fhir_base_url: "https://fhir.epic.com/interconnect-fhir-oauth/api/FHIR/R4".to_string(),
            client_id: "triage-client".to_string(),
            redirect_uri: "http://localhost:8080/epic-callback".to_string(),
            scopes: ["openid", "fhirUser", "offline_access", "launch/patient"]
                .into_iter()
                .map(str::to_string)
                .collect(),
            patient_id: "erXuFYUfucBZaryVksYEcMg3".to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("could not read configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

impl TriageConfig {
    /// Parse a JSON document; missing fields keep their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Override endpoints from `TRIAGE_*` variables provided by `lookup`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("TRIAGE_VITALS_BASE_URL") {
            self.vitals.base_url = value;
        }
        if let Some(value) = lookup("TRIAGE_FHIR_BASE_URL") {
            self.epic.fhir_base_url = value;
        }
        if let Some(value) = lookup("TRIAGE_EPIC_CLIENT_ID") {
            self.epic.client_id = value;
        }
        if let Some(value) = lookup("TRIAGE_EPIC_REDIRECT_URI") {
            self.epic.redirect_uri = value;
        }
        if let Some(value) = lookup("TRIAGE_EPIC_PATIENT_ID") {
            self.epic.patient_id = value;
        }
        if let Some(secs) = lookup("TRIAGE_REQUEST_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            self.request_timeout_secs = secs;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "request_timeout_secs must be positive".to_string(),
            ));
        }
        self.vitals.validate()?;
        self.epic.validate()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl VitalsConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_url("vitals.base_url", &self.base_url)?;
        require_non_empty("vitals.list_path", &self.list_path)?;
        require_non_empty("vitals.vitals_path", &self.vitals_path)
    }

    /// Full URL of an endpoint below the base URL.
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

impl EpicConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_url("epic.authorize_url", &self.authorize_url)?;
        require_url("epic.token_url", &self.token_url)?;
        require_url("epic.fhir_base_url", &self.fhir_base_url)?;
        require_url("epic.redirect_uri", &self.redirect_uri)?;
        require_non_empty("epic.client_id", &self.client_id)?;
        require_non_empty("epic.patient_id", &self.patient_id)
    }

    /// FHIR resource URL, e.g. `Patient/123`.
    pub fn resource_url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.fhir_base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

fn require_non_empty(field: &str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::Invalid(format!("{field} cannot be empty")));
    }
    Ok(())
}

fn require_url(field: &str, value: &str) -> Result<(), ConfigError> {
    require_non_empty(field, value)?;
    let url = Url::parse(value)
        .map_err(|err| ConfigError::Invalid(format!("{field} is not a valid URL: {err}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::Invalid(format!(
            "{field} must use http or https, got {}",
            url.scheme()
        )));
    }
    Ok(())
}
