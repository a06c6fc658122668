//! Source selection and fallback: whichever source is asked for, the caller
//! always gets a board back, except while FHIR authorization is pending.

pub mod board;
pub mod mock;

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};
use triage_core::{
    Clock, ConfigError, DataSource, HttpTransport, PatientRecord, SourceError, SystemClock,
    TriageConfig,
};
use triage_fhir::{AuthToken, AuthorizationRedirect, CallbackParams, EpicClient, TokenStore};
use triage_vitals::VitalsClient;

pub use board::TriageBoard;
pub use mock::mock_patients;
pub use triage_core::{classify_priority, FactorTag, PriorityLevel};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Info,
    Warning,
    Error,
}

/// Message for the user about how a fetch was resolved.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Notification {
    pub level: NotificationLevel,
    pub message: String,
}

impl Notification {
    fn warning(message: String) -> Self {
        Self {
            level: NotificationLevel::Warning,
            message,
        }
    }

    fn error(message: String) -> Self {
        Self {
            level: NotificationLevel::Error,
            message,
        }
    }
}

/// Result of one fetch request.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FetchOutcome {
    pub records: Vec<PatientRecord>,
    /// Where the records actually came from after any fallback.
    pub actual_source: DataSource,
    /// Set when the user must authorize before FHIR data can be fetched.
    pub redirect: Option<AuthorizationRedirect>,
    pub notifications: Vec<Notification>,
}

impl FetchOutcome {
    fn from_source(records: Vec<PatientRecord>, source: DataSource) -> Self {
        Self {
            records: records
                .into_iter()
                .map(|record| record.with_source(source))
                .collect(),
            actual_source: source,
            redirect: None,
            notifications: Vec::new(),
        }
    }

    pub fn awaiting_authorization(&self) -> bool {
        self.redirect.is_some()
    }
}

pub struct PatientDataService<T> {
    vitals: VitalsClient<T>,
    epic: EpicClient<T>,
    clock: Arc<dyn Clock>,
    mock_delay: Duration,
}

impl<T: HttpTransport> PatientDataService<T> {
    pub fn new(
        config: &TriageConfig,
        transport: Arc<T>,
        store: Arc<dyn TokenStore>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            vitals: VitalsClient::new(config.vitals.clone(), transport.clone())?,
            epic: EpicClient::new(config.epic.clone(), transport, store)?,
            clock: Arc::new(SystemClock),
            mock_delay: Duration::from_millis(config.mock_delay_ms),
        })
    }

    /// Use `clock` for token expiry, ages and the mock board.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.vitals = self.vitals.with_clock(clock.clone());
        self.epic = self.epic.with_clock(clock.clone());
        self.clock = clock;
        self
    }

    pub fn with_vitals(mut self, vitals: VitalsClient<T>) -> Self {
        self.vitals = vitals;
        self
    }

    pub fn with_epic(mut self, epic: EpicClient<T>) -> Self {
        self.epic = epic;
        self
    }

    pub fn epic(&self) -> &EpicClient<T> {
        &self.epic
    }

    /// Fetch up to `count` records from `source`, falling back to the mock
    /// board when the source fails or returns nothing.
    pub async fn fetch_patient_data(&self, source: DataSource, count: usize) -> FetchOutcome {
        info!(%source, count, "fetching patient data");

        let result = match source {
            DataSource::LegacyVitals => self.vitals.fetch_all(count).await,
            DataSource::Fhir => {
                if !self.epic.is_authenticated() {
                    return self.request_authorization();
                }
                self.epic.fetch_patients(count).await
            }
            DataSource::Mock => {
                if !self.mock_delay.is_zero() {
                    tokio::time::sleep(self.mock_delay).await;
                }
                return FetchOutcome::from_source(self.mock_records(), DataSource::Mock);
            }
        };

        match result {
            Ok(records) if !records.is_empty() => {
                info!(%source, fetched = records.len(), "patient data loaded");
                FetchOutcome::from_source(records, source)
            }
            Ok(_) => {
                warn!(%source, "source returned no patients, using mock data");
                self.fall_back(Notification::warning(format!(
                    "No patients returned by {}, using mock data",
                    source.display_name()
                )))
            }
            Err(err) if err.is_auth() => {
                warn!(%source, error = %err, "authentication failed, using mock data");
                self.fall_back(Notification::error(format!(
                    "Authentication with {} failed, using mock data",
                    source.display_name()
                )))
            }
            Err(err) => {
                warn!(%source, error = %err, "source unavailable, using mock data");
                self.fall_back(Notification::warning(format!(
                    "Could not load data from {}, using mock data",
                    source.display_name()
                )))
            }
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.epic.is_authenticated()
    }

    pub fn initiate_authorization(&self) -> Result<AuthorizationRedirect, SourceError> {
        self.epic.initiate_authorization()
    }

    pub async fn handle_callback(&self, params: &CallbackParams) -> Result<AuthToken, SourceError> {
        self.epic.handle_callback(params).await
    }

    pub fn logout(&self) {
        self.epic.logout();
    }

    fn request_authorization(&self) -> FetchOutcome {
        match self.epic.initiate_authorization() {
            Ok(redirect) => {
                info!("not authenticated with Epic, authorization required");
                FetchOutcome {
                    records: Vec::new(),
                    actual_source: DataSource::Fhir,
                    redirect: Some(redirect),
                    notifications: Vec::new(),
                }
            }
            Err(err) => {
                warn!(error = %err, "could not start authorization, using mock data");
                self.fall_back(Notification::error(format!(
                    "Could not start {} authorization, using mock data",
                    DataSource::Fhir.display_name()
                )))
            }
        }
    }

    fn fall_back(&self, notification: Notification) -> FetchOutcome {
        let mut outcome = FetchOutcome::from_source(self.mock_records(), DataSource::Mock);
        outcome.notifications.push(notification);
        outcome
    }

    fn mock_records(&self) -> Vec<PatientRecord> {
        mock_patients(self.clock.today())
    }
}
