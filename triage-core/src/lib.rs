//! Canonical patient model shared by every lab-result source.

pub mod classify;
pub mod config;
pub mod http;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize, Serializer};

pub use classify::{
    age_factor, age_in_years, classify_priority, derive_factors, label_hemoglobin,
    label_potassium, FactorEvidence, HemoglobinLabel, PotassiumLabel,
};
pub use config::{ConfigError, EpicConfig, TriageConfig, VitalsConfig};
pub use http::{HttpTransport, ReqwestTransport};

/// Triage bucket derived from the two lab values.
///
/// Ordered most urgent first so boards can sort by it directly.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum PriorityLevel {
    Urgent,
    Amber,
    Success,
}

impl PriorityLevel {
    pub const ALL: [PriorityLevel; 3] = [Self::Urgent, Self::Amber, Self::Success];

    /// Column heading shown to clinicians.
    pub fn label(self) -> &'static str {
        match self {
            Self::Urgent => "Urgent",
            Self::Amber => "Amber",
            Self::Success => "Green",
        }
    }
}

/// Vulnerability marker attached to a patient.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum FactorTag {
    Age,
    LearningDisability,
    CareHome,
    Frailty,
    SevereMentalIllness,
}

impl FactorTag {
    pub const ALL: [FactorTag; 5] = [
        Self::Age,
        Self::LearningDisability,
        Self::CareHome,
        Self::Frailty,
        Self::SevereMentalIllness,
    ];

    /// Human readable label for a factor tag.
    pub fn label(self) -> &'static str {
        match self {
            Self::Age => "Age over 75",
            Self::LearningDisability => "Learning disability",
            Self::CareHome => "Care home resident",
            Self::Frailty => "Frailty",
            Self::SevereMentalIllness => "Severe mental illness",
        }
    }
}

/// Where a record's values came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum DataSource {
    LegacyVitals,
    Fhir,
    Mock,
}

impl DataSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LegacyVitals => "legacy-vitals",
            Self::Fhir => "fhir",
            Self::Mock => "mock",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Self::LegacyVitals => "Legacy Vitals",
            Self::Fhir => "Epic FHIR",
            Self::Mock => "Mock Data",
        }
    }
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataSource {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "legacy-vitals" | "vitals" | "vista" => Ok(Self::LegacyVitals),
            "fhir" | "epic" => Ok(Self::Fhir),
            "mock" => Ok(Self::Mock),
            other => Err(format!("unknown data source `{other}`")),
        }
    }
}

/// Lab analytes that drive triage.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LabKind {
    Hemoglobin,
    Potassium,
}

impl LabKind {
    /// Name used when matching observation or vital names.
    pub fn search_term(self) -> &'static str {
        match self {
            Self::Hemoglobin => "hemoglobin",
            Self::Potassium => "potassium",
        }
    }
}

/// Everything an adapter knows about a patient before classification.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PatientDraft {
    pub id: String,
    pub display_name: String,
    pub external_patient_id: String,
    pub date_of_birth: Option<NaiveDate>,
    pub hemoglobin: f64,
    pub potassium: f64,
    pub factors: BTreeSet<FactorTag>,
    pub snomed_codes: BTreeMap<String, String>,
    pub imputed_labs: BTreeSet<LabKind>,
}

/// Canonical patient record produced by every source.
///
/// Priority is computed from the lab values on construction and cannot be
/// supplied by a source.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PatientRecord {
    id: String,
    display_name: String,
    external_patient_id: String,
    #[serde(serialize_with = "serialize_dmy")]
    date_of_birth: Option<NaiveDate>,
    hemoglobin: f64,
    potassium: f64,
    priority: PriorityLevel,
    factors: BTreeSet<FactorTag>,
    snomed_codes: BTreeMap<String, String>,
    imputed_labs: BTreeSet<LabKind>,
    source: DataSource,
}

impl PatientRecord {
    pub fn new(draft: PatientDraft, source: DataSource) -> Self {
        Self {
            priority: classify_priority(draft.hemoglobin, draft.potassium),
            id: draft.id,
            display_name: draft.display_name,
            external_patient_id: draft.external_patient_id,
            date_of_birth: draft.date_of_birth,
            hemoglobin: draft.hemoglobin,
            potassium: draft.potassium,
            factors: draft.factors,
            snomed_codes: draft.snomed_codes,
            imputed_labs: draft.imputed_labs,
            source,
        }
    }

    /// Re-stamp provenance after the aggregator has settled on a source.
    pub fn with_source(mut self, source: DataSource) -> Self {
        self.source = source;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn external_patient_id(&self) -> &str {
        &self.external_patient_id
    }

    pub fn date_of_birth(&self) -> Option<NaiveDate> {
        self.date_of_birth
    }

    /// Date of birth as `DD/MM/YYYY`, if known.
    pub fn date_of_birth_display(&self) -> Option<String> {
        self.date_of_birth.map(format_dmy)
    }

    pub fn hemoglobin(&self) -> f64 {
        self.hemoglobin
    }

    pub fn potassium(&self) -> f64 {
        self.potassium
    }

    pub fn priority(&self) -> PriorityLevel {
        self.priority
    }

    pub fn factors(&self) -> &BTreeSet<FactorTag> {
        &self.factors
    }

    pub fn has_factor(&self, tag: FactorTag) -> bool {
        self.factors.contains(&tag)
    }

    pub fn snomed_codes(&self) -> &BTreeMap<String, String> {
        &self.snomed_codes
    }

    /// Labs whose value was substituted because the source had no reading.
    pub fn imputed_labs(&self) -> &BTreeSet<LabKind> {
        &self.imputed_labs
    }

    pub fn source(&self) -> DataSource {
        self.source
    }
}

/// Format a date the way the triage board displays it.
pub fn format_dmy(date: NaiveDate) -> String {
    date.format("%d/%m/%Y").to_string()
}

fn serialize_dmy<S>(value: &Option<NaiveDate>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match value {
        Some(date) => serializer.serialize_str(&format_dmy(*date)),
        None => serializer.serialize_none(),
    }
}

/// Source of the current time, injected so expiry and age checks are testable.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }

    fn now_millis(&self) -> i64 {
        self.now().timestamp_millis()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock pinned to one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Failure talking to a remote endpoint.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("{url} answered with HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("request to {url} timed out")]
    Timeout { url: String },
    #[error("request to {url} failed: {message}")]
    Network { url: String, message: String },
    #[error("could not build HTTP client: {0}")]
    Client(String),
}

/// Errors surfaced by a source adapter.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),
    #[error("malformed response: {0}")]
    Parse(String),
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("not authenticated with the FHIR server")]
    NotAuthenticated,
}

impl SourceError {
    /// Whether the failure means the user has to go through authorization again.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth(_) | Self::NotAuthenticated)
    }
}
