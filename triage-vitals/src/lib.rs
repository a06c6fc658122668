//! Legacy vitals interface: a `;`-separated patient list plus one
//! `^`/`|`-delimited vitals record per patient, mapped to `PatientRecord`.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use futures_util::future::try_join_all;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use triage_core::classify::FactorEvidence;
use triage_core::{
    derive_factors, Clock, ConfigError, DataSource, HttpTransport, LabKind, PatientDraft,
    PatientRecord, SourceError, SystemClock, VitalsConfig,
};

/// One `code|name|value|date|location` tuple.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Vital {
    pub snomed_code: String,
    pub name: String,
    pub value: String,
    pub date: String,
    pub location: String,
}

/// A patient as the legacy interface describes it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VitalsPatient {
    pub icn: String,
    pub vitals: Vec<Vital>,
}

/// Values used when a patient has no usable hemoglobin or potassium reading.
///
/// Substituted labs are listed in `PatientRecord::imputed_labs`. The default
/// substitutes NaN, which the classifier never files as green.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct MissingLabPolicy {
    pub hemoglobin: f64,
    pub potassium: f64,
}

impl Default for MissingLabPolicy {
    fn default() -> Self {
        Self {
            hemoglobin: f64::NAN,
            potassium: f64::NAN,
        }
    }
}

impl MissingLabPolicy {
    fn value_for(&self, lab: LabKind) -> f64 {
        match lab {
            LabKind::Hemoglobin => self.hemoglobin,
            LabKind::Potassium => self.potassium,
        }
    }
}

/// Parse the patient-list response. Empty segments are skipped.
pub fn parse_patient_list(text: &str) -> Vec<String> {
    text.trim()
        .split(';')
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse a vitals record. Tuples with fewer than five fields are dropped.
pub fn parse_vitals_record(requested_icn: &str, text: &str) -> VitalsPatient {
    let mut parts = text.trim().split('^');
    let icn = parts
        .next()
        .map(str::trim)
        .filter(|icn| !icn.is_empty())
        .unwrap_or(requested_icn)
        .to_string();

    let mut vitals = Vec::new();
    for raw in parts {
        let fields: Vec<&str> = raw.split('|').collect();
        if fields.len() < 5 {
            debug!(icn = %icn, tuple = raw, "dropping incomplete vitals tuple");
            continue;
        }
        vitals.push(Vital {
            snomed_code: fields[0].trim().to_string(),
            name: fields[1].trim().to_string(),
            value: fields[2].trim().to_string(),
            date: fields[3].trim().to_string(),
            location: fields[4].trim().to_string(),
        });
    }

    VitalsPatient { icn, vitals }
}

/// Latest reading per vital name, in first-seen order.
pub fn latest_vitals(vitals: &[Vital]) -> Vec<&Vital> {
    let mut order: Vec<&Vital> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();

    for vital in vitals {
        match index.get(vital.name.as_str()) {
            Some(&slot) => {
                if is_more_recent(&vital.date, &order[slot].date) {
                    order[slot] = vital;
                }
            }
            None => {
                index.insert(vital.name.as_str(), order.len());
                order.push(vital);
            }
        }
    }

    order
}

fn is_more_recent(candidate: &str, current: &str) -> bool {
    match (parse_vital_date(candidate), parse_vital_date(current)) {
        (Some(a), Some(b)) => a > b,
        (Some(_), None) => true,
        _ => false,
    }
}

fn parse_vital_date(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.naive_utc());
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y%m%d.%H%M%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, format) {
            return Some(dt);
        }
    }
    for format in ["%Y-%m-%d", "%Y%m%d", "%m/%d/%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(value, format) {
            return date.and_hms_opt(0, 0, 0);
        }
    }
    None
}

/// Leading decimal number of a reading such as `"7.2 g/dL"`.
fn leading_number(value: &str) -> Option<f64> {
    let trimmed = value.trim();
    let end = trimmed
        .char_indices()
        .find(|(i, c)| !(c.is_ascii_digit() || *c == '.' || (*i == 0 && (*c == '-' || *c == '+'))))
        .map(|(i, _)| i)
        .unwrap_or(trimmed.len());
    trimmed[..end].parse::<f64>().ok().filter(|v| v.is_finite())
}

fn find_lab(latest: &[&Vital], lab: LabKind) -> Option<f64> {
    let needle = lab.search_term();
    latest
        .iter()
        .find(|vital| vital.name.to_lowercase().contains(needle))
        .and_then(|vital| leading_number(&vital.value))
}

/// `"Blood Pressure"` becomes `"blood-pressure"`.
pub fn snomed_key(name: &str) -> String {
    name.to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
}

/// Build the canonical record for one legacy patient.
pub fn map_to_record(
    icn: &str,
    patient: &VitalsPatient,
    missing: &MissingLabPolicy,
    today: NaiveDate,
) -> PatientRecord {
    let latest = latest_vitals(&patient.vitals);

    let mut imputed_labs = BTreeSet::new();
    let mut lab_value = |lab: LabKind| {
        find_lab(&latest, lab).unwrap_or_else(|| {
            imputed_labs.insert(lab);
            missing.value_for(lab)
        })
    };
    let hemoglobin = lab_value(LabKind::Hemoglobin);
    let potassium = lab_value(LabKind::Potassium);

    let blood_pressure = latest
        .iter()
        .find(|vital| vital.name.trim().eq_ignore_ascii_case("blood pressure"))
        .map(|vital| vital.value.as_str());

    // The legacy interface carries no demographics, so there is no age evidence.
    let factors = derive_factors(
        &FactorEvidence {
            blood_pressure,
            ..FactorEvidence::default()
        },
        today,
    );

    let snomed_codes: BTreeMap<String, String> = patient
        .vitals
        .iter()
        .map(|vital| (snomed_key(&vital.name), vital.snomed_code.clone()))
        .collect();

    if !imputed_labs.is_empty() {
        warn!(icn, ?imputed_labs, "legacy vitals missing lab readings, substituted defaults");
    }

    PatientRecord::new(
        PatientDraft {
            id: format!("vitals-{icn}"),
            display_name: format!("Patient {}", icn.chars().take(8).collect::<String>()),
            external_patient_id: icn.to_string(),
            date_of_birth: None,
            hemoglobin,
            potassium,
            factors,
            snomed_codes,
            imputed_labs,
        },
        DataSource::LegacyVitals,
    )
}

/// Client for the legacy vitals HTTP interface.
pub struct VitalsClient<T> {
    transport: Arc<T>,
    config: VitalsConfig,
    missing_labs: MissingLabPolicy,
    clock: Arc<dyn Clock>,
}

impl<T: HttpTransport> VitalsClient<T> {
    pub fn new(config: VitalsConfig, transport: Arc<T>) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            transport,
            config,
            missing_labs: MissingLabPolicy::default(),
            clock: Arc::new(SystemClock),
        })
    }

    pub fn with_missing_lab_policy(mut self, policy: MissingLabPolicy) -> Self {
        self.missing_labs = policy;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn endpoint(&self, path: &str, params: &[(&str, &str)]) -> Result<Url, SourceError> {
        let base = self.config.endpoint(path);
        Url::parse_with_params(&base, params)
            .map_err(|err| SourceError::Parse(format!("invalid vitals URL {base}: {err}")))
    }

    /// Identifiers of up to `count` patients.
    pub async fn fetch_patient_ids(&self, count: usize) -> Result<Vec<String>, SourceError> {
        let count = count.to_string();
        let url = self.endpoint(&self.config.list_path, &[("CNT", count.as_str())])?;
        let body = self.transport.get_text(url.as_str(), None).await?;
        Ok(parse_patient_list(&body))
    }

    pub async fn fetch_patient(&self, icn: &str) -> Result<VitalsPatient, SourceError> {
        let url = self.endpoint(&self.config.vitals_path, &[("ICN", icn)])?;
        let body = self.transport.get_text(url.as_str(), None).await?;
        Ok(parse_vitals_record(icn, &body))
    }

    /// List, then fetch every patient concurrently. One failed fetch fails the batch.
    pub async fn fetch_all(&self, count: usize) -> Result<Vec<PatientRecord>, SourceError> {
        info!(count, base_url = %self.config.base_url, "fetching legacy vitals patients");
        let icns = self.fetch_patient_ids(count).await?;
        let today = self.clock.today();

        let records = try_join_all(icns.iter().map(|icn| async move {
            let patient = self.fetch_patient(icn).await?;
            Ok::<_, SourceError>(map_to_record(icn, &patient, &self.missing_labs, today))
        }))
        .await?;

        info!(fetched = records.len(), "legacy vitals batch complete");
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use triage_core::{FactorTag, PriorityLevel};

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 17).unwrap()
    }

    #[test]
    fn parses_single_vital() {
        let patient = parse_vitals_record("ICN1", "ICN1^58214004|Hemoglobin|7.2|2024-01-01|ClinicA");
        assert_eq!(patient.icn, "ICN1");
        assert_eq!(
            patient.vitals,
            vec![Vital {
                snomed_code: "58214004".to_string(),
                name: "Hemoglobin".to_string(),
                value: "7.2".to_string(),
                date: "2024-01-01".to_string(),
                location: "ClinicA".to_string(),
            }]
        );
    }

    #[test]
    fn drops_incomplete_tuples() {
        let patient = parse_vitals_record(
            "ICN1",
            "ICN1^1|Pulse|80^2|Potassium|5.4|2024-01-01|Ward 3",
        );
        assert_eq!(patient.vitals.len(), 1);
        assert_eq!(patient.vitals[0].name, "Potassium");
    }

    #[test]
    fn falls_back_to_requested_icn() {
        let patient = parse_vitals_record("REQ", "^1|Pulse|80|2024-01-01|Ward");
        assert_eq!(patient.icn, "REQ");
        assert_eq!(parse_vitals_record("REQ", "").vitals, Vec::new());
    }

    #[test]
    fn patient_list_skips_empty_segments() {
        assert_eq!(
            parse_patient_list(" A1;;B2; ;C3;\n"),
            vec!["A1".to_string(), "B2".to_string(), "C3".to_string()]
        );
        assert!(parse_patient_list("").is_empty());
        assert!(parse_patient_list(";;;").is_empty());
    }

    #[test]
    fn latest_reading_wins() {
        let patient = parse_vitals_record(
            "ICN",
            "ICN^1|Potassium|4.0|2024-01-01|A^1|Potassium|6.4|2024-03-01|A^1|Potassium|5.0|2024-02-01|A",
        );
        let latest = latest_vitals(&patient.vitals);
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].value, "6.4");
    }

    #[test]
    fn leading_number_parses_units() {
        assert_eq!(leading_number("7.2 g/dL"), Some(7.2));
        assert_eq!(leading_number("-1.5"), Some(-1.5));
        assert_eq!(leading_number("n/a"), None);
    }

    #[test]
    fn maps_labs_frailty_and_snomed_codes() {
        let patient = parse_vitals_record(
            "1012345678V",
            "1012345678V^271026005|Hemoglobin A|10.1 g/dL|2024-01-01|Clinic\
             ^59573005|Serum potassium|6.2|2024-01-01|Clinic\
             ^75367002|Blood Pressure|172/95|2024-01-01|Clinic",
        );
        let record = map_to_record("1012345678V", &patient, &MissingLabPolicy::default(), today());

        assert_eq!(record.id(), "vitals-1012345678V");
        assert_eq!(record.display_name(), "Patient 10123456");
        assert_eq!(record.hemoglobin(), 10.1);
        assert_eq!(record.potassium(), 6.2);
        assert_eq!(record.priority(), PriorityLevel::Urgent);
        assert!(record.has_factor(FactorTag::Frailty));
        assert!(record.imputed_labs().is_empty());
        assert_eq!(record.date_of_birth(), None);
        assert_eq!(
            record.snomed_codes().get("blood-pressure").map(String::as_str),
            Some("75367002")
        );
        assert_eq!(
            record.snomed_codes().get("serum-potassium").map(String::as_str),
            Some("59573005")
        );
    }

    #[test]
    fn missing_labs_use_policy_and_are_flagged() {
        let patient = parse_vitals_record("ICN2", "ICN2^1|Pulse|80|2024-01-01|Ward");
        let policy = MissingLabPolicy {
            hemoglobin: 9.0,
            potassium: 4.0,
        };
        let record = map_to_record("ICN2", &patient, &policy, today());
        assert_eq!(record.hemoglobin(), 9.0);
        assert_eq!(record.potassium(), 4.0);
        assert_eq!(record.priority(), PriorityLevel::Amber);
        assert_eq!(
            record.imputed_labs().iter().copied().collect::<Vec<_>>(),
            vec![LabKind::Hemoglobin, LabKind::Potassium]
        );
    }

    #[test]
    fn patient_without_labs_is_never_green_by_default() {
        let patient = parse_vitals_record("ICN9", "ICN9^1|Pulse|80|2024-01-01|Ward");
        let record = map_to_record("ICN9", &patient, &MissingLabPolicy::default(), today());
        assert_eq!(record.priority(), PriorityLevel::Amber);
        assert!(record.hemoglobin().is_nan());
        assert_eq!(record.imputed_labs().len(), 2);

        let patient = parse_vitals_record("ICN8", "ICN8^1|Hemoglobin|12.5|2024-01-01|Ward");
        let record = map_to_record("ICN8", &patient, &MissingLabPolicy::default(), today());
        assert_ne!(record.priority(), PriorityLevel::Success);
        assert_eq!(
            record.imputed_labs().iter().copied().collect::<Vec<_>>(),
            vec![LabKind::Potassium]
        );
    }

    #[test]
    fn normal_blood_pressure_is_not_frailty() {
        let patient = parse_vitals_record("ICN3", "ICN3^1|Blood pressure|150/100|2024-01-01|A");
        let record = map_to_record("ICN3", &patient, &MissingLabPolicy::default(), today());
        assert!(record.factors().is_empty());
    }
}
