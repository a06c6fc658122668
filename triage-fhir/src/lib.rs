//! Epic FHIR R4 source: OAuth2 session handling plus mapping of Patient,
//! DiagnosticReport and laboratory Observation resources to `PatientRecord`.

pub mod auth;
pub mod client;
pub mod expansion;

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use triage_core::classify::FactorEvidence;
use triage_core::{derive_factors, DataSource, LabKind, PatientDraft, PatientRecord, SourceError};

pub use auth::{
    AuthState, AuthToken, AuthorizationRedirect, CallbackParams, FileTokenStore,
    MemoryTokenStore, StoreError, TokenStore,
};
pub use client::EpicClient;
pub use expansion::{DemoExpansion, ExpansionPolicy, Variant};

const SNOMED_SYSTEM: &str = "http://snomed.info/sct";

/// The real patient fetched from the FHIR server, before expansion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BasePatient {
    pub id: String,
    pub given_name: String,
    pub family_name: String,
    pub birth_date: Option<NaiveDate>,
    pub hemoglobin: Option<f64>,
    pub potassium: Option<f64>,
    /// Condition name to SNOMED CT code, taken from diagnostic report conclusions.
    pub snomed_codes: BTreeMap<String, String>,
}

impl BasePatient {
    pub fn lab(&self, lab: LabKind) -> Option<f64> {
        match lab {
            LabKind::Hemoglobin => self.hemoglobin,
            LabKind::Potassium => self.potassium,
        }
    }
}

/// Resources of a FHIR search-set bundle.
pub fn bundle_resources(bundle: &Value) -> Vec<Value> {
    bundle
        .get("entry")
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| entry.get("resource").cloned())
                .collect()
        })
        .unwrap_or_default()
}

/// Pull the fields the triage board needs out of the three fetched payloads.
pub fn extract_base_patient(
    patient: &Value,
    reports: &[Value],
    observations: &[Value],
) -> Result<BasePatient, SourceError> {
    let resource_type = patient
        .get("resourceType")
        .and_then(Value::as_str)
        .ok_or_else(|| SourceError::Parse("Patient payload has no resourceType".to_string()))?;

    if resource_type != "Patient" {
        return Err(SourceError::Parse(format!(
            "Expected resourceType Patient, received {resource_type}"
        )));
    }

    let id = patient
        .get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| SourceError::Parse("Patient resource has no id".to_string()))?
        .to_string();

    let (given_name, family_name) = extract_patient_name(patient);

    Ok(BasePatient {
        id,
        given_name,
        family_name,
        birth_date: patient
            .get("birthDate")
            .and_then(Value::as_str)
            .and_then(parse_date),
        hemoglobin: find_lab_value(observations, LabKind::Hemoglobin),
        potassium: find_lab_value(observations, LabKind::Potassium),
        snomed_codes: extract_conclusion_codes(reports),
    })
}

/// Turn the base patient into `count` records using `policy`.
pub fn expand_records(
    base: &BasePatient,
    count: usize,
    policy: &dyn ExpansionPolicy,
    today: NaiveDate,
) -> Vec<PatientRecord> {
    let short_id: String = base.id.chars().take(5).collect();
    let diagnosis_codes: Vec<&str> = base.snomed_codes.values().map(String::as_str).collect();

    (0..count)
        .map(|index| {
            let variant = policy.variant(base, index);
            let factors = derive_factors(
                &FactorEvidence {
                    date_of_birth: base.birth_date,
                    diagnosis_codes: diagnosis_codes.clone(),
                    assigned: variant.factors,
                    ..FactorEvidence::default()
                },
                today,
            );

            let family = if index == 0 {
                base.family_name.clone()
            } else {
                format!("{}-{index}", base.family_name)
            };

            PatientRecord::new(
                PatientDraft {
                    id: format!("fhir-{}-{index}", base.id),
                    display_name: format!("{} {family}", base.given_name),
                    external_patient_id: format!("EPIC-{short_id}-{index}"),
                    date_of_birth: base.birth_date,
                    hemoglobin: variant.hemoglobin,
                    potassium: variant.potassium,
                    factors,
                    snomed_codes: base.snomed_codes.clone(),
                    imputed_labs: variant.imputed_labs,
                },
                DataSource::Fhir,
            )
        })
        .collect()
}

fn extract_patient_name(resource: &Value) -> (String, String) {
    let name = resource
        .get("name")
        .and_then(Value::as_array)
        .and_then(|names| names.first());

    let given = name
        .and_then(|name| name.get("given"))
        .and_then(Value::as_array)
        .and_then(|arr| arr.first())
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or("Unknown");

    let family = name
        .and_then(|name| name.get("family"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or("Patient");

    (given.to_string(), family.to_string())
}

fn parse_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").ok()
}

fn extract_codeable_text(value: &Value) -> Option<String> {
    if let Some(text) = value.get("text").and_then(Value::as_str) {
        if !text.trim().is_empty() {
            return Some(text.trim().to_string());
        }
    }

    if let Some(codings) = value.get("coding").and_then(Value::as_array) {
        for coding in codings {
            if let Some(display) = coding.get("display").and_then(Value::as_str) {
                if !display.trim().is_empty() {
                    return Some(display.trim().to_string());
                }
            }
        }
    }

    None
}

fn codeable_mentions(value: &Value, needle: &str) -> bool {
    if let Some(text) = value.get("text").and_then(Value::as_str) {
        if text.to_lowercase().contains(needle) {
            return true;
        }
    }

    value
        .get("coding")
        .and_then(Value::as_array)
        .map(|codings| {
            codings.iter().any(|coding| {
                coding
                    .get("display")
                    .and_then(Value::as_str)
                    .is_some_and(|display| display.to_lowercase().contains(needle))
            })
        })
        .unwrap_or(false)
}

fn find_lab_value(observations: &[Value], lab: LabKind) -> Option<f64> {
    let needle = lab.search_term();
    observations
        .iter()
        .filter(|obs| {
            obs.get("code")
                .is_some_and(|code| codeable_mentions(code, needle))
        })
        .find_map(|obs| {
            obs.get("valueQuantity")
                .and_then(|quantity| quantity.get("value"))
                .and_then(Value::as_f64)
        })
}

fn extract_conclusion_codes(reports: &[Value]) -> BTreeMap<String, String> {
    let mut codes = BTreeMap::new();

    for report in reports {
        let Some(conclusions) = report.get("conclusionCode").and_then(Value::as_array) else {
            continue;
        };

        for concept in conclusions {
            let label = extract_codeable_text(concept);
            let Some(codings) = concept.get("coding").and_then(Value::as_array) else {
                continue;
            };

            for coding in codings {
                if coding.get("system").and_then(Value::as_str) != Some(SNOMED_SYSTEM) {
                    continue;
                }
                let Some(code) = coding.get("code").and_then(Value::as_str) else {
                    continue;
                };
                let name = coding
                    .get("display")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .or_else(|| label.clone())
                    .unwrap_or_else(|| code.to_string());
                codes.insert(condition_key(&name), code.to_string());
            }
        }
    }

    codes
}

fn condition_key(name: &str) -> String {
    name.to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
}
