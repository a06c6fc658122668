//! Static demo board, also used whenever a live source cannot deliver.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use triage_core::classify::FactorEvidence;
use triage_core::{derive_factors, DataSource, FactorTag, PatientDraft, PatientRecord};

struct MockPatient {
    name: &'static str,
    external_id: &'static str,
    born: (i32, u32, u32),
    hemoglobin: f64,
    potassium: f64,
    assigned: &'static [FactorTag],
    /// Condition key and SNOMED CT code.
    diagnoses: &'static [(&'static str, &'static str)],
}

const MOCK_PATIENTS: [MockPatient; 15] = [
    MockPatient {
        name: "Sarah Johnson",
        external_id: "PTN-73621",
        born: (1948, 5, 12),
        hemoglobin: 5.9,
        potassium: 6.2,
        assigned: &[FactorTag::Frailty],
        diagnoses: &[],
    },
    MockPatient {
        name: "Michael Chen",
        external_id: "PTN-48210",
        born: (1962, 11, 3),
        hemoglobin: 7.1,
        potassium: 6.0,
        assigned: &[FactorTag::LearningDisability],
        diagnoses: &[],
    },
    MockPatient {
        name: "Margaret O'Brien",
        external_id: "PTN-19377",
        born: (1941, 2, 27),
        hemoglobin: 6.8,
        potassium: 6.3,
        assigned: &[FactorTag::CareHome, FactorTag::Frailty],
        diagnoses: &[],
    },
    MockPatient {
        name: "David Okafor",
        external_id: "PTN-66054",
        born: (1979, 8, 19),
        hemoglobin: 5.5,
        potassium: 6.1,
        assigned: &[],
        diagnoses: &[("schizophrenia", "58214004")],
    },
    MockPatient {
        name: "Elena Petrova",
        external_id: "PTN-30418",
        born: (1955, 1, 30),
        hemoglobin: 4.9,
        potassium: 6.5,
        assigned: &[],
        diagnoses: &[],
    },
    MockPatient {
        name: "James Whitaker",
        external_id: "PTN-81142",
        born: (1946, 7, 8),
        hemoglobin: 9.5,
        potassium: 5.4,
        assigned: &[FactorTag::CareHome],
        diagnoses: &[],
    },
    MockPatient {
        name: "Priya Raman",
        external_id: "PTN-25793",
        born: (1988, 3, 14),
        hemoglobin: 10.2,
        potassium: 5.1,
        assigned: &[],
        diagnoses: &[("bipolar-disorder", "13746004")],
    },
    MockPatient {
        name: "Thomas Mueller",
        external_id: "PTN-57306",
        born: (1950, 12, 21),
        hemoglobin: 8.9,
        potassium: 5.5,
        assigned: &[FactorTag::Frailty],
        diagnoses: &[],
    },
    MockPatient {
        name: "Grace Adeyemi",
        external_id: "PTN-94420",
        born: (1993, 6, 2),
        hemoglobin: 10.6,
        potassium: 5.3,
        assigned: &[FactorTag::LearningDisability],
        diagnoses: &[],
    },
    MockPatient {
        name: "Robert Fitzgerald",
        external_id: "PTN-12985",
        born: (1944, 10, 11),
        hemoglobin: 9.9,
        potassium: 5.6,
        assigned: &[],
        diagnoses: &[],
    },
    MockPatient {
        name: "Aisha Khan",
        external_id: "PTN-70331",
        born: (1990, 9, 25),
        hemoglobin: 13.5,
        potassium: 4.2,
        assigned: &[],
        diagnoses: &[],
    },
    MockPatient {
        name: "William Hughes",
        external_id: "PTN-36872",
        born: (1949, 4, 17),
        hemoglobin: 14.1,
        potassium: 4.0,
        assigned: &[FactorTag::CareHome],
        diagnoses: &[],
    },
    MockPatient {
        name: "Sofia Alvarez",
        external_id: "PTN-58149",
        born: (1984, 12, 5),
        hemoglobin: 12.6,
        potassium: 3.9,
        assigned: &[],
        diagnoses: &[("schizoaffective-disorder", "68890003")],
    },
    MockPatient {
        name: "George Patterson",
        external_id: "PTN-42617",
        born: (1938, 8, 29),
        hemoglobin: 13.2,
        potassium: 4.4,
        assigned: &[FactorTag::Frailty],
        diagnoses: &[],
    },
    MockPatient {
        name: "Hannah Lewis",
        external_id: "PTN-83590",
        born: (1996, 2, 11),
        hemoglobin: 15.0,
        potassium: 4.1,
        assigned: &[FactorTag::LearningDisability],
        diagnoses: &[],
    },
];

/// Build the demo board. Age factors are derived against `today`.
pub fn mock_patients(today: NaiveDate) -> Vec<PatientRecord> {
    MOCK_PATIENTS
        .iter()
        .enumerate()
        .map(|(index, patient)| {
            let (year, month, day) = patient.born;
            let date_of_birth = NaiveDate::from_ymd_opt(year, month, day);
            let factors = derive_factors(
                &FactorEvidence {
                    date_of_birth,
                    diagnosis_codes: patient.diagnoses.iter().map(|(_, code)| *code).collect(),
                    assigned: patient.assigned.to_vec(),
                    ..FactorEvidence::default()
                },
                today,
            );

            PatientRecord::new(
                PatientDraft {
                    id: format!("mock-{}", index + 1),
                    display_name: patient.name.to_string(),
                    external_patient_id: patient.external_id.to_string(),
                    date_of_birth,
                    hemoglobin: patient.hemoglobin,
                    potassium: patient.potassium,
                    factors,
                    snomed_codes: patient
                        .diagnoses
                        .iter()
                        .map(|(name, code)| (name.to_string(), code.to_string()))
                        .collect::<BTreeMap<_, _>>(),
                    ..PatientDraft::default()
                },
                DataSource::Mock,
            )
        })
        .collect()
}
