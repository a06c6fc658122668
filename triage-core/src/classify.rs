//! Clinical classification rules: triage priority, lab labels and vulnerability factors.
//!
//! Display labels and the priority rule read the same threshold constants, so a
//! value labelled "Very Low" is always an urgent hemoglobin and so on.

use std::collections::BTreeSet;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::{FactorTag, PriorityLevel};

/// Hemoglobin (g/dL) below which a patient is urgent.
pub const HEMOGLOBIN_URGENT_BELOW: f64 = 8.0;
/// Hemoglobin (g/dL) below which a patient is amber.
pub const HEMOGLOBIN_AMBER_BELOW: f64 = 11.0;
/// Potassium (mmol/L) above which a patient is urgent.
pub const POTASSIUM_URGENT_ABOVE: f64 = 6.0;
/// Potassium (mmol/L) above which a patient is amber.
pub const POTASSIUM_AMBER_ABOVE: f64 = 5.0;
/// Potassium (mmol/L) below which a patient is amber.
pub const POTASSIUM_AMBER_BELOW: f64 = 3.5;

/// Age in whole years above which the age factor applies.
pub const AGE_FACTOR_OVER: i32 = 75;

pub const FRAILTY_SYSTOLIC_ABOVE: i32 = 160;
pub const FRAILTY_DIASTOLIC_ABOVE: i32 = 100;

/// SNOMED CT concepts treated as severe mental illness.
pub const SEVERE_MENTAL_ILLNESS_CODES: [&str; 5] = [
    "58214004",  // schizophrenia
    "13746004",  // bipolar disorder
    "68890003",  // schizoaffective disorder
    "69322001",  // psychotic disorder
    "191526005", // schizophrenic disorders
];

/// Map a hemoglobin/potassium pair to a triage bucket.
///
/// A NaN value never reaches `Success`: it is amber unless the other value is urgent.
pub fn classify_priority(hemoglobin: f64, potassium: f64) -> PriorityLevel {
    if hemoglobin < HEMOGLOBIN_URGENT_BELOW || potassium > POTASSIUM_URGENT_ABOVE {
        PriorityLevel::Urgent
    } else if hemoglobin < HEMOGLOBIN_AMBER_BELOW
        || potassium > POTASSIUM_AMBER_ABOVE
        || potassium < POTASSIUM_AMBER_BELOW
        || hemoglobin.is_nan()
        || potassium.is_nan()
    {
        PriorityLevel::Amber
    } else {
        PriorityLevel::Success
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HemoglobinLabel {
    VeryLow,
    Low,
    Normal,
}

impl HemoglobinLabel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::VeryLow => "Very Low",
            Self::Low => "Low",
            Self::Normal => "Normal",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PotassiumLabel {
    High,
    Elevated,
    Normal,
}

impl PotassiumLabel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::High => "High",
            Self::Elevated => "Elevated",
            Self::Normal => "Normal",
        }
    }
}

pub fn label_hemoglobin(value: f64) -> HemoglobinLabel {
    if value < HEMOGLOBIN_URGENT_BELOW {
        HemoglobinLabel::VeryLow
    } else if value < HEMOGLOBIN_AMBER_BELOW {
        HemoglobinLabel::Low
    } else {
        HemoglobinLabel::Normal
    }
}

pub fn label_potassium(value: f64) -> PotassiumLabel {
    if value > POTASSIUM_URGENT_ABOVE {
        PotassiumLabel::High
    } else if value > POTASSIUM_AMBER_ABOVE {
        PotassiumLabel::Elevated
    } else {
        PotassiumLabel::Normal
    }
}

/// Whole years elapsed between `birth_date` and `today`.
///
/// The year difference is reduced by one when the birthday has not come round
/// yet. Returns `None` for a birth date in the future.
pub fn age_in_years(birth_date: NaiveDate, today: NaiveDate) -> Option<i32> {
    let mut age = today.year() - birth_date.year();
    if (today.month(), today.day()) < (birth_date.month(), birth_date.day()) {
        age -= 1;
    }

    if age >= 0 {
        Some(age)
    } else {
        None
    }
}

pub fn age_factor(birth_date: Option<NaiveDate>, today: NaiveDate) -> Option<FactorTag> {
    let age = age_in_years(birth_date?, today)?;
    (age > AGE_FACTOR_OVER).then_some(FactorTag::Age)
}

/// Parse a `systolic/diastolic` reading. Each side is read up to its first
/// non-digit, so spacing around the slash and unit suffixes are tolerated.
pub fn parse_blood_pressure(reading: &str) -> Option<(i32, i32)> {
    let (systolic, diastolic) = reading.split_once('/')?;
    Some((leading_integer(systolic)?, leading_integer(diastolic)?))
}

fn leading_integer(value: &str) -> Option<i32> {
    let value = value.trim();
    let end = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    value[..end].parse().ok()
}

pub fn is_frail_blood_pressure(systolic: i32, diastolic: i32) -> bool {
    systolic > FRAILTY_SYSTOLIC_ABOVE || diastolic > FRAILTY_DIASTOLIC_ABOVE
}

pub fn is_severe_mental_illness_code(code: &str) -> bool {
    SEVERE_MENTAL_ILLNESS_CODES.contains(&code.trim())
}

/// Inputs the adapters can offer for factor derivation.
#[derive(Debug, Clone, Default)]
pub struct FactorEvidence<'a> {
    pub date_of_birth: Option<NaiveDate>,
    /// Latest blood pressure reading, e.g. `"172/95"`.
    pub blood_pressure: Option<&'a str>,
    /// Diagnosis codes (SNOMED CT) recorded against the patient.
    pub diagnosis_codes: Vec<&'a str>,
    /// Tags the source asserts directly.
    pub assigned: Vec<FactorTag>,
}

/// Collect every factor supported by `evidence`. The set makes duplicates impossible.
pub fn derive_factors(evidence: &FactorEvidence<'_>, today: NaiveDate) -> BTreeSet<FactorTag> {
    let mut factors: BTreeSet<FactorTag> = evidence.assigned.iter().copied().collect();

    if let Some(tag) = age_factor(evidence.date_of_birth, today) {
        factors.insert(tag);
    }

    if let Some((systolic, diastolic)) = evidence.blood_pressure.and_then(parse_blood_pressure) {
        if is_frail_blood_pressure(systolic, diastolic) {
            factors.insert(FactorTag::Frailty);
        }
    }

    if evidence
        .diagnosis_codes
        .iter()
        .any(|code| is_severe_mental_illness_code(code))
    {
        factors.insert(FactorTag::SevereMentalIllness);
    }

    factors
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn boundary_pairs() {
        assert_eq!(classify_priority(8.0, 6.0), PriorityLevel::Amber);
        assert_eq!(classify_priority(7.99, 0.0), PriorityLevel::Urgent);
        assert_eq!(classify_priority(20.0, 6.01), PriorityLevel::Urgent);
        assert_eq!(classify_priority(11.0, 5.0), PriorityLevel::Success);
        assert_eq!(classify_priority(11.0, 3.5), PriorityLevel::Success);
        assert_eq!(classify_priority(11.0, 3.49), PriorityLevel::Amber);
        assert_eq!(classify_priority(10.99, 4.0), PriorityLevel::Amber);
        assert_eq!(classify_priority(12.0, 5.01), PriorityLevel::Amber);
    }

    #[test]
    fn urgent_wins_over_amber() {
        assert_eq!(classify_priority(7.0, 3.0), PriorityLevel::Urgent);
        assert_eq!(classify_priority(10.0, 6.5), PriorityLevel::Urgent);
    }

    #[test]
    fn nan_is_never_green() {
        assert_eq!(classify_priority(f64::NAN, 4.0), PriorityLevel::Amber);
        assert_eq!(classify_priority(12.0, f64::NAN), PriorityLevel::Amber);
        assert_eq!(classify_priority(f64::NAN, 6.5), PriorityLevel::Urgent);
    }

    #[test]
    fn classification_is_total_and_deterministic() {
        let mut hb = 0.0;
        while hb <= 20.0 {
            let mut k = 0.0;
            while k <= 8.0 {
                let first = classify_priority(hb, k);
                assert_eq!(first, classify_priority(hb, k));

                let urgent = hb < 8.0 || k > 6.0;
                let amber = !urgent && (hb < 11.0 || k > 5.0 || k < 3.5);
                let expected = if urgent {
                    PriorityLevel::Urgent
                } else if amber {
                    PriorityLevel::Amber
                } else {
                    PriorityLevel::Success
                };
                assert_eq!(first, expected, "hb={hb} k={k}");
                k += 0.05;
            }
            hb += 0.05;
        }
    }

    #[test]
    fn hemoglobin_labels_share_priority_boundaries() {
        for value in [7.99, 8.0, 10.99, 11.0, 15.0] {
            let label = label_hemoglobin(value);
            let priority = classify_priority(value, 4.5);
            let expected = match priority {
                PriorityLevel::Urgent => HemoglobinLabel::VeryLow,
                PriorityLevel::Amber => HemoglobinLabel::Low,
                PriorityLevel::Success => HemoglobinLabel::Normal,
            };
            assert_eq!(label, expected, "hemoglobin {value}");
        }
    }

    #[test]
    fn potassium_labels_share_priority_boundaries() {
        for value in [3.5, 5.0, 5.01, 6.0, 6.01, 7.2] {
            let label = label_potassium(value);
            let priority = classify_priority(13.0, value);
            let expected = match priority {
                PriorityLevel::Urgent => PotassiumLabel::High,
                PriorityLevel::Amber => PotassiumLabel::Elevated,
                PriorityLevel::Success => PotassiumLabel::Normal,
            };
            assert_eq!(label, expected, "potassium {value}");
        }
        // Low potassium is amber but keeps the "Normal" display label.
        assert_eq!(label_potassium(3.2), PotassiumLabel::Normal);
    }

    #[test]
    fn age_counts_whole_years() {
        let today = date(2026, 10, 17);
        assert_eq!(age_in_years(date(1950, 10, 17), today), Some(76));
        assert_eq!(age_in_years(date(1950, 10, 18), today), Some(75));
        assert_eq!(age_in_years(date(2027, 1, 1), today), None);
    }

    #[test]
    fn age_factor_starts_after_seventy_five() {
        let today = date(2026, 10, 17);
        assert_eq!(age_factor(Some(date(1951, 10, 17)), today), None);
        assert_eq!(age_factor(Some(date(1950, 10, 17)), today), Some(FactorTag::Age));
        assert_eq!(age_factor(None, today), None);
    }

    #[test]
    fn blood_pressure_parsing() {
        assert_eq!(parse_blood_pressure("172/95"), Some((172, 95)));
        assert_eq!(parse_blood_pressure("120/80 mmHg"), Some((120, 80)));
        assert_eq!(parse_blood_pressure("120"), None);
        assert_eq!(parse_blood_pressure("high/low"), None);
        assert_eq!(parse_blood_pressure("172 / 95"), Some((172, 95)));
        assert_eq!(parse_blood_pressure("160/101mmHg"), Some((160, 101)));
        assert_eq!(parse_blood_pressure("/90"), None);
    }

    #[test]
    fn loosely_formatted_readings_still_flag_frailty() {
        for reading in ["172 / 95", "160/101mmHg"] {
            let evidence = FactorEvidence {
                blood_pressure: Some(reading),
                ..FactorEvidence::default()
            };
            assert!(
                derive_factors(&evidence, date(2026, 10, 17)).contains(&FactorTag::Frailty),
                "{reading}"
            );
        }
    }

    #[test]
    fn derive_factors_never_duplicates() {
        let evidence = FactorEvidence {
            date_of_birth: Some(date(1930, 1, 1)),
            blood_pressure: Some("150/110"),
            diagnosis_codes: vec!["58214004", "13746004"],
            assigned: vec![FactorTag::Frailty, FactorTag::Age, FactorTag::Frailty],
        };
        let factors = derive_factors(&evidence, date(2026, 10, 17));
        assert_eq!(
            factors.into_iter().collect::<Vec<_>>(),
            vec![
                FactorTag::Age,
                FactorTag::Frailty,
                FactorTag::SevereMentalIllness
            ]
        );
    }

    #[test]
    fn normal_evidence_yields_no_factors() {
        let evidence = FactorEvidence {
            date_of_birth: Some(date(1980, 3, 3)),
            blood_pressure: Some("120/80"),
            ..FactorEvidence::default()
        };
        assert!(derive_factors(&evidence, date(2026, 10, 17)).is_empty());
    }
}
