//! How one fetched FHIR patient becomes a board of `count` records.
//!
//! The sandbox exposes a single test patient, so the board is filled with
//! variants of it. The policy is a pure function of the base patient, the
//! variant index and a seed, which keeps the output reproducible.

use std::collections::BTreeSet;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use triage_core::{FactorTag, LabKind};

use crate::BasePatient;

/// Lab values and directly assigned factors for one variant.
#[derive(Debug, Clone, PartialEq)]
pub struct Variant {
    pub hemoglobin: f64,
    pub potassium: f64,
    /// Labs that were not observed on the base patient.
    pub imputed_labs: BTreeSet<LabKind>,
    pub factors: Vec<FactorTag>,
}

pub trait ExpansionPolicy: Send + Sync {
    fn variant(&self, base: &BasePatient, index: usize) -> Variant;
}

/// Default demo expansion.
///
/// * Base values: the observed lab, otherwise a cycle on `index % 3`
///   (hemoglobin 7.0 / 10.0 / 14.0, potassium 6.3 / 5.3 / 4.2).
/// * Jitter: `spread * u` with `u` drawn from `[-0.5, 0.5)` by a `StdRng`
///   seeded with `seed ^ index`, hemoglobin first; results are rounded to
///   one decimal.
/// * Factors: `index % 4 == 0` frailty, `index % 5 == 1` learning disability,
///   `index % 7 == 2` care home, `index % 8 == 3` severe mental illness.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DemoExpansion {
    pub seed: u64,
    pub hemoglobin_spread: f64,
    pub potassium_spread: f64,
}

const HEMOGLOBIN_CYCLE: [f64; 3] = [7.0, 10.0, 14.0];
const POTASSIUM_CYCLE: [f64; 3] = [6.3, 5.3, 4.2];

const FACTOR_RULES: [(usize, usize, FactorTag); 4] = [
    (4, 0, FactorTag::Frailty),
    (5, 1, FactorTag::LearningDisability),
    (7, 2, FactorTag::CareHome),
    (8, 3, FactorTag::SevereMentalIllness),
];

impl Default for DemoExpansion {
    fn default() -> Self {
        Self {
            seed: 0x5EED,
            hemoglobin_spread: 1.5,
            potassium_spread: 0.5,
        }
    }
}

impl DemoExpansion {
    pub fn with_seed(seed: u64) -> Self {
        Self {
            seed,
            ..Self::default()
        }
    }

    /// Base values only, no perturbation.
    pub fn without_jitter() -> Self {
        Self {
            hemoglobin_spread: 0.0,
            potassium_spread: 0.0,
            ..Self::default()
        }
    }

    /// Hemoglobin and potassium offsets for one variant.
    fn jitter(&self, index: usize) -> (f64, f64) {
        let mut rng = StdRng::seed_from_u64(self.seed ^ index as u64);
        let hemoglobin = rng.gen_range(-0.5..0.5_f64) * self.hemoglobin_spread;
        let potassium = rng.gen_range(-0.5..0.5_f64) * self.potassium_spread;
        (hemoglobin, potassium)
    }
}

impl ExpansionPolicy for DemoExpansion {
    fn variant(&self, base: &BasePatient, index: usize) -> Variant {
        let (hemoglobin_jitter, potassium_jitter) = self.jitter(index);
        let mut imputed_labs = BTreeSet::new();
        let mut value = |lab: LabKind, cycle: &[f64; 3], jitter: f64| {
            let base_value = base.lab(lab).unwrap_or_else(|| {
                imputed_labs.insert(lab);
                cycle[index % 3]
            });
            round_tenth(base_value + jitter)
        };

        let hemoglobin = value(LabKind::Hemoglobin, &HEMOGLOBIN_CYCLE, hemoglobin_jitter);
        let potassium = value(LabKind::Potassium, &POTASSIUM_CYCLE, potassium_jitter);

        let factors = FACTOR_RULES
            .iter()
            .filter(|(modulus, remainder, _)| index % modulus == *remainder)
            .map(|(_, _, tag)| *tag)
            .collect();

        Variant {
            hemoglobin,
            potassium,
            imputed_labs,
            factors,
        }
    }
}

fn round_tenth(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
