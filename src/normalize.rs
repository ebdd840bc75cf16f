//! Biomarker normalization and clinical classification.
//!
//! Everything here is pure and synchronous. The [`MappingTable`] is built
//! once at startup and shared behind an `Arc`; the engine never reaches for
//! global state, so tests can hand it any table they like.

use crate::error::IngestError;
use crate::model::{BiomarkerCandidate, BiomarkerResult, BiomarkerStatus};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Category assigned to names missing from the table.
pub const DEFAULT_CATEGORY: &str = "other";

/// Values above `reference_max * CRITICAL_FACTOR` are `critical`, not `high`.
pub const CRITICAL_FACTOR: f64 = 1.5;

/// Canonical identity of one biomarker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BiomarkerMapping {
    #[serde(alias = "normalized")]
    pub canonical_name: String,
    #[serde(alias = "loinc", default)]
    pub coding_id: Option<String>,
    pub category: String,
}

/// Read-only lookup from case-folded raw name to [`BiomarkerMapping`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MappingTable {
    entries: HashMap<String, BiomarkerMapping>,
}

/// Fold a raw biomarker name into a table key.
pub fn normalize_key(raw: &str) -> String {
    raw.trim().to_lowercase()
}

impl MappingTable {
    /// Build a table from `(raw name, mapping)` pairs; keys are folded.
    pub fn from_entries<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, BiomarkerMapping)>,
        K: AsRef<str>,
    {
        Self {
            entries: entries
                .into_iter()
                .map(|(k, v)| (normalize_key(k.as_ref()), v))
                .collect(),
        }
    }

    /// The French laboratory vocabulary shipped with the crate.
    pub fn builtin() -> Self {
        Self::from_entries(BUILTIN_MAPPINGS.iter().map(|(raw, canonical, loinc, category)| {
            (
                *raw,
                BiomarkerMapping {
                    canonical_name: (*canonical).to_string(),
                    coding_id: Some((*loinc).to_string()),
                    category: (*category).to_string(),
                },
            )
        }))
    }

    /// Parse a JSON object `{ "raw name": { "normalized", "loinc", "category" } }`.
    pub fn from_json(json: &str) -> Result<Self, IngestError> {
        let raw: HashMap<String, BiomarkerMapping> = serde_json::from_str(json)
            .map_err(|e| IngestError::InvalidConfig(format!("mapping table: {e}")))?;
        Ok(Self::from_entries(raw))
    }

    /// Load a JSON mapping table from disk.
    pub fn from_json_file(path: &Path) -> Result<Self, IngestError> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            IngestError::InvalidConfig(format!("mapping table '{}': {e}", path.display()))
        })?;
        Self::from_json(&json)
    }

    pub fn lookup(&self, raw_name: &str) -> Option<&BiomarkerMapping> {
        self.entries.get(&normalize_key(raw_name))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Classify a value against its reference bounds.
///
/// An absent bound is simply not evaluated. `low` wins over `high` because
/// it is checked first.
pub fn classify(value: f64, reference_min: Option<f64>, reference_max: Option<f64>) -> BiomarkerStatus {
    if let Some(min) = reference_min {
        if value < min {
            return BiomarkerStatus::Low;
        }
    }
    if let Some(max) = reference_max {
        if value > max {
            return if value > max * CRITICAL_FACTOR {
                BiomarkerStatus::Critical
            } else {
                BiomarkerStatus::High
            };
        }
    }
    BiomarkerStatus::Normal
}

/// Normalize and classify one candidate into a persistable result.
///
/// `fallback_date` is used when the candidate carries no test date of its
/// own (the caller passes the report date, or today).
pub fn normalize_candidate(
    table: &MappingTable,
    candidate: &BiomarkerCandidate,
    report_id: &str,
    owner_id: &str,
    fallback_date: NaiveDate,
) -> BiomarkerResult {
    let mapping = table.lookup(&candidate.name);

    BiomarkerResult {
        report_id: report_id.to_string(),
        owner_id: owner_id.to_string(),
        name: candidate.name.clone(),
        normalized_name: mapping
            .map(|m| m.canonical_name.clone())
            .unwrap_or_else(|| candidate.name.clone()),
        coding_id: mapping.and_then(|m| m.coding_id.clone()),
        category: mapping
            .map(|m| m.category.clone())
            .unwrap_or_else(|| DEFAULT_CATEGORY.to_string()),
        value: candidate.value,
        unit: candidate.unit.clone(),
        reference_min: candidate.reference_min,
        reference_max: candidate.reference_max,
        reference_range_text: candidate.reference_range_text.clone(),
        status: classify(candidate.value, candidate.reference_min, candidate.reference_max),
        test_date: candidate.test_date.unwrap_or(fallback_date),
    }
}

// (raw name, canonical name, LOINC, category)
const BUILTIN_MAPPINGS: &[(&str, &str, &str, &str)] = &[
    // Lipids
    ("cholesterol total", "Cholestérol total", "2093-3", "lipid"),
    ("cholestérol total", "Cholestérol total", "2093-3", "lipid"),
    ("hdl", "HDL-Cholestérol", "2085-9", "lipid"),
    ("ldl", "LDL-Cholestérol", "13457-7", "lipid"),
    ("triglycérides", "Triglycérides", "2571-8", "lipid"),
    // Metabolic
    ("glucose", "Glycémie", "2345-7", "metabolic"),
    ("glycémie", "Glycémie", "2345-7", "metabolic"),
    ("hba1c", "Hémoglobine glyquée (HbA1c)", "4548-4", "metabolic"),
    ("hémoglobine glyquée", "Hémoglobine glyquée (HbA1c)", "4548-4", "metabolic"),
    // Hematology
    ("hémoglobine", "Hémoglobine", "718-7", "hematology"),
    ("hemoglobine", "Hémoglobine", "718-7", "hematology"),
    ("hématocrite", "Hématocrite", "4544-3", "hematology"),
    ("hematocrite", "Hématocrite", "4544-3", "hematology"),
    ("globules rouges", "Globules rouges", "789-8", "hematology"),
    ("hématies", "Globules rouges", "789-8", "hematology"),
    ("hematies", "Globules rouges", "789-8", "hematology"),
    ("globules blancs", "Globules blancs", "6690-2", "hematology"),
    ("leucocytes", "Globules blancs", "6690-2", "hematology"),
    ("plaquettes", "Plaquettes", "777-3", "hematology"),
    ("thrombocytes", "Plaquettes", "777-3", "hematology"),
    ("hémoglobine a1", "Hémoglobine A1", "4551-8", "hematology"),
    ("hemoglobine a1", "Hémoglobine A1", "4551-8", "hematology"),
    ("hémoglobine a2", "Hémoglobine A2", "4552-6", "hematology"),
    ("hemoglobine a2", "Hémoglobine A2", "4552-6", "hematology"),
    ("hémoglobine f", "Hémoglobine F", "4576-5", "hematology"),
    ("hemoglobine f", "Hémoglobine F", "4576-5", "hematology"),
    ("hémoglobine s", "Hémoglobine S", "4625-0", "hematology"),
    ("hemoglobine s", "Hémoglobine S", "4625-0", "hematology"),
    ("hémoglobine c", "Hémoglobine C", "4563-3", "hematology"),
    ("hemoglobine c", "Hémoglobine C", "4563-3", "hematology"),
    ("hémoglobine e", "Hémoglobine E", "4573-2", "hematology"),
    ("hemoglobine e", "Hémoglobine E", "4573-2", "hematology"),
    ("vgm", "VGM", "787-2", "hematology"),
    ("v.g.m", "VGM", "787-2", "hematology"),
    ("v.g.m.", "VGM", "787-2", "hematology"),
    ("tcmh", "TCMH", "785-6", "hematology"),
    ("t.c.m.h", "TCMH", "785-6", "hematology"),
    ("t.c.m.h.", "TCMH", "785-6", "hematology"),
    ("ccmh", "CCMH", "786-4", "hematology"),
    ("c.c.m.h", "CCMH", "786-4", "hematology"),
    ("c.c.m.h.", "CCMH", "786-4", "hematology"),
    ("idr", "IDR", "788-0", "hematology"),
    ("i.d.r", "IDR", "788-0", "hematology"),
    ("i.d.r.", "IDR", "788-0", "hematology"),
    ("réticulocytes", "Réticulocytes", "17849-1", "hematology"),
    ("polynucléaires neutrophiles", "Neutrophiles", "751-8", "hematology"),
    ("polynucleaires neutrophiles", "Neutrophiles", "751-8", "hematology"),
    ("neutrophiles", "Neutrophiles", "751-8", "hematology"),
    ("polynucléaires éosinophiles", "Éosinophiles", "711-2", "hematology"),
    ("polynucleaires eosinophiles", "Éosinophiles", "711-2", "hematology"),
    ("éosinophiles", "Éosinophiles", "711-2", "hematology"),
    ("eosinophiles", "Éosinophiles", "711-2", "hematology"),
    ("polynucléaires basophiles", "Basophiles", "704-7", "hematology"),
    ("polynucleaires basophiles", "Basophiles", "704-7", "hematology"),
    ("basophiles", "Basophiles", "704-7", "hematology"),
    ("lymphocytes", "Lymphocytes", "731-0", "hematology"),
    ("monocytes", "Monocytes", "742-7", "hematology"),
    // Liver
    ("asat", "ASAT (TGO)", "1920-8", "liver"),
    ("tgo", "ASAT (TGO)", "1920-8", "liver"),
    ("alat", "ALAT (TGP)", "1742-6", "liver"),
    ("tgp", "ALAT (TGP)", "1742-6", "liver"),
    ("gamma gt", "Gamma-GT", "2324-2", "liver"),
    ("ggt", "Gamma-GT", "2324-2", "liver"),
    ("phosphatases alcalines", "Phosphatases alcalines", "6768-6", "liver"),
    ("bilirubine", "Bilirubine totale", "1975-2", "liver"),
    // Kidney
    ("créatinine", "Créatinine", "2160-0", "kidney"),
    ("creatinine", "Créatinine", "2160-0", "kidney"),
    ("urée", "Urée", "3094-0", "kidney"),
    ("acide urique", "Acide urique", "3084-1", "kidney"),
    ("dfg", "DFG (Clairance)", "33914-3", "kidney"),
    // Thyroid
    ("tsh", "TSH", "3016-3", "thyroid"),
    ("t3 libre", "T3 libre", "3053-6", "thyroid"),
    ("t4 libre", "T4 libre", "3026-2", "thyroid"),
    // Inflammatory
    ("crp", "CRP", "1988-5", "inflammatory"),
    ("vs", "Vitesse de sédimentation", "4537-7", "inflammatory"),
    // Electrolytes
    ("sodium", "Sodium", "2951-2", "electrolyte"),
    ("sodium plasmatique", "Sodium", "2951-2", "electrolyte"),
    ("natrémie", "Sodium", "2951-2", "electrolyte"),
    ("potassium", "Potassium", "2823-3", "electrolyte"),
    ("potassium plasmatique", "Potassium", "2823-3", "electrolyte"),
    ("kaliémie", "Potassium", "2823-3", "electrolyte"),
    ("chlore", "Chlore", "2075-0", "electrolyte"),
    ("bicarbonates", "Bicarbonates", "1963-8", "electrolyte"),
    ("calcium", "Calcium", "17861-6", "electrolyte"),
    ("magnésium", "Magnésium", "19123-9", "electrolyte"),
    ("phosphore", "Phosphore", "2777-1", "electrolyte"),
    // Vitamins
    ("vitamine d", "Vitamine D", "1989-3", "vitamin"),
    ("vitamine b12", "Vitamine B12", "2132-9", "vitamin"),
    ("folates", "Folates (B9)", "2284-8", "vitamin"),
    // Minerals
    ("fer sérique", "Fer sérique", "2498-4", "mineral"),
    ("fer", "Fer sérique", "2498-4", "mineral"),
    ("ferritine", "Ferritine", "2276-4", "mineral"),
    ("transferrine", "Transferrine", "3034-6", "mineral"),
    // Coagulation
    ("tp", "TP", "5902-2", "coagulation"),
    ("inr", "INR", "6301-6", "coagulation"),
    ("tca", "TCA", "3173-2", "coagulation"),
    ("fibrinogène", "Fibrinogène", "3255-7", "coagulation"),
    ("d-dimères", "D-Dimères", "48065-7", "coagulation"),
    // Tumor markers
    ("psa", "PSA total", "2857-1", "tumor_marker"),
    ("afp", "AFP", "1834-1", "tumor_marker"),
    ("ace", "ACE", "2039-6", "tumor_marker"),
    ("ca 125", "CA 125", "10334-1", "tumor_marker"),
    // Hormones
    ("beta hcg", "Bêta-HCG", "21198-7", "hormone"),
    ("cortisol", "Cortisol", "2143-6", "hormone"),
    ("testostérone", "Testostérone", "2986-8", "hormone"),
    ("estradiol", "Estradiol", "2243-4", "hormone"),
    // Cardiac
    ("troponine", "Troponine", "6598-7", "cardiac"),
    ("bnp", "BNP", "30934-4", "cardiac"),
    ("nt-probnp", "NT-proBNP", "33762-6", "cardiac"),
];
