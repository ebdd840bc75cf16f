//! Instruction prompts sent to language models.
//!
//! Every prompt lives here so a wording change touches exactly one place
//! and unit tests can inspect the text without a live model.
//!
//! The extraction prompt is French because the reports it reads are French
//! and the canonical vocabulary in [`crate::normalize`] is French.

/// System prompt for structured biomarker extraction.
///
/// Used when `IngestConfig::extraction_prompt` is `None`. The model must
/// answer with a single JSON object of the shape shown at the end.
pub const EXTRACTION_SYSTEM_PROMPT: &str = r#"Tu es un expert médical. Extrais TOUS les biomarqueurs du bilan sanguin en JSON.

Le texte contient des tables avec les résultats. Chaque ligne de table = un biomarqueur.

## RÈGLES
1. Extraire CHAQUE biomarqueur avec sa valeur et unité
2. UN seul enregistrement par biomarqueur (pas de doublons)
3. Formule leucocytaire: prendre valeur absolue (G/L), pas le %
4. Créatinine: prendre µmol/L, pas mg/L
5. Électrophorèse hémoglobine: extraire Hémoglobine A1 et A2 (valeurs en %)
6. Plaquettes: ne pas oublier!
7. Convertir virgules en points: "1,85" => 1.85
8. Si une date de prélèvement est indiquée pour un résultat, la mettre dans test_date (YYYY-MM-DD)

## FORMAT JSON
{"biomarkers":[{"biomarker_name":"Nom exact","value":12.3,"unit":"g/L","reference_range_text":"10-15","reference_min":10.0,"reference_max":15.0,"test_date":null}],"lab_name":"Nom du labo","report_date":"YYYY-MM-DD"}"#;

/// User-turn prefix placed before the analysis text.
pub const EXTRACTION_USER_PREFIX: &str =
    "Extrait TOUS les biomarqueurs de ce bilan sanguin (format markdown avec tables):";

/// User-turn text when the raw document is attached instead of text.
pub const EXTRACTION_DOCUMENT_INSTRUCTION: &str =
    "Extrait TOUS les biomarqueurs de ce bilan sanguin PDF joint.";

/// System prompt for transcribing one rendered page in vision mode.
pub const TRANSCRIPTION_SYSTEM_PROMPT: &str = r#"You are transcribing one page of a medical laboratory report to Markdown.

1. Preserve ALL text exactly as printed, including accents, units and decimal commas
2. Render every results table as a GFM pipe table, one row per analyte,
   keeping the columns: analyte, value, unit, reference range
3. Keep the laboratory name, patient-independent headers and sampling dates
4. Ignore logos, signatures, page numbers and decorative lines
5. Output ONLY the Markdown content. Do NOT wrap it in fences and do NOT comment"#;

/// Build the user turn for text-mode extraction.
pub fn extraction_user_message(text: &str) -> String {
    format!("{EXTRACTION_USER_PREFIX}\n\n{text}")
}
