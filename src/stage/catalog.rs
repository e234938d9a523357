//! Built-in stage catalog and catalog file loading
//!
//! The default pipeline runs Cleanup → Structured Report → Error Flagging →
//! Discharge Summary → OPD Note → Radiology Report → Final Polish. Deployments
//! may replace it with a JSON file holding an ordered array of stage definitions.

use crate::stage::types::{StageDefinition, StageId};
use anyhow::{Context, Result};
use std::path::Path;

const FLASH_MODEL: &str = "gemini-3-flash-preview";
const PRO_MODEL: &str = "gemini-3-pro-preview";

/// Flag the model must use for anything it cannot read with certainty
pub const UNSURE_FLAG: &str = "[UNSURE – VERIFY FROM AUDIO]";

/// System prompt shared by every built-in stage
pub fn system_instruction() -> String {
    format!(
        "You are an assistant editor for medical transcription. A human reviewer checks \
every document you produce before it is used.\n\n\
You may only clean raw transcription text, correct grammar and punctuation, arrange \
content into standard clinical formats, and point out content that needs human review.\n\n\
Never invent or assume clinical facts. Never guess at unclear terms. Never add \
diagnoses, medications or dosages. Never change the clinical meaning of the text \
and never give medical advice.\n\n\
Mark anything unclear as {UNSURE_FLAG} and keep every existing uncertainty flag. \
Keep a professional clinical tone."
    )
}

fn stage(
    id: &str,
    label: &str,
    description: &str,
    model: &str,
    prompt: &str,
    accepts_attachment: bool,
) -> StageDefinition {
    StageDefinition {
        id: StageId::new(id),
        label: label.to_string(),
        description: description.to_string(),
        system_instruction: system_instruction(),
        prompt_template: prompt.to_string(),
        model_selector: model.to_string(),
        accepts_attachment,
    }
}

/// The default seven-stage pipeline in execution order
pub fn default_catalog() -> Vec<StageDefinition> {
    vec![
        stage(
            "cleanup",
            "1. Core Cleanup",
            "Correct grammar, punctuation and obvious medical abbreviations.",
            FLASH_MODEL,
            "Edit the raw medical transcription draft below. If an audio recording is \
attached, transcribe it first and treat the transcript as the draft.\n\
- Fix grammar, punctuation and sentence flow.\n\
- Expand medical abbreviations only when the meaning is obvious.\n\
- Keep measurements, dosages and timelines exactly as given.\n\
- Do not add, interpret or infer anything.\n\
Flag any unclear word, drug name, dosage or sentence.",
            true,
        ),
        stage(
            "structured_report",
            "2. Structured Formatting",
            "Arrange the cleaned text under standard clinical headings.",
            FLASH_MODEL,
            "Format the cleaned transcription below as a clinical document. Use only these \
headings, and only when the text has content for them: Patient Details, Chief Complaint, \
History of Present Illness, Past Medical History, Medications, Allergies, Physical \
Examination, Investigations, Assessment / Diagnosis, Treatment / Plan, Follow-up \
Instructions. Use only information present in the text and keep uncertainty flags untouched.",
            false,
        ),
        stage(
            "error_flagging",
            "3. Error & Risk Identification",
            "List drugs, dosages and statements that need human verification.",
            PRO_MODEL,
            "Review the document below and list the items a human must verify: possibly \
misspelled drug names, dosages or units needing confirmation, high-risk clinical \
statements, and ambiguous phrases. For each item give the item, the concern and a \
suggested action. Do not rewrite or correct the document.",
            false,
        ),
        stage(
            "discharge_summary",
            "4. Discharge Summary",
            "Convert to a standard hospital discharge summary.",
            FLASH_MODEL,
            "Convert the transcription below into a hospital discharge summary with these \
sections: Patient Identification, Admission Date, Discharge Date, Diagnosis, Hospital \
Course, Procedures, Medications on Discharge, Discharge Advice, Follow-up Plan. Leave a \
section blank when the text does not mention it.",
            false,
        ),
        stage(
            "opd_note",
            "5. OPD/Clinic Note",
            "Concise clinic visit note.",
            FLASH_MODEL,
            "Convert the transcription below into a concise clinic visit note with: Visit \
Date, Chief Complaint, Examination Findings, Assessment, Treatment Given, Advice / \
Follow-up. Do not change any diagnosis and highlight unclear items.",
            false,
        ),
        stage(
            "radiology_report",
            "6. Radiology Report",
            "Clean and format radiology dictation.",
            FLASH_MODEL,
            "Format the radiology dictation below under Examination, Technique, Findings and \
Impression. Keep the radiologist's wording, do not re-interpret findings and flag unclear \
anatomical terms.",
            false,
        ),
        stage(
            "final_polish",
            "7. Final Polish",
            "Final preparation for human proofreading.",
            FLASH_MODEL,
            "Prepare the document below for final human proofreading. Make tone, tense and \
formatting consistent. Keep every uncertainty flag. Output plain text only, without \
markdown or commentary.",
            false,
        ),
    ]
}

/// Load an ordered stage catalog from a JSON array file
pub fn load_catalog_file(path: impl AsRef<Path>) -> Result<Vec<StageDefinition>> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read stage catalog '{}'", path.display()))?;
    let stages: Vec<StageDefinition> = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse stage catalog '{}'", path.display()))?;
    Ok(stages)
}
