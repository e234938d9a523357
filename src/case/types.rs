//! Case type definitions
//!
//! A case is one unit of transcription work moving through the pipeline.
//! Fields are private: every mutation goes through a method so the
//! verification flag can never outlive the output it was given for.

use crate::stage::StageId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata about an audio recording attached to a case
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioInfo {
    /// Original upload filename (e.g., "ward-round-0412.mp3")
    pub file_name: String,
    /// MIME type sent to the model (e.g., "audio/mpeg")
    pub mime_type: String,
    pub size_bytes: u64,
}

/// A persisted transcription case
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Case {
    id: String,
    title: String,
    created_at: DateTime<Utc>,
    last_modified_at: DateTime<Utc>,
    /// Text fed into the active stage
    input_text: String,
    /// Latest result of running the active stage
    output_text: String,
    current_stage: StageId,
    /// Human reviewer has approved `output_text` in its current form
    verified: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    audio_info: Option<AudioInfo>,
}

impl Case {
    /// Create a new case positioned at the given entry stage
    pub fn new(title: impl Into<String>, first_stage: StageId) -> Self {
        let now = Utc::now();
        Self {
            id: format!("case-{}", uuid::Uuid::new_v4()),
            title: title.into(),
            created_at: now,
            last_modified_at: now,
            input_text: String::new(),
            output_text: String::new(),
            current_stage: first_stage,
            verified: false,
            audio_info: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_modified_at(&self) -> DateTime<Utc> {
        self.last_modified_at
    }

    pub fn input_text(&self) -> &str {
        &self.input_text
    }

    pub fn output_text(&self) -> &str {
        &self.output_text
    }

    pub fn current_stage(&self) -> &StageId {
        &self.current_stage
    }

    pub fn is_verified(&self) -> bool {
        self.verified
    }

    pub fn audio_info(&self) -> Option<&AudioInfo> {
        self.audio_info.as_ref()
    }

    pub fn rename(&mut self, title: impl Into<String>) {
        self.title = title.into();
        self.touch();
    }

    /// Replace the input text (does not affect verification of the output)
    pub fn set_input_text(&mut self, text: impl Into<String>) {
        self.input_text = text.into();
        self.touch();
    }

    /// Replace the output text, e.g. after a manual correction
    pub fn set_output_text(&mut self, text: impl Into<String>) {
        self.output_text = text.into();
        self.verified = false;
        self.touch();
    }

    /// Append one streamed fragment to the output
    pub fn append_output(&mut self, fragment: &str) {
        self.output_text.push_str(fragment);
        self.verified = false;
        self.touch();
    }

    /// Move the case to another stage without promoting output
    pub fn set_current_stage(&mut self, stage: StageId) {
        self.current_stage = stage;
        self.verified = false;
        self.touch();
    }

    pub fn set_verified(&mut self, verified: bool) {
        self.verified = verified;
        self.touch();
    }

    pub fn set_audio_info(&mut self, info: Option<AudioInfo>) {
        self.audio_info = info;
        self.touch();
    }

    /// Promote the output into the next stage's input
    ///
    /// Gate checks belong to the workflow engine; this only applies the effect.
    pub(crate) fn promote_output(&mut self, next_stage: StageId) {
        self.input_text = std::mem::take(&mut self.output_text);
        self.current_stage = next_stage;
        self.verified = false;
        self.touch();
    }

    fn touch(&mut self) {
        self.last_modified_at = Utc::now();
    }
}

/// Title for a case created implicitly from its first input
pub fn title_from_input(text: &str) -> String {
    let first_line = text.lines().map(str::trim).find(|line| !line.is_empty()).unwrap_or("");
    if first_line.is_empty() {
        return format!("Case {}", Utc::now().format("%Y-%m-%d %H:%M"));
    }
    let mut title: String = first_line.chars().take(48).collect();
    if first_line.chars().count() > 48 {
        title.push('…');
    }
    title
}
