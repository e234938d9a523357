//! Transcription executor contract
//!
//! The workflow engine talks to the remote language model only through the
//! TranscriptionExecutor trait. An executor turns one request into a lazy,
//! finite, non-restartable stream of text fragments. Retrying means calling
//! `stream` again.

use crate::stage::StageDefinition;
use async_trait::async_trait;
use futures_util::Stream;
use std::pin::Pin;

/// Lazily produced text fragments of one model response
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, ExecutorError>> + Send>>;

/// Binary payload bundled with a run (e.g., dictation audio)
#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

/// Everything the executor needs to produce one stage result
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptionRequest {
    /// Stage prompt placed ahead of the user's text
    pub instruction_text: String,
    /// System prompt for the model
    pub system_instruction: String,
    /// Remote model variant
    pub model_selector: String,
    /// Case input text
    pub user_text: String,
    pub attachment: Option<Attachment>,
}

impl TranscriptionRequest {
    /// Build the request for running `stage` against `user_text`
    pub fn for_stage(stage: &StageDefinition, user_text: &str, attachment: Option<Attachment>) -> Self {
        Self {
            instruction_text: stage.prompt_template.clone(),
            system_instruction: stage.system_instruction.clone(),
            model_selector: stage.model_selector.clone(),
            user_text: user_text.to_string(),
            attachment,
        }
    }

    /// Text contents sent to the model: instruction, then the case text
    pub fn contents(&self) -> String {
        format!("{}\n\nTEXT:\n{}", self.instruction_text, self.user_text)
    }
}

/// Failures of the remote model call, before or during streaming
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    /// Connection or body failure; the request URL is stripped
    #[error("transport error: {0}")]
    Transport(reqwest::Error),

    /// Non-success HTTP status (quota, validation, auth)
    #[error("model API returned {status}: {body}")]
    Api { status: u16, body: String },

    /// The model refused the prompt
    #[error("model blocked the request: {0}")]
    Blocked(String),

    #[error("malformed response chunk: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("executor is not configured: {0}")]
    Configuration(String),

    /// Stream ended mid-event or another executor-specific failure
    #[error("{0}")]
    Other(String),
}

impl From<reqwest::Error> for ExecutorError {
    fn from(err: reqwest::Error) -> Self {
        ExecutorError::Transport(err.without_url())
    }
}

/// Remote text-generation service invoked once per stage run
#[async_trait]
pub trait TranscriptionExecutor: Send + Sync {
    /// Start a model call and return its fragment stream
    ///
    /// Errors returned here happen before any fragment; errors yielded by the
    /// stream happen mid-response.
    async fn stream(&self, request: TranscriptionRequest) -> Result<FragmentStream, ExecutorError>;
}
