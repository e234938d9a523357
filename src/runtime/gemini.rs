//! Gemini streaming executor
//!
//! Calls `models/{model}:streamGenerateContent?alt=sse` and turns the
//! server-sent event body into a fragment stream. Each SSE `data:` payload is
//! one GenerateContentResponse chunk; its candidate text becomes one fragment.

use crate::config::ExecutorConfig;
use crate::runtime::executor::{
    ExecutorError, FragmentStream, TranscriptionExecutor, TranscriptionRequest,
};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use futures_util::{stream, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::pin::Pin;

/// Credentials travel in a header so they never appear in request URLs
const API_KEY_HEADER: &str = "x-goog-api-key";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    system_instruction: Content,
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part {
    Text { text: String },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamChunk {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
    error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<ResponseContent>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    code: u16,
    #[serde(default)]
    message: String,
}

/// Streaming client for the Gemini generative language API
#[derive(Debug, Clone)]
pub struct GeminiExecutor {
    client: reqwest::Client,
    config: ExecutorConfig,
}

impl GeminiExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    fn endpoint(&self, model: &str) -> String {
        format!(
            "{}/v1beta/models/{}:streamGenerateContent",
            self.config.base_url.trim_end_matches('/'),
            model
        )
    }

    fn build_body(&self, request: &TranscriptionRequest) -> GenerateRequest {
        let mut parts = vec![Part::Text { text: request.contents() }];
        if let Some(attachment) = &request.attachment {
            parts.push(Part::InlineData {
                inline_data: InlineData {
                    mime_type: attachment.mime_type.clone(),
                    data: general_purpose::STANDARD.encode(&attachment.bytes),
                },
            });
        }

        GenerateRequest {
            system_instruction: Content {
                role: None,
                parts: vec![Part::Text { text: request.system_instruction.clone() }],
            },
            contents: vec![Content { role: Some("user"), parts }],
            generation_config: GenerationConfig {
                temperature: self.config.temperature,
                top_p: self.config.top_p,
                top_k: self.config.top_k,
            },
        }
    }
}

#[async_trait]
impl TranscriptionExecutor for GeminiExecutor {
    async fn stream(&self, request: TranscriptionRequest) -> Result<FragmentStream, ExecutorError> {
        if self.config.api_key.is_empty() {
            return Err(ExecutorError::Configuration(
                "no API key set (GEMINI_API_KEY)".to_string(),
            ));
        }

        let body = self.build_body(&request);
        tracing::debug!(
            "📡 Calling model '{}' ({} bytes of text, attachment: {})",
            request.model_selector,
            request.user_text.len(),
            request.attachment.is_some()
        );

        let response = self
            .client
            .post(self.endpoint(&request.model_selector))
            .query(&[("alt", "sse")])
            .header(API_KEY_HEADER, self.config.api_key.as_str())
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ExecutorError::Api { status, body });
        }

        Ok(sse_fragments(response.bytes_stream()))
    }
}

/// Incremental decoder for a `text/event-stream` body
///
/// Bytes may arrive split anywhere, including inside a UTF-8 sequence; only
/// complete lines are decoded.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    data_lines: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes and return the data payloads of every completed event
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);

        let mut events = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=newline).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line);

            if line.is_empty() {
                if let Some(event) = self.take_event() {
                    events.push(event);
                }
            } else if let Some(data) = line.strip_prefix("data:") {
                self.data_lines.push(data.strip_prefix(' ').unwrap_or(data).to_string());
            }
            // event:, id:, retry: and comments carry nothing we need
        }
        events
    }

    /// Flush an event left unterminated when the body ended
    pub fn finish(&mut self) -> Option<String> {
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&rest);
            let line = line.trim_end_matches('\r');
            if let Some(data) = line.strip_prefix("data:") {
                self.data_lines.push(data.strip_prefix(' ').unwrap_or(data).to_string());
            }
        }
        self.take_event()
    }

    fn take_event(&mut self) -> Option<String> {
        if self.data_lines.is_empty() {
            return None;
        }
        let event = self.data_lines.join("\n");
        self.data_lines.clear();
        Some(event)
    }
}

/// Extract the text carried by one response chunk
///
/// Returns None for chunks without text (usage-only or finish markers).
pub fn chunk_text(payload: &str) -> Result<Option<String>, ExecutorError> {
    let chunk: StreamChunk = serde_json::from_str(payload)?;

    if let Some(error) = chunk.error {
        return Err(ExecutorError::Api { status: error.code, body: error.message });
    }

    if let Some(reason) = chunk.prompt_feedback.and_then(|feedback| feedback.block_reason) {
        return Err(ExecutorError::Blocked(reason));
    }

    let text: String = chunk
        .candidates
        .into_iter()
        .next()
        .and_then(|candidate| candidate.content)
        .map(|content| content.parts.into_iter().filter_map(|part| part.text).collect())
        .unwrap_or_default();

    Ok(if text.is_empty() { None } else { Some(text) })
}

struct SseState<S> {
    body: Pin<Box<S>>,
    decoder: SseDecoder,
    pending: VecDeque<Result<String, ExecutorError>>,
    done: bool,
}

impl<S> SseState<S> {
    /// Queue fragments for decoded payloads; the first bad payload ends the stream
    fn enqueue(&mut self, payloads: Vec<String>) {
        for payload in payloads {
            match chunk_text(&payload) {
                Ok(Some(text)) => self.pending.push_back(Ok(text)),
                Ok(None) => {}
                Err(e) => {
                    self.pending.push_back(Err(e));
                    self.done = true;
                    return;
                }
            }
        }
    }
}

/// Turn an SSE byte stream into a fragment stream
///
/// The stream ends after the first error.
pub fn sse_fragments<S, B, E>(body: S) -> FragmentStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<ExecutorError> + Send + 'static,
{
    let state = SseState {
        body: Box::pin(body),
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        done: false,
    };

    Box::pin(stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.done {
                return None;
            }

            match state.body.next().await {
                Some(Ok(bytes)) => {
                    let payloads = state.decoder.push(bytes.as_ref());
                    state.enqueue(payloads);
                }
                Some(Err(e)) => {
                    state.pending.push_back(Err(e.into()));
                    state.done = true;
                }
                None => {
                    let trailing: Vec<String> = state.decoder.finish().into_iter().collect();
                    state.enqueue(trailing);
                    state.done = true;
                }
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::executor::Attachment;

    fn config() -> ExecutorConfig {
        ExecutorConfig {
            api_key: "test-key".to_string(),
            base_url: "http://localhost:9/".to_string(),
            temperature: 0.1,
            top_p: 0.95,
            top_k: 40,
        }
    }

    fn text_chunk(text: &str) -> String {
        serde_json::json!({
            "candidates": [{ "content": { "parts": [{ "text": text }], "role": "model" } }]
        })
        .to_string()
    }

    #[test]
    fn decoder_joins_events_split_across_reads() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: {\"a\":").is_empty());
        let events = decoder.push(b"1}\r\n\r\ndata: two\n\n");
        assert_eq!(events, vec!["{\"a\":1}".to_string(), "two".to_string()]);
    }

    #[test]
    fn decoder_handles_split_utf8_sequences() {
        let mut decoder = SseDecoder::new();
        let bytes = "data: fièvre\n\n".as_bytes();
        let split = bytes.iter().position(|&b| b >= 0x80).unwrap() + 1;
        assert!(decoder.push(&bytes[..split]).is_empty());
        assert_eq!(decoder.push(&bytes[split..]), vec!["fièvre".to_string()]);
    }

    #[test]
    fn decoder_joins_multi_line_data_and_ignores_other_fields() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b": keep-alive\nevent: message\ndata: a\ndata: b\n\n");
        assert_eq!(events, vec!["a\nb".to_string()]);
    }

    #[test]
    fn decoder_flushes_unterminated_event() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: last").is_empty());
        assert_eq!(decoder.finish(), Some("last".to_string()));
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn chunk_text_concatenates_parts() {
        let payload = serde_json::json!({
            "candidates": [{ "content": { "parts": [{ "text": "Patient " }, { "text": "stable." }] } }]
        })
        .to_string();
        assert_eq!(chunk_text(&payload).unwrap().as_deref(), Some("Patient stable."));
    }

    #[test]
    fn chunk_without_text_yields_nothing() {
        let payload = r#"{"candidates":[{"finishReason":"STOP"}],"usageMetadata":{"totalTokenCount":12}}"#;
        assert_eq!(chunk_text(payload).unwrap(), None);
    }

    #[test]
    fn blocked_prompt_is_an_error() {
        let payload = r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#;
        assert!(matches!(chunk_text(payload), Err(ExecutorError::Blocked(reason)) if reason == "SAFETY"));
    }

    #[test]
    fn inline_error_payload_is_an_api_error() {
        let payload = r#"{"error":{"code":429,"message":"Resource exhausted","status":"RESOURCE_EXHAUSTED"}}"#;
        assert!(matches!(chunk_text(payload), Err(ExecutorError::Api { status: 429, .. })));
    }

    #[test]
    fn request_body_carries_system_prompt_and_sampling() {
        let executor = GeminiExecutor::new(config());
        let request = TranscriptionRequest {
            instruction_text: "Clean this.".to_string(),
            system_instruction: "Be careful.".to_string(),
            model_selector: "gemini-3-flash-preview".to_string(),
            user_text: "pt c/o fever".to_string(),
            attachment: None,
        };

        let body = serde_json::to_value(executor.build_body(&request)).unwrap();
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "Be careful.");
        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(body["contents"][0]["parts"][0]["text"], "Clean this.\n\nTEXT:\npt c/o fever");
        assert_eq!(body["generationConfig"]["topK"], 40);
        assert!(body["systemInstruction"].get("role").is_none());
    }

    #[test]
    fn attachment_is_sent_as_base64_inline_data() {
        let executor = GeminiExecutor::new(config());
        let request = TranscriptionRequest {
            instruction_text: "Transcribe.".to_string(),
            system_instruction: String::new(),
            model_selector: "gemini-3-flash-preview".to_string(),
            user_text: String::new(),
            attachment: Some(Attachment {
                file_name: "dictation.wav".to_string(),
                mime_type: "audio/wav".to_string(),
                bytes: b"RIFF".to_vec(),
            }),
        };

        let body = serde_json::to_value(executor.build_body(&request)).unwrap();
        let inline = &body["contents"][0]["parts"][1]["inlineData"];
        assert_eq!(inline["mimeType"], "audio/wav");
        assert_eq!(inline["data"], "UklGRg==");
    }

    #[test]
    fn endpoint_trims_trailing_slash() {
        let executor = GeminiExecutor::new(config());
        assert_eq!(
            executor.endpoint("gemini-3-pro-preview"),
            "http://localhost:9/v1beta/models/gemini-3-pro-preview:streamGenerateContent"
        );
    }

    #[tokio::test]
    async fn missing_api_key_fails_before_any_request() {
        let mut config = config();
        config.api_key.clear();
        let executor = GeminiExecutor::new(config);
        let request = TranscriptionRequest {
            instruction_text: String::new(),
            system_instruction: String::new(),
            model_selector: "m".to_string(),
            user_text: "text".to_string(),
            attachment: None,
        };
        assert!(matches!(executor.stream(request).await, Err(ExecutorError::Configuration(_))));
    }

    #[tokio::test]
    async fn sse_body_becomes_ordered_fragments() {
        let body = format!("data: {}\n\ndata: {}\n\n", text_chunk("Patient "), text_chunk("stable."));
        let (first, second) = body.split_at(17);
        let chunks: Vec<Result<Vec<u8>, ExecutorError>> =
            vec![Ok(first.as_bytes().to_vec()), Ok(second.as_bytes().to_vec())];

        let fragments: Vec<String> = sse_fragments(stream::iter(chunks))
            .map(|item| item.unwrap())
            .collect()
            .await;
        assert_eq!(fragments, vec!["Patient ".to_string(), "stable.".to_string()]);
    }

    #[tokio::test]
    async fn transport_error_ends_stream_after_delivered_fragments() {
        let chunks: Vec<Result<Vec<u8>, ExecutorError>> = vec![
            Ok(format!("data: {}\n\n", text_chunk("A")).into_bytes()),
            Err(ExecutorError::Other("connection reset".to_string())),
            Ok(format!("data: {}\n\n", text_chunk("never")).into_bytes()),
        ];

        let items: Vec<Result<String, ExecutorError>> = sse_fragments(stream::iter(chunks)).collect().await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap(), "A");
        assert!(items[1].is_err());
    }
}
