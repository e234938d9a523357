//! Verification-gated workflow engine
//!
//! Runs the active stage of a case against the transcription executor,
//! streams fragments into the case output, and enforces the human
//! verification gate on every path that advances or releases text.
//!
//! Per-case state machine:
//! IDLE --run--> RUNNING --complete--> IDLE (output set, unverified)
//! RUNNING --fail--> IDLE (partial output + error marker, unverified)
//! IDLE --verify--> VERIFIED --advance--> IDLE (next stage)

use crate::case::types::{title_from_input, AudioInfo, Case};
use crate::case::workspace::{CaseSlot, RunHandle, Workspace};
use crate::error::WorkflowError;
use crate::runtime::executor::{Attachment, TranscriptionExecutor, TranscriptionRequest};
use crate::stage::{StageDefinition, StageId, StageRegistry};
use futures_util::StreamExt;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Appended to the output when the executor fails before or during streaming
pub const ERROR_MARKER: &str =
    "\n\n[[HEALTHDOCS ERROR: transcription failed. Check the API key and network, then run the stage again.]]";

/// Appended to the output when a run is cancelled by the user
pub const CANCELLED_MARKER: &str = "\n\n[[HEALTHDOCS CANCELLED: this run was stopped before the model finished.]]";

const NOT_VERIFIED: &str = "output has not been verified by a human reviewer";
const NO_OUTPUT: &str = "there is no output to carry into the next stage";
const HAS_MARKER: &str = "output ends with a failed or cancelled run and must be regenerated or edited";

/// Optional parameters of a stage run
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Run this stage instead of the case's current stage
    /// The case moves to this stage when the run starts
    pub stage: Option<StageId>,
    /// Binary payload for stages that accept one (e.g., dictation audio)
    pub attachment: Option<Attachment>,
}

/// How a stage run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// The stream finished normally
    Completed,
    /// The executor failed; the error marker was appended
    Failed,
    /// Cancelled by the user or by deleting the case
    Cancelled,
    /// The run no longer owned the case output and stopped writing
    Superseded,
}

/// Summary of one finished stage run
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub run_id: u64,
    pub case_id: String,
    pub stage: StageId,
    pub status: RunStatus,
    /// Number of fragments appended to the output
    pub fragments: usize,
    pub error: Option<String>,
}

/// Workflow engine shared by the HTTP layer and background runs
///
/// Cheap to clone: every component is Arc-wrapped.
#[derive(Clone)]
pub struct WorkflowEngine {
    registry: Arc<StageRegistry>,
    workspace: Arc<Workspace>,
    executor: Arc<dyn TranscriptionExecutor>,
    next_run_id: Arc<AtomicU64>,
}

/// A validated run that owns its case output until it finishes
pub struct PreparedRun {
    engine: WorkflowEngine,
    case_id: String,
    run_id: u64,
    stage: StageDefinition,
    request: TranscriptionRequest,
    cancel: CancellationToken,
}

impl WorkflowEngine {
    pub fn new(
        registry: Arc<StageRegistry>,
        workspace: Arc<Workspace>,
        executor: Arc<dyn TranscriptionExecutor>,
    ) -> Self {
        Self {
            registry,
            workspace,
            executor,
            next_run_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn registry(&self) -> &StageRegistry {
        &self.registry
    }

    pub fn workspace(&self) -> &Arc<Workspace> {
        &self.workspace
    }

    /// Log unknown stages of loaded cases so corrupted records are noticed early
    pub async fn audit_cases(&self) -> usize {
        let mut unknown = 0;
        for case in self.workspace.list().await {
            if !self.registry.contains(case.current_stage()) {
                unknown += 1;
                tracing::error!(
                    "❌ Case '{}' references unknown stage '{}'; runs and advances will be refused",
                    case.id(),
                    case.current_stage()
                );
            }
        }
        unknown
    }

    /// Create a case at the first pipeline stage and make it active
    ///
    /// Without a title, one is derived from the input text.
    pub async fn create_case(&self, title: Option<String>, input_text: Option<String>) -> Case {
        let input_text = input_text.unwrap_or_default();
        let title = title
            .filter(|title| !title.trim().is_empty())
            .unwrap_or_else(|| title_from_input(&input_text));

        let mut case = Case::new(title, self.registry.first_stage().id.clone());
        case.set_input_text(input_text);

        let case = self.workspace.insert(case).await;
        tracing::info!("📝 Created case {} ({})", case.id(), case.title());
        case
    }

    pub async fn rename_case(&self, case_id: &str, title: String) -> Result<Case, WorkflowError> {
        self.workspace
            .update(case_id, |slot| {
                slot.case.rename(title);
                Ok(slot.case.clone())
            })
            .await
    }

    /// Replace the input text of the active stage
    pub async fn update_input(&self, case_id: &str, text: String) -> Result<Case, WorkflowError> {
        self.workspace
            .update(case_id, |slot| {
                slot.case.set_input_text(text);
                Ok(slot.case.clone())
            })
            .await
    }

    /// Apply a reviewer's manual correction to the output
    pub async fn update_output(&self, case_id: &str, text: String) -> Result<Case, WorkflowError> {
        self.workspace
            .update(case_id, |slot| {
                ensure_idle(case_id, slot)?;
                slot.case.set_output_text(text);
                Ok(slot.case.clone())
            })
            .await
            .inspect_err(|e| tracing::warn!("⚠️ Output edit rejected for {}: {}", case_id, e))
    }

    /// Jump to another stage without promoting output
    pub async fn select_stage(&self, case_id: &str, stage: StageId) -> Result<Case, WorkflowError> {
        let registry = Arc::clone(&self.registry);
        self.workspace
            .update(case_id, |slot| {
                ensure_idle(case_id, slot)?;
                registry.definition_for(&stage)?;
                slot.case.set_current_stage(stage);
                Ok(slot.case.clone())
            })
            .await
            .inspect_err(|e| tracing::warn!("⚠️ Stage selection rejected for {}: {}", case_id, e))
    }

    pub async fn delete_case(&self, case_id: &str) -> Result<Case, WorkflowError> {
        let case = self.workspace.remove(case_id).await?;
        tracing::info!("🗑️ Deleted case {}", case_id);
        Ok(case)
    }

    /// Record or withdraw the reviewer's approval of the current output
    pub async fn set_verified(&self, case_id: &str, verified: bool) -> Result<Case, WorkflowError> {
        let case = self
            .workspace
            .update(case_id, |slot| {
                slot.case.set_verified(verified);
                Ok(slot.case.clone())
            })
            .await?;
        tracing::info!("🩺 Case {} verification set to {}", case_id, verified);
        Ok(case)
    }

    /// Promote verified output into the next stage's input
    pub async fn advance_stage(&self, case_id: &str) -> Result<Case, WorkflowError> {
        let registry = Arc::clone(&self.registry);
        let case = self
            .workspace
            .update(case_id, |slot| {
                ensure_releasable(case_id, &slot.case, "advance")?;
                if slot.case.output_text().trim().is_empty() {
                    return Err(WorkflowError::ComplianceGate {
                        case_id: case_id.to_string(),
                        action: "advance",
                        reason: NO_OUTPUT,
                    });
                }
                ensure_idle(case_id, slot)?;

                let current = slot.case.current_stage().clone();
                let next = registry
                    .next_stage(&current)?
                    .ok_or_else(|| WorkflowError::WorkflowComplete {
                        case_id: case_id.to_string(),
                        stage: current.to_string(),
                    })?;

                slot.case.promote_output(next.id.clone());
                Ok(slot.case.clone())
            })
            .await
            .inspect_err(|e| tracing::warn!("⚠️ Advance rejected for {}: {}", case_id, e))?;

        tracing::info!("➡️ Case {} advanced to stage '{}'", case_id, case.current_stage());
        Ok(case)
    }

    /// Release the verified output (copy, download or submit)
    pub async fn export_output(&self, case_id: &str) -> Result<String, WorkflowError> {
        let text = self
            .workspace
            .read(case_id, |slot| -> Result<String, WorkflowError> {
                ensure_releasable(case_id, &slot.case, "export")?;
                ensure_idle(case_id, slot)?;
                Ok(slot.case.output_text().to_string())
            })
            .await
            .and_then(|result| result)
            .inspect_err(|e| tracing::warn!("⚠️ Export rejected for {}: {}", case_id, e))?;

        tracing::info!("📤 Exported {} characters from case {}", text.len(), case_id);
        Ok(text)
    }

    /// Validate a run and take ownership of the case output
    ///
    /// Rejections leave the case untouched. On success the output is cleared,
    /// verification is withdrawn and the case is marked as running.
    pub async fn prepare_run(&self, case_id: &str, options: RunOptions) -> Result<PreparedRun, WorkflowError> {
        let registry = Arc::clone(&self.registry);
        let run_id = self.next_run_id.fetch_add(1, Ordering::SeqCst);
        let cancel = CancellationToken::new();
        let handle = RunHandle { run_id, cancel: cancel.clone() };

        let (stage, request) = self
            .workspace
            .update(case_id, |slot| {
                ensure_idle(case_id, slot)?;

                let stage_id = options
                    .stage
                    .unwrap_or_else(|| slot.case.current_stage().clone());
                let stage = registry.definition_for(&stage_id)?.clone();

                if options.attachment.is_some() && !stage.accepts_attachment {
                    return Err(WorkflowError::AttachmentNotAllowed(stage.id.to_string()));
                }
                if slot.case.input_text().trim().is_empty() && options.attachment.is_none() {
                    return Err(WorkflowError::EmptyInput);
                }

                if let Some(attachment) = &options.attachment {
                    slot.case.set_audio_info(Some(AudioInfo {
                        file_name: attachment.file_name.clone(),
                        mime_type: attachment.mime_type.clone(),
                        size_bytes: attachment.bytes.len() as u64,
                    }));
                }
                if slot.case.current_stage() != &stage.id {
                    slot.case.set_current_stage(stage.id.clone());
                }

                let request = TranscriptionRequest::for_stage(&stage, slot.case.input_text(), options.attachment);
                slot.case.set_output_text("");
                slot.run = Some(handle);
                Ok((stage, request))
            })
            .await
            .inspect_err(|e| tracing::warn!("⚠️ Run rejected for {}: {}", case_id, e))?;

        tracing::info!("🚀 Prepared run {} of stage '{}' for case {}", run_id, stage.id, case_id);

        Ok(PreparedRun {
            engine: self.clone(),
            case_id: case_id.to_string(),
            run_id,
            stage,
            request,
            cancel,
        })
    }

    /// Run a stage to completion
    ///
    /// Executor failures are recovered here and reported through the outcome;
    /// only validation rejections are returned as errors.
    pub async fn run_stage(&self, case_id: &str, options: RunOptions) -> Result<RunOutcome, WorkflowError> {
        let prepared = self.prepare_run(case_id, options).await?;
        Ok(prepared.execute().await)
    }

    /// Stop the in-flight run of a case, keeping its partial output
    ///
    /// Returns false when nothing was running.
    pub async fn cancel_run(&self, case_id: &str) -> Result<bool, WorkflowError> {
        let cancelled = self
            .workspace
            .update(case_id, |slot| match slot.run.take() {
                Some(run) => {
                    run.cancel.cancel();
                    slot.case.append_output(CANCELLED_MARKER);
                    Ok(Some(run.run_id))
                }
                None => Ok(None),
            })
            .await?;

        if let Some(run_id) = cancelled {
            tracing::info!("🛑 Cancelled run {} for case {}", run_id, case_id);
        }
        Ok(cancelled.is_some())
    }

    /// Cancel every in-flight run and write the workspace to the store
    ///
    /// Run handles are not persisted, so an interrupted run must leave its
    /// marker in the output before the final write.
    pub async fn shutdown(&self) -> anyhow::Result<usize> {
        let mut interrupted = 0;
        for case in self.workspace.list().await {
            if !self.workspace.is_running(case.id()).await.unwrap_or(false) {
                continue;
            }
            if self.cancel_run(case.id()).await.unwrap_or(false) {
                interrupted += 1;
            }
        }
        if interrupted > 0 {
            tracing::warn!("⚠️ Interrupted {} in-flight runs at shutdown", interrupted);
        }

        self.workspace.flush().await?;
        Ok(interrupted)
    }
}

impl PreparedRun {
    pub fn run_id(&self) -> u64 {
        self.run_id
    }

    pub fn case_id(&self) -> &str {
        &self.case_id
    }

    /// Stream the executor response into the case output
    pub async fn execute(self) -> RunOutcome {
        let start = std::time::Instant::now();
        tracing::info!(
            "▶️ Run {} started: stage '{}' with model '{}' for case {}",
            self.run_id,
            self.stage.id,
            self.stage.model_selector,
            self.case_id
        );

        let executor = Arc::clone(&self.engine.executor);
        let started = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return self.outcome(RunStatus::Cancelled, 0, None),
            started = executor.stream(self.request.clone()) => started,
        };

        let mut stream = match started {
            Ok(stream) => stream,
            Err(e) => return self.fail(WorkflowError::ExecutorFailure(e), 0).await,
        };

        let mut fragments = 0;
        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    return self.outcome(RunStatus::Cancelled, fragments, None);
                }
                next = stream.next() => next,
            };

            match next {
                Some(Ok(fragment)) => {
                    if fragment.is_empty() {
                        continue;
                    }
                    if !self.append(&fragment).await {
                        tracing::warn!("⏭️ Run {} superseded for case {}, dropping stream", self.run_id, self.case_id);
                        return self.outcome(RunStatus::Superseded, fragments, None);
                    }
                    fragments += 1;
                    tracing::debug!("Run {} fragment {} ({} chars)", self.run_id, fragments, fragment.len());
                }
                Some(Err(e)) => return self.fail(WorkflowError::ExecutorFailure(e), fragments).await,
                None => break,
            }
        }

        let status = if self.release(None).await {
            RunStatus::Completed
        } else {
            RunStatus::Superseded
        };
        tracing::info!(
            "✅ Run {} finished with {} fragments in {:?}",
            self.run_id,
            fragments,
            start.elapsed()
        );
        self.outcome(status, fragments, None)
    }

    /// Append one fragment if this run still owns the case output
    async fn append(&self, fragment: &str) -> bool {
        let run_id = self.run_id;
        self.engine
            .workspace
            .update(&self.case_id, |slot| {
                if !owns(slot, run_id) {
                    return Ok(false);
                }
                slot.case.append_output(fragment);
                Ok(true)
            })
            .await
            .unwrap_or(false)
    }

    /// Mark the run finished, optionally appending a marker first
    async fn release(&self, marker: Option<&str>) -> bool {
        let run_id = self.run_id;
        self.engine
            .workspace
            .update(&self.case_id, |slot| {
                if !owns(slot, run_id) {
                    return Ok(false);
                }
                if let Some(marker) = marker {
                    slot.case.append_output(marker);
                }
                slot.run = None;
                Ok(true)
            })
            .await
            .unwrap_or(false)
    }

    async fn fail(&self, error: WorkflowError, fragments: usize) -> RunOutcome {
        tracing::error!("❌ Run {} failed for case {}: {}", self.run_id, self.case_id, error);
        let status = if self.release(Some(ERROR_MARKER)).await {
            RunStatus::Failed
        } else {
            RunStatus::Superseded
        };
        self.outcome(status, fragments, Some(error.to_string()))
    }

    fn outcome(&self, status: RunStatus, fragments: usize, error: Option<String>) -> RunOutcome {
        RunOutcome {
            run_id: self.run_id,
            case_id: self.case_id.clone(),
            stage: self.stage.id.clone(),
            status,
            fragments,
            error,
        }
    }
}

fn owns(slot: &CaseSlot, run_id: u64) -> bool {
    slot.run.as_ref().map(|run| run.run_id) == Some(run_id)
}

fn ensure_idle(case_id: &str, slot: &CaseSlot) -> Result<(), WorkflowError> {
    if slot.is_running() {
        return Err(WorkflowError::RunInProgress(case_id.to_string()));
    }
    Ok(())
}

/// The gate shared by every path that advances or releases text
///
/// Verified empty output is releasable; only advancing needs text.
fn ensure_releasable(case_id: &str, case: &Case, action: &'static str) -> Result<(), WorkflowError> {
    let reason = if !case.is_verified() {
        NOT_VERIFIED
    } else if case.output_text().ends_with(ERROR_MARKER) || case.output_text().ends_with(CANCELLED_MARKER) {
        HAS_MARKER
    } else {
        return Ok(());
    };

    Err(WorkflowError::ComplianceGate {
        case_id: case_id.to_string(),
        action,
        reason,
    })
}
