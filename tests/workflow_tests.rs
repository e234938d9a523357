//! End-to-end workflow behaviour through the public engine API

use async_trait::async_trait;
use futures_util::stream;
use healthdocs::case::storage::{CaseStore, MemoryCaseStore, SqliteCaseStore};
use healthdocs::case::{AudioInfo, Case, Workspace};
use healthdocs::runtime::{
    ExecutorError, FragmentStream, TranscriptionExecutor, TranscriptionRequest, ERROR_MARKER,
};
use healthdocs::{RunOptions, RunStatus, StageId, StageRegistry, WorkflowEngine, WorkflowError};
use std::sync::{Arc, Mutex};

/// Replays a fixed list of fragments, optionally failing afterwards
struct ScriptedExecutor {
    fragments: Vec<&'static str>,
    fail_after: bool,
    calls: Mutex<usize>,
}

impl ScriptedExecutor {
    fn new(fragments: Vec<&'static str>) -> Arc<Self> {
        Arc::new(Self { fragments, fail_after: false, calls: Mutex::new(0) })
    }

    fn failing(fragments: Vec<&'static str>) -> Arc<Self> {
        Arc::new(Self { fragments, fail_after: true, calls: Mutex::new(0) })
    }

    fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl TranscriptionExecutor for ScriptedExecutor {
    async fn stream(&self, _request: TranscriptionRequest) -> Result<FragmentStream, ExecutorError> {
        *self.calls.lock().unwrap() += 1;
        let mut items: Vec<Result<String, ExecutorError>> =
            self.fragments.iter().map(|f| Ok(f.to_string())).collect();
        if self.fail_after {
            items.push(Err(ExecutorError::Other("stream interrupted".to_string())));
        }
        Ok(Box::pin(stream::iter(items)))
    }
}

async fn engine_with(executor: Arc<ScriptedExecutor>) -> WorkflowEngine {
    let registry = Arc::new(StageRegistry::with_default_catalog().unwrap());
    let workspace = Workspace::load(Arc::new(MemoryCaseStore::new())).await.unwrap();
    WorkflowEngine::new(registry, workspace, executor)
}

#[tokio::test]
async fn cleanup_then_advance_promotes_verified_output() {
    let engine = engine_with(ScriptedExecutor::new(vec!["Patient complains of fever for 3 days."])).await;
    let case = engine.create_case(None, Some("pt c/o fever x3 days".to_string())).await;

    let outcome = engine.run_stage(case.id(), RunOptions::default()).await.unwrap();
    assert_eq!(outcome.status, RunStatus::Completed);

    let after_run = engine.workspace().get(case.id()).await.unwrap();
    assert_eq!(after_run.output_text(), "Patient complains of fever for 3 days.");
    assert!(!after_run.is_verified());

    engine.set_verified(case.id(), true).await.unwrap();
    let advanced = engine.advance_stage(case.id()).await.unwrap();

    let second = &engine.registry().ordered_stages()[1];
    assert_eq!(advanced.input_text(), "Patient complains of fever for 3 days.");
    assert_eq!(advanced.output_text(), "");
    assert_eq!(advanced.current_stage(), &second.id);
    assert_eq!(advanced.current_stage(), &StageId::new("structured_report"));
    assert!(!advanced.is_verified());
}

#[tokio::test]
async fn unverified_output_is_gated_on_every_stage() {
    let engine = engine_with(ScriptedExecutor::new(vec!["Draft text."])).await;
    let case = engine.create_case(None, Some("dictation".to_string())).await;

    let stages: Vec<StageId> = engine.registry().ordered_stages().iter().map(|s| s.id.clone()).collect();
    for stage in stages {
        engine.select_stage(case.id(), stage.clone()).await.unwrap();
        engine.run_stage(case.id(), RunOptions::default()).await.unwrap();

        let err = engine.export_output(case.id()).await.unwrap_err();
        assert!(
            matches!(err, WorkflowError::ComplianceGate { action: "export", .. }),
            "export on {} returned {:?}",
            stage,
            err
        );
        let err = engine.advance_stage(case.id()).await.unwrap_err();
        assert!(
            matches!(err, WorkflowError::ComplianceGate { action: "advance", .. }),
            "advance on {} returned {:?}",
            stage,
            err
        );
    }
}

#[tokio::test]
async fn verification_is_cleared_by_every_output_or_stage_change() {
    let engine = engine_with(ScriptedExecutor::new(vec!["Stable."])).await;
    let case = engine.create_case(None, Some("stable".to_string())).await;

    engine.run_stage(case.id(), RunOptions::default()).await.unwrap();
    engine.set_verified(case.id(), true).await.unwrap();
    engine.run_stage(case.id(), RunOptions::default()).await.unwrap();
    assert!(!engine.workspace().get(case.id()).await.unwrap().is_verified());

    engine.set_verified(case.id(), true).await.unwrap();
    let edited = engine.update_output(case.id(), "Stable, afebrile.".to_string()).await.unwrap();
    assert!(!edited.is_verified());

    engine.set_verified(case.id(), true).await.unwrap();
    let moved = engine.select_stage(case.id(), StageId::new("opd_note")).await.unwrap();
    assert!(!moved.is_verified());

    engine.set_verified(case.id(), true).await.unwrap();
    let advanced = engine.advance_stage(case.id()).await.unwrap();
    assert!(!advanced.is_verified());
}

#[tokio::test]
async fn advancing_past_last_stage_leaves_case_untouched() {
    let engine = engine_with(ScriptedExecutor::new(vec!["Final letter."])).await;
    let case = engine.create_case(None, Some("letter".to_string())).await;
    let last = engine.registry().ordered_stages().last().unwrap().id.clone();

    engine.select_stage(case.id(), last.clone()).await.unwrap();
    engine.run_stage(case.id(), RunOptions::default()).await.unwrap();
    let before = engine.set_verified(case.id(), true).await.unwrap();

    let err = engine.advance_stage(case.id()).await.unwrap_err();
    assert!(matches!(err, WorkflowError::WorkflowComplete { stage, .. } if stage == last.as_str()));
    assert_eq!(engine.workspace().get(case.id()).await.unwrap(), before);

    // Verified output on the last stage can still be released
    assert_eq!(engine.export_output(case.id()).await.unwrap(), "Final letter.");
}

#[tokio::test]
async fn blank_input_never_reaches_the_executor() {
    let executor = ScriptedExecutor::new(vec!["should not appear"]);
    let engine = engine_with(executor.clone()).await;
    let case = engine.create_case(Some("Empty".to_string()), Some(" \n\t ".to_string())).await;

    let err = engine.run_stage(case.id(), RunOptions::default()).await.unwrap_err();

    assert!(matches!(err, WorkflowError::EmptyInput));
    assert_eq!(executor.calls(), 0);
    let after = engine.workspace().get(case.id()).await.unwrap();
    assert_eq!(after.output_text(), "");
    assert!(!engine.workspace().is_running(case.id()).await.unwrap());
}

#[tokio::test]
async fn mid_stream_failure_keeps_partial_output_with_marker() {
    let engine = engine_with(ScriptedExecutor::failing(vec!["A", "B", "C"])).await;
    let case = engine.create_case(None, Some("dictation".to_string())).await;
    engine.set_verified(case.id(), true).await.unwrap();

    let outcome = engine.run_stage(case.id(), RunOptions::default()).await.unwrap();

    assert_eq!(outcome.status, RunStatus::Failed);
    assert_eq!(outcome.fragments, 3);
    assert!(outcome.error.is_some());
    let case = engine.workspace().get(case.id()).await.unwrap();
    assert_eq!(case.output_text(), format!("ABC{}", ERROR_MARKER));
    assert!(!case.is_verified());
}

#[tokio::test]
async fn unknown_persisted_stage_fails_loudly() {
    let store = Arc::new(MemoryCaseStore::new());
    let mut legacy = Case::new("Legacy", StageId::new("triage"));
    legacy.set_input_text("old dictation");
    store.save_all(&[legacy.clone()]).await.unwrap();

    let registry = Arc::new(StageRegistry::with_default_catalog().unwrap());
    let workspace = Workspace::load(store).await.unwrap();
    let executor = ScriptedExecutor::new(vec!["x"]);
    let engine = WorkflowEngine::new(registry, workspace, executor.clone());

    assert_eq!(engine.audit_cases().await, 1);
    let err = engine.run_stage(legacy.id(), RunOptions::default()).await.unwrap_err();
    assert!(matches!(err, WorkflowError::UnknownStage(stage) if stage == "triage"));
    assert_eq!(executor.calls(), 0);
}

#[tokio::test]
async fn workspace_survives_restart_on_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("healthdocs.db");

    let case_id = {
        let store = SqliteCaseStore::connect(&db_path).await.unwrap();
        let registry = Arc::new(StageRegistry::with_default_catalog().unwrap());
        let workspace = Workspace::load(Arc::new(store)).await.unwrap();
        let engine = WorkflowEngine::new(registry, workspace, ScriptedExecutor::new(vec!["Clean text."]));

        let case = engine.create_case(None, Some("raw text".to_string())).await;
        engine.run_stage(case.id(), RunOptions::default()).await.unwrap();
        engine.set_verified(case.id(), true).await.unwrap();
        engine.workspace().flush().await.unwrap();
        case.id().to_string()
    };

    let store = SqliteCaseStore::connect(&db_path).await.unwrap();
    let workspace = Workspace::load(Arc::new(store)).await.unwrap();
    let reloaded = workspace.get(&case_id).await.unwrap();

    assert_eq!(reloaded.output_text(), "Clean text.");
    assert!(reloaded.is_verified());
    assert_eq!(workspace.active_case_id(), Some(case_id));
}

#[tokio::test]
async fn sqlite_round_trip_preserves_every_field() {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteCaseStore::connect(dir.path().join("cases.db")).await.unwrap();

    let mut case = Case::new("Discharge – bed 4", StageId::new("discharge_summary"));
    case.set_input_text("Admitted with pneumonia.\nTreated with IV antibiotics.");
    case.set_output_text("Discharge summary draft [UNSURE – VERIFY FROM AUDIO]");
    case.set_audio_info(Some(AudioInfo {
        file_name: "bed4.m4a".to_string(),
        mime_type: "audio/mp4".to_string(),
        size_bytes: 48_213,
    }));
    case.set_verified(true);

    store.save_all(&[case.clone()]).await.unwrap();
    let loaded = store.load_all().await.unwrap();

    assert_eq!(loaded, vec![case]);
}
