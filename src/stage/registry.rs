//! Ordered stage registry
//!
//! Holds the pipeline order as an explicit list so "next stage" is a lookup,
//! not an accident of declaration order. Built once at startup and shared
//! read-only through an Arc.

use crate::error::WorkflowError;
use crate::stage::types::{StageDefinition, StageId};
use std::collections::HashMap;

/// Immutable, totally ordered catalog of stage definitions
#[derive(Debug)]
pub struct StageRegistry {
    /// Stages in pipeline order
    stages: Vec<StageDefinition>,
    /// Key: stage id, Value: position in `stages`
    positions: HashMap<StageId, usize>,
}

impl StageRegistry {
    /// Build a registry from an ordered catalog
    ///
    /// Rejects empty catalogs and duplicate ids, which would make the pipeline
    /// order ambiguous.
    pub fn new(stages: Vec<StageDefinition>) -> Result<Self, WorkflowError> {
        if stages.is_empty() {
            return Err(WorkflowError::InvalidCatalog(
                "catalog must contain at least one stage".to_string(),
            ));
        }

        let mut positions = HashMap::with_capacity(stages.len());
        for (index, stage) in stages.iter().enumerate() {
            if stage.id.as_str().trim().is_empty() {
                return Err(WorkflowError::InvalidCatalog(format!(
                    "stage at position {} has an empty id",
                    index + 1
                )));
            }
            if positions.insert(stage.id.clone(), index).is_some() {
                return Err(WorkflowError::InvalidCatalog(format!(
                    "duplicate stage id '{}'",
                    stage.id
                )));
            }
        }

        tracing::info!("Initialized stage registry with {} stages", stages.len());

        Ok(Self { stages, positions })
    }

    /// Registry over the built-in seven-stage pipeline
    pub fn with_default_catalog() -> Result<Self, WorkflowError> {
        Self::new(crate::stage::catalog::default_catalog())
    }

    /// Look up the definition for a stage id
    pub fn definition_for(&self, id: &StageId) -> Result<&StageDefinition, WorkflowError> {
        self.positions
            .get(id)
            .map(|&index| &self.stages[index])
            .ok_or_else(|| WorkflowError::UnknownStage(id.to_string()))
    }

    /// The stage following `id`, or None when `id` is the last stage
    pub fn next_stage(&self, id: &StageId) -> Result<Option<&StageDefinition>, WorkflowError> {
        let index = self.position(id)?;
        Ok(self.stages.get(index + 1))
    }

    /// All stages in pipeline order
    pub fn ordered_stages(&self) -> &[StageDefinition] {
        &self.stages
    }

    /// Entry stage for new cases
    pub fn first_stage(&self) -> &StageDefinition {
        &self.stages[0]
    }

    pub fn is_last(&self, id: &StageId) -> Result<bool, WorkflowError> {
        Ok(self.position(id)? + 1 == self.stages.len())
    }

    /// Zero-based position of a stage in the pipeline
    pub fn position(&self, id: &StageId) -> Result<usize, WorkflowError> {
        self.positions
            .get(id)
            .copied()
            .ok_or_else(|| WorkflowError::UnknownStage(id.to_string()))
    }

    pub fn contains(&self, id: &StageId) -> bool {
        self.positions.contains_key(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::catalog::default_catalog;

    fn registry() -> StageRegistry {
        StageRegistry::with_default_catalog().unwrap()
    }

    #[test]
    fn next_stage_follows_pipeline_order() {
        let registry = registry();
        let next = registry.next_stage(&StageId::new("cleanup")).unwrap().unwrap();
        assert_eq!(next.id, StageId::new("structured_report"));

        let after_radiology = registry.next_stage(&StageId::new("radiology_report")).unwrap().unwrap();
        assert_eq!(after_radiology.id, StageId::new("final_polish"));
    }

    #[test]
    fn last_stage_has_no_successor() {
        let registry = registry();
        let last = StageId::new("final_polish");
        assert!(registry.next_stage(&last).unwrap().is_none());
        assert!(registry.is_last(&last).unwrap());
        assert!(!registry.is_last(&StageId::new("cleanup")).unwrap());
    }

    #[test]
    fn every_stage_but_the_last_has_a_successor() {
        let registry = registry();
        let stages = registry.ordered_stages();
        for window in stages.windows(2) {
            let next = registry.next_stage(&window[0].id).unwrap().unwrap();
            assert_eq!(next.id, window[1].id);
        }
    }

    #[test]
    fn unknown_stage_fails_loudly() {
        let registry = registry();
        let err = registry.definition_for(&StageId::new("triage")).unwrap_err();
        assert!(matches!(err, WorkflowError::UnknownStage(id) if id == "triage"));
        assert!(registry.next_stage(&StageId::new("triage")).is_err());
    }

    #[test]
    fn first_stage_is_cleanup() {
        assert_eq!(registry().first_stage().id, StageId::new("cleanup"));
    }

    #[test]
    fn empty_catalog_is_rejected() {
        let err = StageRegistry::new(Vec::new()).unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidCatalog(_)));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let mut stages = default_catalog();
        stages.push(stages[0].clone());
        let err = StageRegistry::new(stages).unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidCatalog(msg) if msg.contains("cleanup")));
    }

    #[test]
    fn single_stage_catalog_is_its_own_last_stage() {
        let stages = vec![default_catalog().remove(0)];
        let registry = StageRegistry::new(stages).unwrap();
        assert!(registry.is_last(&StageId::new("cleanup")).unwrap());
    }
}
