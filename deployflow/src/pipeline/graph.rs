//! The validated, immutable stage graph.

use super::{ActionSpec, StageSpec};
use std::collections::BTreeMap;

/// A group of actions sharing a run order.
#[derive(Debug, Clone)]
pub struct RunOrderGroup<'a> {
    /// The shared run order.
    pub run_order: u32,
    /// The actions, in definition order.
    pub actions: Vec<&'a ActionSpec>,
}

/// A validated pipeline. Built by [`super::PipelineBuilder`]; never mutated.
#[derive(Debug, Clone)]
pub struct Pipeline {
    name: String,
    stages: Vec<StageSpec>,
}

impl Pipeline {
    pub(crate) fn new(name: String, stages: Vec<StageSpec>) -> Self {
        Self { name, stages }
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the stages in execution order.
    #[must_use]
    pub fn stages(&self) -> &[StageSpec] {
        &self.stages
    }

    /// Looks up a stage by name.
    #[must_use]
    pub fn stage(&self, name: &str) -> Option<&StageSpec> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// Returns the stage names in execution order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name.as_str()).collect()
    }

    /// Total number of actions.
    #[must_use]
    pub fn action_count(&self) -> usize {
        self.stages.iter().map(|s| s.actions.len()).sum()
    }
}

impl StageSpec {
    /// Groups the actions by run order, ascending.
    #[must_use]
    pub fn run_order_groups(&self) -> Vec<RunOrderGroup<'_>> {
        let mut groups: BTreeMap<u32, Vec<&ActionSpec>> = BTreeMap::new();
        for action in &self.actions {
            groups.entry(action.run_order).or_default().push(action);
        }
        groups
            .into_iter()
            .map(|(run_order, actions)| RunOrderGroup { run_order, actions })
            .collect()
    }
}
