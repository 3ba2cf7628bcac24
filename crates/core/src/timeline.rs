//! Search-plan trace for expert (pro search) answers.
//!
//! Entries move `Default -> Current -> Done` and never move back. Between plan
//! announcement and completion exactly one entry is `Current`, every entry before it
//! is `Done` and every entry after it is `Default`.

use serde::{Deserialize, Serialize};
use snafu::ensure;

use crate::error::{EngineResult, StepOutOfRangeSnafu};
use crate::message::{SourceRecord, null_as_default};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    #[default]
    Default,
    Current,
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepTimelineEntry {
    #[serde(rename = "step_number")]
    pub index: usize,
    #[serde(rename = "step")]
    pub description: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub queries: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub results: Vec<SourceRecord>,
    #[serde(default)]
    pub status: StepStatus,
}

impl StepTimelineEntry {
    fn pending(index: usize, description: String) -> Self {
        Self {
            index,
            description,
            queries: Vec::new(),
            results: Vec::new(),
            status: StepStatus::Default,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StepTimeline {
    #[serde(rename = "steps_details", default)]
    entries: Vec<StepTimelineEntry>,
}

impl StepTimeline {
    /// Starts a fresh timeline from an announced plan; step 0 becomes current.
    pub fn announce<I, S>(steps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut entries = steps
            .into_iter()
            .enumerate()
            .map(|(index, step)| StepTimelineEntry::pending(index, step.into()))
            .collect::<Vec<_>>();

        if let Some(first) = entries.first_mut() {
            first.status = StepStatus::Current;
        }

        Self { entries }
    }

    pub fn entries(&self) -> &[StepTimelineEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn current_step(&self) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| entry.status == StepStatus::Current)
    }

    pub fn is_complete(&self) -> bool {
        self.entries
            .iter()
            .all(|entry| entry.status == StepStatus::Done)
    }

    /// Records the search queries for `step` and advances the plan to it.
    ///
    /// Earlier entries are forced to `Done`. When a later entry has already moved
    /// past `Default` the step is late, so it lands on `Done` instead of `Current`.
    pub fn record_queries(&mut self, step: usize, queries: Vec<String>) -> EngineResult<()> {
        self.ensure_step(step, "record-step-queries")?;

        for entry in &mut self.entries[..step] {
            entry.status = StepStatus::Done;
        }

        let overtaken = self.entries[step + 1..]
            .iter()
            .any(|entry| entry.status != StepStatus::Default);

        let entry = &mut self.entries[step];
        entry.queries = queries;
        if overtaken {
            entry.status = StepStatus::Done;
        } else if entry.status != StepStatus::Done {
            entry.status = StepStatus::Current;
        }

        Ok(())
    }

    /// Records the results read for `step`; status is left untouched.
    pub fn record_results(&mut self, step: usize, results: Vec<SourceRecord>) -> EngineResult<()> {
        self.ensure_step(step, "record-step-results")?;
        self.entries[step].results = results;
        Ok(())
    }

    /// Marks every entry `Done`, used once answer text starts streaming.
    pub fn complete_all(&mut self) {
        for entry in &mut self.entries {
            entry.status = StepStatus::Done;
        }
    }

    fn ensure_step(&self, step: usize, stage: &'static str) -> EngineResult<()> {
        ensure!(
            step < self.entries.len(),
            StepOutOfRangeSnafu {
                stage,
                step,
                len: self.entries.len(),
            }
        );
        Ok(())
    }
}
