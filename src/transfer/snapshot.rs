//! Workflow snapshot stored in `transfers_tb.workflow_snapshot`
//!
//! Older snapshots missing fields still load; every field has a default.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    BeforeSending,
    Sending,
    AfterSending,
}

impl Stage {
    pub const ORDER: [Stage; 3] = [Stage::BeforeSending, Stage::Sending, Stage::AfterSending];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::BeforeSending => "before_sending",
            Stage::Sending => "sending",
            Stage::AfterSending => "after_sending",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepId {
    ValidateRequest,
    SelectInputs,
    EstimateFee,
    EstimateResources,
    DelegateResources,
    BuildAndSign,
    Broadcast,
    WaitMempool,
    WaitFirstConfirmation,
    WaitConfirmations,
    ReclaimResources,
    NotifySuccess,
}

impl StepId {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepId::ValidateRequest => "validate_request",
            StepId::SelectInputs => "select_inputs",
            StepId::EstimateFee => "estimate_fee",
            StepId::EstimateResources => "estimate_resources",
            StepId::DelegateResources => "delegate_resources",
            StepId::BuildAndSign => "build_and_sign",
            StepId::Broadcast => "broadcast",
            StepId::WaitMempool => "wait_mempool",
            StepId::WaitFirstConfirmation => "wait_first_confirmation",
            StepId::WaitConfirmations => "wait_confirmations",
            StepId::ReclaimResources => "reclaim_resources",
            StepId::NotifySuccess => "notify_success",
        }
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub stage: Stage,
    pub name: StepId,
    #[serde(default)]
    pub state: StepState,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowSnapshot {
    /// Index into `Stage::ORDER`
    pub stage: usize,
    /// Index of the next step to run inside the current stage
    pub step: usize,
    pub steps: Vec<StepRecord>,
    pub failed: bool,
    pub error: Option<String>,
}

impl WorkflowSnapshot {
    pub fn current_stage(&self) -> Option<Stage> {
        Stage::ORDER.get(self.stage).copied()
    }

    pub fn is_finished(&self) -> bool {
        self.stage >= Stage::ORDER.len()
    }

    pub fn record(&self, name: StepId) -> Option<&StepRecord> {
        self.steps.iter().find(|r| r.name == name)
    }

    /// Record for `name`, appended on first use
    pub fn record_mut(&mut self, stage: Stage, name: StepId) -> &mut StepRecord {
        let idx = match self.steps.iter().position(|r| r.name == name) {
            Some(idx) => idx,
            None => {
                self.steps.push(StepRecord {
                    stage,
                    name,
                    state: StepState::Pending,
                    error: None,
                    attempts: 0,
                    started_at: None,
                    finished_at: None,
                });
                self.steps.len() - 1
            }
        };
        &mut self.steps[idx]
    }

    pub fn advance_step(&mut self) {
        self.step += 1;
    }

    pub fn advance_stage(&mut self) {
        self.stage += 1;
        self.step = 0;
    }

    /// Name of the step the workflow is on, or the last one it ran
    pub fn current_step_name(&self) -> String {
        self.steps
            .iter()
            .rev()
            .find(|r| r.state != StepState::Completed)
            .or_else(|| self.steps.last())
            .map(|r| r.name.as_str().to_string())
            .unwrap_or_default()
    }
}
