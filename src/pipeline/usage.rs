//! Pipeline usage accounting
//!
//! Token counts accumulate per stage; the credit cost charged to the
//! caller equals the number of inference stages actually executed, capped
//! at the merge pipeline's maximum of three. USD cost is a linear function
//! of input/output token counts at fixed per-token rates.

use serde::Serialize;

use crate::inference::TokenUsage;

/// Per-token USD rates used for the informational cost breakdown.
const INPUT_TOKEN_RATE_USD: f64 = 2.5e-6;
const OUTPUT_TOKEN_RATE_USD: f64 = 10.0e-6;

/// Maximum credits one pipeline run can cost.
pub const MAX_CREDIT_COST: u32 = 3;

/// The inference stages the service runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum StageKind {
    DuplicateSearch,
    MergeDecision,
    FieldMerge,
    Clean,
    Purge,
}

/// Usage for one executed stage.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageUsage {
    pub stage: StageKind,
    pub tokens: TokenUsage,
    pub cost_usd: f64,
}

/// Usage accumulated over however many stages actually ran.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineUsage {
    pub stages: Vec<StageUsage>,
}

impl PipelineUsage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completed inference stage.
    pub fn record(&mut self, stage: StageKind, tokens: TokenUsage) {
        let cost_usd = tokens.input_tokens as f64 * INPUT_TOKEN_RATE_USD
            + tokens.output_tokens as f64 * OUTPUT_TOKEN_RATE_USD;
        self.stages.push(StageUsage {
            stage,
            tokens,
            cost_usd,
        });
    }

    /// One credit per stage executed, capped at [`MAX_CREDIT_COST`].
    pub fn credit_cost(&self) -> u32 {
        (self.stages.len() as u32).min(MAX_CREDIT_COST)
    }

    pub fn total_tokens(&self) -> TokenUsage {
        let mut total = TokenUsage::default();
        for stage in &self.stages {
            total += stage.tokens;
        }
        total
    }

    pub fn total_cost_usd(&self) -> f64 {
        self.stages.iter().map(|s| s.cost_usd).sum()
    }
}
