//! Row repair engine
//!
//! Each row walks `raw -> auto-fixed -> {valid, needs-ai} -> {ai-fixed,
//! still-invalid}`. AI repair is only attempted when validation still fails
//! after the deterministic fixes. If the AI row does not validate either, the
//! error reported is the one raised before the AI call.

pub mod ai;
pub mod auto_fix;

pub use ai::{
    rate_limiter, repairer_from_config, AiRateLimiter, AiRepair, ChatCompletionRepairer,
    DisabledRepairer, RowRepairer,
};
pub use auto_fix::auto_fix;

use std::sync::Arc;
use tracing::debug;

use crate::error::RowError;
use crate::row::RowView;
use crate::validate::{validate, ValidationMode};

/// Repairs and validates rows
#[derive(Clone)]
pub struct RepairEngine {
    repairer: Arc<dyn RowRepairer>,
    mode: ValidationMode,
}

impl RepairEngine {
    pub fn new(repairer: Arc<dyn RowRepairer>, mode: ValidationMode) -> Self {
        Self { repairer, mode }
    }

    /// Engine without AI repair
    pub fn deterministic(mode: ValidationMode) -> Self {
        Self::new(Arc::new(DisabledRepairer), mode)
    }

    pub fn mode(&self) -> ValidationMode {
        self.mode
    }

    pub fn ai_enabled(&self) -> bool {
        self.repairer.is_enabled()
    }

    /// Auto-fix, validate, and escalate to AI repair if still invalid
    pub async fn repair_and_validate(
        &self,
        mut row: RowView,
        columns: &[String],
    ) -> Result<RowView, RowError> {
        if row.is_blank() {
            return Err(RowError::EmptyRow);
        }

        auto_fix(&mut row);

        let error = match validate(row.clone(), self.mode) {
            Ok(valid) => return Ok(valid),
            Err(error) => error,
        };

        if !self.repairer.is_enabled() {
            return Err(error);
        }

        let Some(repair) = self.repairer.repair(&row, error.detail(), columns).await else {
            return Err(error);
        };

        let mut candidate = repair.row;
        candidate.extend_fixes(repair.fixes);

        match validate(candidate, self.mode) {
            Ok(valid) => Ok(valid),
            Err(retry_error) => {
                debug!(
                    row_index = row.index(),
                    original = %error,
                    after_ai = %retry_error,
                    "AI repair did not produce a valid row"
                );
                Err(error)
            }
        }
    }
}

impl std::fmt::Debug for RepairEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepairEngine")
            .field("mode", &self.mode)
            .field("ai_enabled", &self.ai_enabled())
            .finish()
    }
}
