//! Engine limits.

use serde::{Deserialize, Serialize};

/// Budgets shared by settling, previews and execution.
///
/// Every field has a default, so a config file only lists what it overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Instructions one run may execute before it fails with a budget diagnostic.
    pub step_budget: u64,
    pub max_call_depth: usize,
    /// Nodes one `settle` may process before giving up.
    pub settle_limit: usize,
    /// Step budget for folding pure operators while the graph settles.
    pub preview_budget: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            step_budget: 1_000_000,
            max_call_depth: 256,
            settle_limit: 100_000,
            preview_budget: 10_000,
        }
    }
}
