//! Error-driven request rectification
//!
//! Some upstreams reject Anthropic request features the client relies on:
//! thinking blocks signed by a different vendor, thinking budgets below the
//! vendor minimum, or tool_use blocks whose tool_result never arrived.
//! Rather than surfacing those errors, the gateway mutates a copy of the
//! request per the matching rule and retries once.
//!
//! Three rules, each with a detector over the upstream error message and a
//! mutator over the request body:
//! - `ThinkingSignature`: strip thinking blocks and stray signatures
//! - `ThinkingBudget`: raise `thinking.budget_tokens` to the vendor floor
//! - `ToolResultPairing`: synthesize `tool_result` blocks for orphaned calls
//!
//! Mutators report whether anything changed; an unchanged body means the
//! retry would replay the same error and the caller surfaces the original.

pub mod detect;
pub mod mutate;

pub use detect::{Rule, extract_error_message};
pub use mutate::apply;

use serde::{Deserialize, Serialize};

/// Feature switches, persisted under the `rectifier_config` key.
///
/// Everything defaults on; the master switch gates all rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RectifierConfig {
    pub enabled: bool,
    pub request_thinking_signature: bool,
    pub request_thinking_budget: bool,
    pub request_tool_use_concurrency: bool,
}

impl Default for RectifierConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            request_thinking_signature: true,
            request_thinking_budget: true,
            request_tool_use_concurrency: true,
        }
    }
}

impl RectifierConfig {
    /// Whether `rule` may run under this configuration.
    pub fn allows(&self, rule: Rule) -> bool {
        self.enabled
            && match rule {
                Rule::ThinkingSignature => self.request_thinking_signature,
                Rule::ThinkingBudget => self.request_thinking_budget,
                Rule::ToolResultPairing => self.request_tool_use_concurrency,
            }
    }
}
