//! Error-message detectors
//!
//! Upstream error texts vary by vendor, so detection is substring/token
//! based rather than exact matching. All comparisons fold to lowercase.

use serde_json::Value;

/// The three rectification rules, in application order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    ThinkingSignature,
    ThinkingBudget,
    ToolResultPairing,
}

impl Rule {
    /// Application order for the per-attempt loop.
    pub const ALL: [Rule; 3] = [
        Rule::ThinkingSignature,
        Rule::ThinkingBudget,
        Rule::ToolResultPairing,
    ];

    /// Whether `message` looks like the error this rule repairs.
    pub fn detects(&self, message: &str) -> bool {
        let m = message.to_lowercase();
        match self {
            Rule::ThinkingSignature => detects_thinking_signature(&m),
            Rule::ThinkingBudget => detects_thinking_budget(&m),
            Rule::ToolResultPairing => {
                m.contains("tool_use") && m.contains("without") && m.contains("tool_result")
            }
        }
    }
}

fn detects_thinking_signature(m: &str) -> bool {
    let mentions_thinking = m.contains("thinking") || m.contains("redacted_thinking");

    (m.contains("invalid")
        && m.contains("signature")
        && m.contains("thinking")
        && m.contains("block"))
        || m.contains("must start with a thinking block")
        || (m.contains("expected") && mentions_thinking && m.contains("found") && m.contains("tool_use"))
        || (m.contains("signature") && m.contains("field required"))
        || (m.contains("signature") && m.contains("extra inputs are not permitted"))
        || (mentions_thinking && m.contains("cannot be modified"))
        // Vendor catch-alls that in practice mean a rejected thinking block
        || m.contains("illegal request")
        || m.contains("invalid request")
        || m.contains("非法请求")
}

/// The 1024-token floor is phrased differently across vendors.
const BUDGET_FLOOR_PHRASES: &[&str] = &[
    "greater than or equal to 1024",
    "at least 1024",
    ">= 1024",
    "≥ 1024",
    "minimum of 1024",
    "minimum 1024",
    "no less than 1024",
];

fn detects_thinking_budget(m: &str) -> bool {
    m.contains("thinking")
        && m.contains("budget")
        && BUDGET_FLOOR_PHRASES.iter().any(|p| m.contains(p))
}

/// Pull a human-readable message out of an upstream error body.
///
/// Tries `error.message`, then top-level `message`, then `error.type`, and
/// falls back to the raw text.
pub fn extract_error_message(body: &str) -> String {
    if let Ok(json) = serde_json::from_str::<Value>(body) {
        if let Some(message) = json
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(Value::as_str)
        {
            return message.to_string();
        }
        if let Some(message) = json.get("message").and_then(Value::as_str) {
            return message.to_string();
        }
        if let Some(kind) = json
            .get("error")
            .and_then(|e| e.get("type"))
            .and_then(Value::as_str)
        {
            return kind.to_string();
        }
    }
    body.to_string()
}
