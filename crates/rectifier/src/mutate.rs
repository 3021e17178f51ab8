//! Request mutators
//!
//! Each mutator edits the body in place and reports whether anything
//! actually changed. The caller deep-copies the body first; the original is
//! kept for other rules and for surfacing the error unmodified.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Value, json};
use tracing::debug;

use crate::detect::Rule;

/// Synthetic tool_result text for orphaned tool calls.
const INTERRUPTED_RESULT_TEXT: &str =
    "Tool execution was interrupted before a result was recorded.";

/// Thinking budget floor most vendors enforce, with headroom.
const RAISED_BUDGET_TOKENS: u64 = 32_000;
const RAISED_MAX_TOKENS: u64 = 64_000;

/// Apply `rule` to `body`. Returns true when the body changed.
pub fn apply(rule: Rule, body: &mut Value, error_message: &str) -> bool {
    let applied = match rule {
        Rule::ThinkingSignature => strip_thinking(body),
        Rule::ThinkingBudget => raise_thinking_budget(body),
        Rule::ToolResultPairing => repair_tool_results(body, error_message),
    };
    debug!(?rule, applied, "rectifier mutation");
    applied
}

/// R1: drop thinking/redacted_thinking blocks everywhere and strip stray
/// `signature` properties from the blocks that remain. Also removes a
/// top-level `thinking` request field that the conversation no longer
/// supports (last assistant turn used tools but no longer opens with a
/// thinking block).
fn strip_thinking(body: &mut Value) -> bool {
    let mut changed = false;

    if let Some(messages) = body.get_mut("messages").and_then(Value::as_array_mut) {
        for message in messages.iter_mut() {
            if let Some(blocks) = message.get_mut("content").and_then(Value::as_array_mut) {
                changed |= strip_blocks(blocks);
            }
        }
    }
    if let Some(system) = body.get_mut("system").and_then(Value::as_array_mut) {
        changed |= strip_blocks(system);
    }

    if should_remove_thinking_field(body) {
        if let Some(object) = body.as_object_mut() {
            object.remove("thinking");
            changed = true;
        }
    }

    changed
}

fn is_thinking_block(block: &Value) -> bool {
    matches!(
        block.get("type").and_then(Value::as_str),
        Some("thinking") | Some("redacted_thinking")
    )
}

fn strip_blocks(blocks: &mut Vec<Value>) -> bool {
    let before = blocks.len();
    blocks.retain(|block| !is_thinking_block(block));
    let mut changed = blocks.len() != before;

    for block in blocks.iter_mut() {
        if let Some(object) = block.as_object_mut() {
            if object.remove("signature").is_some() {
                changed = true;
            }
        }
    }
    changed
}

/// The `thinking` request field only stays valid when the last assistant
/// turn still opens with a thinking block; once that turn carries bare
/// tool_use blocks, vendors reject the combination.
fn should_remove_thinking_field(body: &Value) -> bool {
    if body
        .get("thinking")
        .and_then(|t| t.get("type"))
        .and_then(Value::as_str)
        != Some("enabled")
    {
        return false;
    }

    let Some(last_assistant) = body
        .get("messages")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter(|m| m.get("role").and_then(Value::as_str) == Some("assistant"))
        .next_back()
    else {
        return false;
    };
    let Some(blocks) = last_assistant.get("content").and_then(Value::as_array) else {
        return false;
    };

    let opens_with_thinking = blocks.first().is_some_and(is_thinking_block);
    let has_tool_use = blocks
        .iter()
        .any(|b| b.get("type").and_then(Value::as_str) == Some("tool_use"));

    !opens_with_thinking && has_tool_use
}

/// R2: raise the thinking budget to the accepted floor. Adaptive thinking is
/// left alone. Returns false when the body already satisfies the floor.
fn raise_thinking_budget(body: &mut Value) -> bool {
    if body
        .get("thinking")
        .and_then(|t| t.get("type"))
        .and_then(Value::as_str)
        == Some("adaptive")
    {
        return false;
    }
    let Some(object) = body.as_object_mut() else {
        return false;
    };

    let mut changed = false;

    let desired = json!({"type": "enabled", "budget_tokens": RAISED_BUDGET_TOKENS});
    if object.get("thinking") != Some(&desired) {
        object.insert("thinking".to_string(), desired);
        changed = true;
    }

    match object.get("max_tokens").and_then(Value::as_u64) {
        Some(max_tokens) if max_tokens > RAISED_BUDGET_TOKENS => {}
        _ => {
            object.insert("max_tokens".to_string(), json!(RAISED_MAX_TOKENS));
            changed = true;
        }
    }

    changed
}

/// R3: pair every orphaned tool_use with a synthetic errored tool_result in
/// the following user message, inserting one when the conversation lacks it.
fn repair_tool_results(body: &mut Value, error_message: &str) -> bool {
    let orphan_ids = parse_orphan_ids(error_message);
    if orphan_ids.is_empty() {
        return false;
    }
    let Some(messages) = body.get_mut("messages").and_then(Value::as_array_mut) else {
        return false;
    };

    let mut changed = false;
    let mut i = 0;
    while i < messages.len() {
        let missing = missing_ids_at(messages, i, &orphan_ids);
        if !missing.is_empty() {
            let results: Vec<Value> = missing
                .iter()
                .map(|id| {
                    json!({
                        "type": "tool_result",
                        "tool_use_id": id,
                        "is_error": true,
                        "content": INTERRUPTED_RESULT_TEXT,
                    })
                })
                .collect();

            let next_is_user = messages
                .get(i + 1)
                .is_some_and(|m| m.get("role").and_then(Value::as_str) == Some("user"));

            if next_is_user {
                prepend_results(&mut messages[i + 1], results);
            } else {
                messages.insert(i + 1, json!({"role": "user", "content": results}));
            }
            changed = true;
        }
        i += 1;
    }
    changed
}

/// Orphaned tool_use ids in the assistant message at `index` that the next
/// message does not already answer.
fn missing_ids_at(messages: &[Value], index: usize, orphan_ids: &[String]) -> Vec<String> {
    let message = &messages[index];
    if message.get("role").and_then(Value::as_str) != Some("assistant") {
        return Vec::new();
    }

    let present: Vec<String> = message
        .get("content")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter(|b| b.get("type").and_then(Value::as_str) == Some("tool_use"))
        .filter_map(|b| b.get("id").and_then(Value::as_str))
        .filter(|id| orphan_ids.iter().any(|o| o == id))
        .map(String::from)
        .collect();
    if present.is_empty() {
        return Vec::new();
    }

    let satisfied: HashSet<&str> = messages
        .get(index + 1)
        .and_then(|m| m.get("content"))
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter(|b| b.get("type").and_then(Value::as_str) == Some("tool_result"))
        .filter_map(|b| b.get("tool_use_id").and_then(Value::as_str))
        .collect();

    present
        .into_iter()
        .filter(|id| !satisfied.contains(id.as_str()))
        .collect()
}

fn prepend_results(message: &mut Value, results: Vec<Value>) {
    let Some(object) = message.as_object_mut() else {
        return;
    };
    let mut blocks = results;
    match object.get("content") {
        Some(Value::Array(existing)) => blocks.extend(existing.iter().cloned()),
        Some(Value::String(text)) => blocks.push(json!({"type": "text", "text": text})),
        _ => {}
    }
    object.insert("content".to_string(), Value::Array(blocks));
}

/// Pull orphaned ids out of the vendor phrase
/// ``…without `tool_result` blocks immediately after: id_1, id_2.``
fn parse_orphan_ids(error_message: &str) -> Vec<String> {
    static ID_LIST: OnceLock<Regex> = OnceLock::new();
    let pattern = ID_LIST
        .get_or_init(|| Regex::new(r"(?i)immediately after:\s*([^.]+)").expect("valid regex"));

    pattern
        .captures(error_message)
        .and_then(|captures| captures.get(1))
        .map(|list| {
            list.as_str()
                .split(',')
                .map(|id| id.trim().trim_matches('`').to_string())
                .filter(|id| !id.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    // --- R1 -------------------------------------------------------------

    #[test]
    fn strips_thinking_blocks_and_signatures() {
        let mut body = json!({
            "messages": [
                {"role": "assistant", "content": [
                    {"type": "thinking", "thinking": "hmm", "signature": "sig1"},
                    {"type": "redacted_thinking", "data": "…"},
                    {"type": "text", "text": "Hi", "signature": "sig2"},
                ]},
            ],
            "system": [
                {"type": "text", "text": "sys", "signature": "sig3"},
            ],
        });
        assert!(apply(Rule::ThinkingSignature, &mut body, ""));

        let blocks = body["messages"][0]["content"].as_array().unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0]["type"], "text");
        assert!(blocks[0].get("signature").is_none());
        assert!(body["system"][0].get("signature").is_none());
    }

    #[test]
    fn removes_thinking_field_for_bare_tool_use_turn() {
        let mut body = json!({
            "thinking": {"type": "enabled", "budget_tokens": 2048},
            "messages": [
                {"role": "user", "content": "go"},
                {"role": "assistant", "content": [
                    {"type": "tool_use", "id": "c1", "name": "f", "input": {}},
                ]},
            ],
        });
        assert!(apply(Rule::ThinkingSignature, &mut body, ""));
        assert!(body.get("thinking").is_none());
    }

    #[test]
    fn keeps_thinking_field_for_tool_free_conversation() {
        let mut body = json!({
            "thinking": {"type": "enabled", "budget_tokens": 2048},
            "messages": [
                {"role": "assistant", "content": [
                    {"type": "text", "text": "plain answer"},
                ]},
            ],
        });
        assert!(!apply(Rule::ThinkingSignature, &mut body, ""));
        assert!(body.get("thinking").is_some());
    }

    #[test]
    fn unchanged_body_reports_not_applied() {
        let mut body = json!({
            "messages": [{"role": "user", "content": "Hi"}],
        });
        assert!(!apply(Rule::ThinkingSignature, &mut body, ""));
    }

    // --- R2 -------------------------------------------------------------

    #[test]
    fn raises_budget_and_max_tokens() {
        let mut body = json!({
            "thinking": {"type": "enabled", "budget_tokens": 512},
            "max_tokens": 1024,
            "messages": [],
        });
        assert!(apply(Rule::ThinkingBudget, &mut body, ""));
        assert_eq!(body["thinking"]["budget_tokens"], 32000);
        assert_eq!(body["max_tokens"], 64000);
    }

    #[test]
    fn adds_thinking_when_absent() {
        let mut body = json!({"messages": []});
        assert!(apply(Rule::ThinkingBudget, &mut body, ""));
        assert_eq!(
            body["thinking"],
            json!({"type": "enabled", "budget_tokens": 32000})
        );
        assert_eq!(body["max_tokens"], 64000);
    }

    #[test]
    fn adaptive_thinking_is_untouched() {
        let mut body = json!({
            "thinking": {"type": "adaptive"},
            "max_tokens": 100,
            "messages": [],
        });
        assert!(!apply(Rule::ThinkingBudget, &mut body, ""));
        assert_eq!(body["thinking"], json!({"type": "adaptive"}));
        assert_eq!(body["max_tokens"], 100);
    }

    #[test]
    fn satisfied_budget_reports_not_applied() {
        let mut body = json!({
            "thinking": {"type": "enabled", "budget_tokens": 32000},
            "max_tokens": 64000,
            "messages": [],
        });
        assert!(!apply(Rule::ThinkingBudget, &mut body, ""));
    }

    #[test]
    fn large_existing_max_tokens_is_kept() {
        let mut body = json!({
            "thinking": {"type": "enabled", "budget_tokens": 512},
            "max_tokens": 100000,
            "messages": [],
        });
        assert!(apply(Rule::ThinkingBudget, &mut body, ""));
        assert_eq!(body["max_tokens"], 100000);
    }

    // --- R3 -------------------------------------------------------------

    const ORPHAN_ERROR: &str = "messages.2: `tool_use` ids were found without \
        `tool_result` blocks immediately after: call_1, call_2.";

    #[test]
    fn parses_orphan_ids_from_message() {
        assert_eq!(parse_orphan_ids(ORPHAN_ERROR), vec!["call_1", "call_2"]);
        assert!(parse_orphan_ids("no ids here").is_empty());
    }

    #[test]
    fn prepends_results_to_next_user_message() {
        let mut body = json!({
            "messages": [
                {"role": "assistant", "content": [
                    {"type": "tool_use", "id": "call_1", "name": "f", "input": {}},
                ]},
                {"role": "user", "content": [
                    {"type": "text", "text": "continue"},
                ]},
            ],
        });
        assert!(apply(Rule::ToolResultPairing, &mut body, ORPHAN_ERROR));

        let blocks = body["messages"][1]["content"].as_array().unwrap();
        assert_eq!(blocks[0]["type"], "tool_result");
        assert_eq!(blocks[0]["tool_use_id"], "call_1");
        assert_eq!(blocks[0]["is_error"], true);
        assert_eq!(blocks[1]["type"], "text");
    }

    #[test]
    fn inserts_user_message_when_none_follows() {
        let mut body = json!({
            "messages": [
                {"role": "assistant", "content": [
                    {"type": "tool_use", "id": "call_2", "name": "f", "input": {}},
                ]},
            ],
        });
        assert!(apply(Rule::ToolResultPairing, &mut body, ORPHAN_ERROR));

        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1]["role"], "user");
        assert_eq!(messages[1]["content"][0]["tool_use_id"], "call_2");
    }

    #[test]
    fn string_user_content_is_coerced_to_blocks() {
        let mut body = json!({
            "messages": [
                {"role": "assistant", "content": [
                    {"type": "tool_use", "id": "call_1", "name": "f", "input": {}},
                ]},
                {"role": "user", "content": "keep going"},
            ],
        });
        assert!(apply(Rule::ToolResultPairing, &mut body, ORPHAN_ERROR));
        let blocks = body["messages"][1]["content"].as_array().unwrap();
        assert_eq!(blocks[0]["type"], "tool_result");
        assert_eq!(blocks[1], json!({"type": "text", "text": "keep going"}));
    }

    #[test]
    fn satisfied_ids_are_skipped() {
        let mut body = json!({
            "messages": [
                {"role": "assistant", "content": [
                    {"type": "tool_use", "id": "call_1", "name": "f", "input": {}},
                ]},
                {"role": "user", "content": [
                    {"type": "tool_result", "tool_use_id": "call_1", "content": "done"},
                ]},
            ],
        });
        assert!(!apply(Rule::ToolResultPairing, &mut body, ORPHAN_ERROR));
    }

    #[test]
    fn unrelated_assistant_messages_are_untouched() {
        let mut body = json!({
            "messages": [
                {"role": "assistant", "content": [
                    {"type": "tool_use", "id": "other_call", "name": "f", "input": {}},
                ]},
            ],
        });
        assert!(!apply(Rule::ToolResultPairing, &mut body, ORPHAN_ERROR));
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
    }
}
