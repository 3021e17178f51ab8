//! OpenAI Chat Completions response → Anthropic Messages response

use serde_json::{Value, json};

use crate::map_finish_reason;

/// Translate a non-streaming OpenAI response into the Anthropic Messages
/// response shape.
pub fn openai_to_anthropic(resp: &Value) -> Value {
    let choice = resp
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|c| c.first())
        .cloned()
        .unwrap_or(Value::Null);
    let message = choice.get("message").cloned().unwrap_or(Value::Null);

    let mut content: Vec<Value> = Vec::new();

    if let Some(text) = message.get("content").and_then(Value::as_str) {
        if !text.is_empty() {
            content.push(json!({"type": "text", "text": text}));
        }
    }

    for call in message
        .get("tool_calls")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
    {
        let function = call.get("function").cloned().unwrap_or(Value::Null);
        let arguments = function
            .get("arguments")
            .and_then(Value::as_str)
            .unwrap_or("");
        // On malformed arguments keep the raw string so nothing is lost
        let input = serde_json::from_str::<Value>(arguments)
            .unwrap_or_else(|_| Value::String(arguments.to_string()));
        content.push(json!({
            "type": "tool_use",
            "id": call.get("id").and_then(Value::as_str).unwrap_or(""),
            "name": function.get("name").and_then(Value::as_str).unwrap_or(""),
            "input": input,
        }));
    }

    if content.is_empty() {
        content.push(json!({"type": "text", "text": ""}));
    }

    let finish_reason = choice.get("finish_reason").and_then(Value::as_str);
    let usage = resp.get("usage").cloned().unwrap_or(Value::Null);

    json!({
        "id": resp.get("id").and_then(Value::as_str).unwrap_or("msg_converted"),
        "type": "message",
        "role": "assistant",
        "model": resp.get("model").and_then(Value::as_str).unwrap_or(""),
        "content": content,
        "stop_reason": map_finish_reason(finish_reason),
        "stop_sequence": Value::Null,
        "usage": {
            "input_tokens": usage.get("prompt_tokens").and_then(Value::as_u64).unwrap_or(0),
            "output_tokens": usage.get("completion_tokens").and_then(Value::as_u64).unwrap_or(0),
        },
    })
}
