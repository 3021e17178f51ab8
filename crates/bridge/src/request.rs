//! Anthropic Messages request → OpenAI Chat Completions request

use serde_json::{Map, Value, json};

use crate::schema::normalize_for_gemini;

/// Translate an Anthropic Messages body into an OpenAI Chat Completions body.
///
/// Carries `model`, `max_tokens`, `temperature`, `top_p`, and `stream`;
/// renames `stop_sequences` to `stop`; drops `top_k` and `metadata` along
/// with any Anthropic-only field. When `clean_schemas` is set, tool
/// parameter schemas are run through the Gemini normalizer.
pub fn anthropic_to_openai(body: &Value, clean_schemas: bool) -> Value {
    let mut out = Map::new();

    for key in ["model", "max_tokens", "temperature", "top_p", "stream"] {
        if let Some(v) = body.get(key) {
            out.insert(key.to_string(), v.clone());
        }
    }
    if let Some(stop) = body.get("stop_sequences") {
        out.insert("stop".to_string(), stop.clone());
    }

    out.insert(
        "messages".to_string(),
        Value::Array(convert_messages(body)),
    );

    if let Some(tools) = body.get("tools").and_then(Value::as_array) {
        let converted: Vec<Value> = tools
            .iter()
            .map(|t| convert_tool(t, clean_schemas))
            .collect();
        if !converted.is_empty() {
            out.insert("tools".to_string(), Value::Array(converted));
        }
    }

    if let Some(choice) = body.get("tool_choice") {
        if let Some(converted) = convert_tool_choice(choice) {
            out.insert("tool_choice".to_string(), converted);
        }
    }

    if body.get("stream").and_then(Value::as_bool) == Some(true) {
        out.insert(
            "stream_options".to_string(),
            json!({"include_usage": true}),
        );
    }

    Value::Object(out)
}

fn convert_messages(body: &Value) -> Vec<Value> {
    let mut messages = Vec::new();

    if let Some(system) = body.get("system") {
        if let Some(text) = system_text(system) {
            messages.push(json!({"role": "system", "content": text}));
        }
    }

    for message in body
        .get("messages")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
    {
        let role = message.get("role").and_then(Value::as_str).unwrap_or("");
        let content = message.get("content");
        match (role, content) {
            ("user", Some(Value::Array(blocks))) => convert_user_blocks(blocks, &mut messages),
            ("assistant", Some(Value::Array(blocks))) => {
                messages.push(convert_assistant_blocks(blocks));
            }
            (_, Some(Value::String(text))) => {
                messages.push(json!({"role": role, "content": text}));
            }
            _ => {
                // Unknown shape: forward as-is rather than drop a turn
                messages.push(message.clone());
            }
        }
    }

    messages
}

/// A top-level `system` may be a plain string or an array of content blocks;
/// blocks are joined into one text.
fn system_text(system: &Value) -> Option<String> {
    match system {
        Value::String(s) => Some(s.clone()),
        Value::Array(blocks) => {
            let joined = blocks
                .iter()
                .filter_map(|b| b.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("\n");
            if joined.is_empty() { None } else { Some(joined) }
        }
        _ => None,
    }
}

/// Split a user message: each `tool_result` becomes a `role:"tool"` message
/// at its original position; textual blocks join into one trailing
/// `role:"user"` message.
fn convert_user_blocks(blocks: &[Value], messages: &mut Vec<Value>) {
    let mut texts: Vec<&str> = Vec::new();

    for block in blocks {
        match block.get("type").and_then(Value::as_str) {
            Some("tool_result") => {
                let id = block
                    .get("tool_use_id")
                    .and_then(Value::as_str)
                    .unwrap_or("");
                messages.push(json!({
                    "role": "tool",
                    "tool_call_id": id,
                    "content": tool_result_text(block.get("content")),
                }));
            }
            Some("text") => {
                if let Some(text) = block.get("text").and_then(Value::as_str) {
                    texts.push(text);
                }
            }
            _ => {}
        }
    }

    if !texts.is_empty() {
        messages.push(json!({"role": "user", "content": texts.join("\n")}));
    }
}

/// A tool_result `content` may be a string, an array of blocks, or absent.
fn tool_result_text(content: Option<&Value>) -> String {
    match content {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(blocks)) => blocks
            .iter()
            .filter_map(|b| b.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

fn convert_assistant_blocks(blocks: &[Value]) -> Value {
    let mut texts: Vec<&str> = Vec::new();
    let mut tool_calls: Vec<Value> = Vec::new();

    for block in blocks {
        match block.get("type").and_then(Value::as_str) {
            Some("text") => {
                if let Some(text) = block.get("text").and_then(Value::as_str) {
                    texts.push(text);
                }
            }
            Some("tool_use") => {
                let arguments = block
                    .get("input")
                    .map(|i| i.to_string())
                    .unwrap_or_else(|| "{}".to_string());
                tool_calls.push(json!({
                    "id": block.get("id").and_then(Value::as_str).unwrap_or(""),
                    "type": "function",
                    "function": {
                        "name": block.get("name").and_then(Value::as_str).unwrap_or(""),
                        "arguments": arguments,
                    },
                }));
            }
            _ => {}
        }
    }

    let mut message = Map::new();
    message.insert("role".to_string(), json!("assistant"));
    message.insert(
        "content".to_string(),
        if texts.is_empty() {
            Value::Null
        } else {
            Value::String(texts.join("\n"))
        },
    );
    if !tool_calls.is_empty() {
        message.insert("tool_calls".to_string(), Value::Array(tool_calls));
    }
    Value::Object(message)
}

fn convert_tool(tool: &Value, clean_schemas: bool) -> Value {
    let parameters = tool
        .get("input_schema")
        .map(|s| {
            if clean_schemas {
                normalize_for_gemini(s)
            } else {
                s.clone()
            }
        })
        .unwrap_or_else(|| json!({"type": "object"}));

    let mut function = Map::new();
    function.insert(
        "name".to_string(),
        tool.get("name").cloned().unwrap_or(Value::Null),
    );
    if let Some(description) = tool.get("description") {
        function.insert("description".to_string(), description.clone());
    }
    function.insert("parameters".to_string(), parameters);

    json!({"type": "function", "function": Value::Object(function)})
}

fn convert_tool_choice(choice: &Value) -> Option<Value> {
    match choice.get("type").and_then(Value::as_str) {
        Some("auto") => Some(json!("auto")),
        Some("any") => Some(json!("required")),
        Some("tool") => {
            let name = choice.get("name").and_then(Value::as_str)?;
            Some(json!({"type": "function", "function": {"name": name}}))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn carries_and_renames_parameters() {
        let body = json!({
            "model": "claude-sonnet-4-5-20250929",
            "max_tokens": 1024,
            "temperature": 0.5,
            "top_p": 0.9,
            "top_k": 40,
            "metadata": {"user_id": "u1"},
            "stop_sequences": ["END"],
            "messages": [{"role": "user", "content": "Hi"}],
        });
        let out = anthropic_to_openai(&body, false);

        assert_eq!(out["model"], "claude-sonnet-4-5-20250929");
        assert_eq!(out["max_tokens"], 1024);
        assert_eq!(out["temperature"], 0.5);
        assert_eq!(out["top_p"], 0.9);
        assert_eq!(out["stop"], json!(["END"]));
        assert!(out.get("top_k").is_none());
        assert!(out.get("metadata").is_none());
        assert!(out.get("stop_sequences").is_none());
        assert!(out.get("stream_options").is_none());
    }

    #[test]
    fn system_string_becomes_leading_message() {
        let body = json!({
            "system": "Be terse.",
            "messages": [{"role": "user", "content": "Hi"}],
        });
        let out = anthropic_to_openai(&body, false);
        let messages = out["messages"].as_array().unwrap();
        assert_eq!(messages[0], json!({"role": "system", "content": "Be terse."}));
        assert_eq!(messages[1], json!({"role": "user", "content": "Hi"}));
    }

    #[test]
    fn system_blocks_are_joined() {
        let body = json!({
            "system": [
                {"type": "text", "text": "Be terse."},
                {"type": "text", "text": "Answer in French."},
            ],
            "messages": [],
        });
        let out = anthropic_to_openai(&body, false);
        assert_eq!(
            out["messages"][0],
            json!({"role": "system", "content": "Be terse.\nAnswer in French."})
        );
    }

    #[test]
    fn tool_results_split_into_tool_messages() {
        let body = json!({
            "messages": [{
                "role": "user",
                "content": [
                    {"type": "tool_result", "tool_use_id": "call_1", "content": "42"},
                    {"type": "tool_result", "tool_use_id": "call_2", "content": [
                        {"type": "text", "text": "ok"},
                    ]},
                    {"type": "text", "text": "thanks"},
                ],
            }],
        });
        let out = anthropic_to_openai(&body, false);
        let messages = out["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(
            messages[0],
            json!({"role": "tool", "tool_call_id": "call_1", "content": "42"})
        );
        assert_eq!(
            messages[1],
            json!({"role": "tool", "tool_call_id": "call_2", "content": "ok"})
        );
        assert_eq!(messages[2], json!({"role": "user", "content": "thanks"}));
    }

    #[test]
    fn assistant_tool_use_becomes_tool_calls() {
        let body = json!({
            "messages": [{
                "role": "assistant",
                "content": [
                    {"type": "text", "text": "Let me check."},
                    {"type": "tool_use", "id": "call_9", "name": "get_weather",
                     "input": {"city": "Paris"}},
                ],
            }],
        });
        let out = anthropic_to_openai(&body, false);
        let message = &out["messages"][0];
        assert_eq!(message["role"], "assistant");
        assert_eq!(message["content"], "Let me check.");
        let call = &message["tool_calls"][0];
        assert_eq!(call["id"], "call_9");
        assert_eq!(call["type"], "function");
        assert_eq!(call["function"]["name"], "get_weather");
        assert_eq!(
            serde_json::from_str::<Value>(call["function"]["arguments"].as_str().unwrap()).unwrap(),
            json!({"city": "Paris"})
        );
    }

    #[test]
    fn assistant_without_text_has_null_content() {
        let body = json!({
            "messages": [{
                "role": "assistant",
                "content": [
                    {"type": "tool_use", "id": "c", "name": "f", "input": {}},
                ],
            }],
        });
        let out = anthropic_to_openai(&body, false);
        assert_eq!(out["messages"][0]["content"], Value::Null);
    }

    #[test]
    fn tools_and_tool_choice_are_mapped() {
        let body = json!({
            "messages": [],
            "tools": [{
                "name": "get_weather",
                "description": "Weather lookup",
                "input_schema": {"type": "object", "properties": {"city": {"type": "string"}}},
            }],
            "tool_choice": {"type": "any"},
        });
        let out = anthropic_to_openai(&body, false);
        let tool = &out["tools"][0];
        assert_eq!(tool["type"], "function");
        assert_eq!(tool["function"]["name"], "get_weather");
        assert_eq!(tool["function"]["description"], "Weather lookup");
        assert_eq!(tool["function"]["parameters"]["type"], "object");
        assert_eq!(out["tool_choice"], "required");
    }

    #[test]
    fn tool_choice_variants() {
        let auto = json!({"messages": [], "tool_choice": {"type": "auto"}});
        assert_eq!(anthropic_to_openai(&auto, false)["tool_choice"], "auto");

        let named = json!({"messages": [], "tool_choice": {"type": "tool", "name": "f"}});
        assert_eq!(
            anthropic_to_openai(&named, false)["tool_choice"],
            json!({"type": "function", "function": {"name": "f"}})
        );
    }

    #[test]
    fn stream_adds_usage_option() {
        let body = json!({
            "stream": true,
            "messages": [{"role": "user", "content": "Hi"}],
        });
        let out = anthropic_to_openai(&body, false);
        assert_eq!(out["stream"], true);
        assert_eq!(out["stream_options"], json!({"include_usage": true}));
    }

    #[test]
    fn gemini_flag_cleans_tool_schemas() {
        let body = json!({
            "messages": [],
            "tools": [{
                "name": "f",
                "input_schema": {
                    "type": "object",
                    "additionalProperties": false,
                    "properties": {"s": {"type": "string", "minLength": 1}},
                },
            }],
        });
        let out = anthropic_to_openai(&body, true);
        let parameters = &out["tools"][0]["function"]["parameters"];
        assert!(parameters.get("additionalProperties").is_none());
        assert!(parameters["properties"]["s"].get("minLength").is_none());
    }
}
