//! Pure-function request/response validation. Deterministic, no I/O — the
//! caller is responsible for logging and for turning a denial into an
//! HTTP response.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Agent capability row, as read from `agents` (the columns the kernel
/// actually needs, not the whole table).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentCaps {
    pub name: String,
    pub token_scope: String,
    pub allowed_models: Option<Vec<String>>,
    pub allow_streaming: bool,
    pub allow_tools: bool,
    pub allowed_tool_names: Option<Vec<String>>,
    pub allow_function_calling: bool,
    pub allow_vision: bool,
    pub max_input_tokens: Option<i64>,
    pub max_output_tokens: Option<i64>,
    pub max_tokens_per_request: Option<i64>,
    pub strict_mode: bool,
}

/// `None` means allowed; `Some(reason)` means denied.
pub type KernelVerdict = Option<String>;

fn messages_text(payload: &Value) -> String {
    payload
        .get("messages")
        .and_then(Value::as_array)
        .map(|messages| {
            messages
                .iter()
                .map(|m| match m.get("content") {
                    Some(Value::String(s)) => s.clone(),
                    Some(other) => other.to_string(),
                    None => String::new(),
                })
                .collect::<String>()
        })
        .unwrap_or_default()
}

/// Pre-flight request validation — the Rust equivalent of
/// `validate_request` in the original daemon's policy kernel.
pub fn validate_request(caps: &AgentCaps, payload: &Value, model_name: &str) -> KernelVerdict {
    if let Some(allowed) = &caps.allowed_models {
        if !allowed.is_empty() && !allowed.iter().any(|m| m == model_name) {
            return Some(format!(
                "Model '{model_name}' not in allowed models: {allowed:?}"
            ));
        }
    }

    let streaming = payload.get("stream").and_then(Value::as_bool).unwrap_or(false);
    if streaming && !caps.allow_streaming {
        return Some("Streaming is disabled for this agent".to_string());
    }

    let tools = payload.get("tools").and_then(Value::as_array);
    if let Some(tools) = tools {
        if !tools.is_empty() {
            if !caps.allow_tools {
                return Some("Tool usage is disabled for this agent".to_string());
            }
            if let Some(allowed_names) = &caps.allowed_tool_names {
                if !allowed_names.is_empty() {
                    for tool in tools {
                        let tool_name = tool
                            .get("function")
                            .and_then(|f| f.get("name"))
                            .and_then(Value::as_str)
                            .unwrap_or("");
                        if !tool_name.is_empty() && !allowed_names.iter().any(|n| n == tool_name) {
                            return Some(format!(
                                "Tool '{tool_name}' not in allowed tools: {allowed_names:?}"
                            ));
                        }
                    }
                }
            }
        }
    }

    if payload.get("tool_choice").is_some_and(|v| !v.is_null()) && !caps.allow_function_calling {
        return Some("Function calling is disabled for this agent".to_string());
    }

    if !caps.allow_vision {
        if let Some(messages) = payload.get("messages").and_then(Value::as_array) {
            for msg in messages {
                if let Some(parts) = msg.get("content").and_then(Value::as_array) {
                    for part in parts {
                        if part.get("type").and_then(Value::as_str) == Some("image_url") {
                            return Some("Vision (image inputs) is disabled for this agent".to_string());
                        }
                    }
                }
            }
        }
    }

    if let Some(max_input) = caps.max_input_tokens {
        let est_tokens = (messages_text(payload).len() / 4) as i64;
        if est_tokens > max_input {
            return Some(format!(
                "Estimated input tokens ({est_tokens}) exceeds agent limit ({max_input})"
            ));
        }
    }

    if let Some(max_output) = caps.max_output_tokens {
        if let Some(req_max_out) = payload.get("max_tokens").and_then(Value::as_i64) {
            if req_max_out > 0 && req_max_out > max_output {
                return Some(format!(
                    "Requested max_tokens ({req_max_out}) exceeds agent limit ({max_output})"
                ));
            }
        }
    }

    if let Some(max_total) = caps.max_tokens_per_request {
        let est_input_tokens = (messages_text(payload).len() / 4) as i64;
        let req_out = payload.get("max_tokens").and_then(Value::as_i64).unwrap_or(0);
        let est_total = est_input_tokens + req_out;
        if est_total > max_total {
            return Some(format!(
                "Estimated total tokens ({est_total}) exceeds agent per-request limit ({max_total})"
            ));
        }
    }

    if caps.strict_mode {
        if streaming && !caps.allow_streaming {
            return Some("Strict mode: streaming not explicitly allowed".to_string());
        }
        if tools.is_some_and(|t| !t.is_empty()) && !caps.allow_tools {
            return Some("Strict mode: tools not explicitly allowed".to_string());
        }
    }

    None
}

/// Post-flight response validation.
pub fn validate_response(caps: &AgentCaps, response: &Value) -> KernelVerdict {
    if let Some(max_output) = caps.max_output_tokens {
        let actual_output = response
            .get("usage")
            .and_then(|u| u.get("completion_tokens"))
            .and_then(Value::as_i64)
            .unwrap_or(0);
        if actual_output > max_output {
            return Some(format!(
                "Response output tokens ({actual_output}) exceeded agent limit ({max_output})"
            ));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn caps() -> AgentCaps {
        AgentCaps {
            allow_streaming: true,
            allow_tools: true,
            allow_function_calling: true,
            ..Default::default()
        }
    }

    #[test]
    fn denies_model_not_in_allowlist() {
        let mut c = caps();
        c.allowed_models = Some(vec!["gpt-4o".to_string()]);
        let verdict = validate_request(&c, &json!({}), "gpt-3.5-turbo");
        assert!(verdict.unwrap().contains("not in allowed models"));
    }

    #[test]
    fn allows_model_in_allowlist() {
        let mut c = caps();
        c.allowed_models = Some(vec!["gpt-4o".to_string()]);
        assert!(validate_request(&c, &json!({}), "gpt-4o").is_none());
    }

    #[test]
    fn denies_streaming_when_disabled() {
        let mut c = caps();
        c.allow_streaming = false;
        let verdict = validate_request(&c, &json!({"stream": true}), "gpt-4o");
        assert_eq!(verdict.unwrap(), "Streaming is disabled for this agent");
    }

    #[test]
    fn denies_vision_by_default() {
        let c = caps();
        let payload = json!({
            "messages": [{"role": "user", "content": [{"type": "image_url", "image_url": {"url": "x"}}]}]
        });
        assert!(validate_request(&c, &payload, "gpt-4o").unwrap().contains("Vision"));
    }

    #[test]
    fn denies_over_input_token_budget() {
        let mut c = caps();
        c.max_input_tokens = Some(2);
        let payload = json!({"messages": [{"role": "user", "content": "a very long message body"}]});
        assert!(validate_request(&c, &payload, "gpt-4o").unwrap().contains("Estimated input tokens"));
    }

    #[test]
    fn response_kernel_flags_overrun_output() {
        let mut c = caps();
        c.max_output_tokens = Some(10);
        let response = json!({"usage": {"completion_tokens": 50}});
        assert!(validate_response(&c, &response).unwrap().contains("Response output tokens"));
    }
}
