//! Usage-field parsing, tolerant of the several shapes OpenAI-compatible
//! providers use, plus the token-to-micro cost conversion applied at
//! settlement.

use r2e_router::ModelConfig;
use serde_json::Value;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
}

/// Parse a response's `usage` object, accepting `prompt_tokens|input_tokens`
/// and `completion_tokens|output_tokens`, and deriving whichever side is
/// missing from `total_tokens` when present.
pub fn parse_usage(body: &Value) -> Usage {
    let Some(usage) = body.get("usage") else {
        return Usage::default();
    };

    let prompt = usage
        .get("prompt_tokens")
        .or_else(|| usage.get("input_tokens"))
        .and_then(Value::as_i64);
    let completion = usage
        .get("completion_tokens")
        .or_else(|| usage.get("output_tokens"))
        .and_then(Value::as_i64);
    let total = usage.get("total_tokens").and_then(Value::as_i64);

    let (prompt_tokens, completion_tokens) = match (prompt, completion) {
        (Some(p), Some(c)) => (p, c),
        (Some(p), None) => (p, total.map(|t| (t - p).max(0)).unwrap_or(0)),
        (None, Some(c)) => (total.map(|t| (t - c).max(0)).unwrap_or(0), c),
        (None, None) => (total.unwrap_or(0), 0),
    };

    Usage {
        prompt_tokens,
        completion_tokens,
    }
}

pub fn actual_cost_micro(usage: Usage, model: &ModelConfig) -> i64 {
    usage.prompt_tokens * model.pricing.input_micro + usage.completion_tokens * model.pricing.output_micro
}

/// Fallback token estimate for streaming deltas that carry no `usage`,
/// matching the `max(1, len/4)` heuristic used throughout admission.
pub fn estimate_tokens_from_text(text: &str) -> i64 {
    if text.is_empty() {
        0
    } else {
        std::cmp::max(1, (text.len() / 4) as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use r2e_router::{ModelCapabilities, ModelLimits, ModelPricing};
    use serde_json::json;

    fn model() -> ModelConfig {
        ModelConfig {
            provider: "openai".to_string(),
            provider_model: "gpt-4o".to_string(),
            pricing: ModelPricing {
                input_micro: 50,
                output_micro: 100,
            },
            limits: ModelLimits { max_tokens: 4096 },
            capabilities: ModelCapabilities::default(),
        }
    }

    #[test]
    fn parses_standard_chat_usage() {
        let body = json!({"usage": {"prompt_tokens": 5, "completion_tokens": 20}});
        let usage = parse_usage(&body);
        assert_eq!(usage, Usage { prompt_tokens: 5, completion_tokens: 20 });
    }

    #[test]
    fn parses_responses_shape_with_total() {
        let body = json!({"usage": {"input_tokens": 5, "total_tokens": 25}});
        let usage = parse_usage(&body);
        assert_eq!(usage.prompt_tokens, 5);
        assert_eq!(usage.completion_tokens, 20);
    }

    #[test]
    fn missing_usage_is_zero() {
        assert_eq!(parse_usage(&json!({})), Usage::default());
    }

    #[test]
    fn cost_matches_scenario_from_spec() {
        let usage = Usage { prompt_tokens: 5, completion_tokens: 20 };
        assert_eq!(actual_cost_micro(usage, &model()), 5 * 50 + 20 * 100);
    }

    #[test]
    fn estimate_floors_nonempty_text_at_one_token() {
        assert_eq!(estimate_tokens_from_text("x"), 1);
        assert_eq!(estimate_tokens_from_text(""), 0);
    }
}
