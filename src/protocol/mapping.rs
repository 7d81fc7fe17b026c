use super::anthropic::AnthropicToolChoice;
use super::openai_chat::{OpenAiToolChoice, OpenAiToolChoiceFunction, OpenAiToolChoiceFunctionCall};

pub const STOP_END_TURN: &str = "end_turn";
pub const STOP_MAX_TOKENS: &str = "max_tokens";
pub const STOP_TOOL_USE: &str = "tool_use";

/// Backend finish reason that marks the end of tool-call emission.
pub const FINISH_TOOL_CALLS: &str = "tool_calls";

// ---------------------------------------------------------------------------
// Stop reason mappings
// ---------------------------------------------------------------------------

#[must_use]
pub fn openai_finish_to_anthropic_stop(finish_reason: &str) -> &'static str {
    match finish_reason {
        "length" => STOP_MAX_TOKENS,
        FINISH_TOOL_CALLS => STOP_TOOL_USE,
        // content_filter has no Anthropic counterpart
        _ => STOP_END_TURN,
    }
}

// ---------------------------------------------------------------------------
// Request-side mappings
// ---------------------------------------------------------------------------

/// Thinking budget to `reasoning_effort`; `None` when thinking is off.
#[must_use]
pub fn thinking_budget_to_effort(budget_tokens: u64) -> Option<&'static str> {
    match budget_tokens {
        0 => None,
        1..=3_999 => Some("low"),
        32_000.. => Some("high"),
        _ => Some("medium"),
    }
}

#[must_use]
pub fn anthropic_tool_choice_to_openai(choice: &AnthropicToolChoice) -> OpenAiToolChoice {
    match choice.type_.as_str() {
        "none" => OpenAiToolChoice::Mode("none".to_string()),
        "any" => OpenAiToolChoice::Mode("required".to_string()),
        "tool" => OpenAiToolChoice::Function(OpenAiToolChoiceFunctionCall {
            type_: "function".to_string(),
            function: OpenAiToolChoiceFunction {
                name: choice.name.clone().unwrap_or_default(),
            },
        }),
        _ => OpenAiToolChoice::Mode("auto".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finish_reason_lookup() {
        assert_eq!(openai_finish_to_anthropic_stop("stop"), "end_turn");
        assert_eq!(openai_finish_to_anthropic_stop("length"), "max_tokens");
        assert_eq!(openai_finish_to_anthropic_stop("tool_calls"), "tool_use");
        assert_eq!(openai_finish_to_anthropic_stop("content_filter"), "end_turn");
        assert_eq!(openai_finish_to_anthropic_stop("weird"), "end_turn");
    }

    #[test]
    fn test_effort_thresholds() {
        assert_eq!(thinking_budget_to_effort(0), None);
        assert_eq!(thinking_budget_to_effort(1), Some("low"));
        assert_eq!(thinking_budget_to_effort(3_999), Some("low"));
        assert_eq!(thinking_budget_to_effort(4_000), Some("medium"));
        assert_eq!(thinking_budget_to_effort(31_999), Some("medium"));
        assert_eq!(thinking_budget_to_effort(32_000), Some("high"));
    }

    #[test]
    fn test_tool_choice_mapping() {
        let choice = |type_: &str, name: Option<&str>| AnthropicToolChoice {
            type_: type_.to_string(),
            name: name.map(str::to_string),
        };
        assert_eq!(
            anthropic_tool_choice_to_openai(&choice("any", None)),
            OpenAiToolChoice::Mode("required".into())
        );
        assert_eq!(
            anthropic_tool_choice_to_openai(&choice("none", None)),
            OpenAiToolChoice::Mode("none".into())
        );
        assert_eq!(
            anthropic_tool_choice_to_openai(&choice("unknown", None)),
            OpenAiToolChoice::Mode("auto".into())
        );
        let tool = anthropic_tool_choice_to_openai(&choice("tool", Some("lookup")));
        assert_eq!(
            serde_json::to_value(tool).unwrap(),
            serde_json::json!({"type": "function", "function": {"name": "lookup"}})
        );
    }
}
