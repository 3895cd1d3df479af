//! Reasoning-budget mapping, default injection, and clamping
//!
//! Both client dialects express "how much should the model think" differently:
//! OpenAI uses a named `reasoning_effort`, Anthropic a numeric
//! `thinking.budget_tokens`. The upstream wants a single
//! `generationConfig.thinkingConfig.thinkingBudget` integer, bounded per model.
//!
//! The pipeline is the same for both dialects:
//!
//! 1. Map the client directive to a raw budget (or nothing).
//! 2. If the model can think and no budget was supplied, inject the model's
//!    default.
//! 3. Clamp against `maxOutputTokens` and the descriptor's `[min, max]`.
//! 4. If the clamp lands below `min`, strip the thinking config entirely.

use serde_json::{json, Value};

use crate::registry::ModelDescriptor;

/// Sentinel meaning "upstream decides how much to think".
pub const DYNAMIC_BUDGET: i64 = -1;

/// Map an OpenAI `reasoning_effort` directive to a raw thinking budget.
///
/// Unknown efforts return `None` so the default-injection path takes over.
pub fn effort_to_budget(effort: &str) -> Option<i64> {
    match effort {
        "none" => Some(0),
        "minimal" => Some(512),
        "low" => Some(1024),
        "medium" => Some(8192),
        "high" => Some(24576),
        "xhigh" => Some(32768),
        "auto" => Some(DYNAMIC_BUDGET),
        _ => None,
    }
}

/// Resolve and write the thinking configuration into an upstream envelope.
///
/// `requested` is the client's directive after dialect mapping; `None` means
/// the client said nothing and the model default applies. Models without a
/// thinking block never get a config, whatever the client asked for.
pub fn apply_thinking(envelope: &mut Value, requested: Option<i64>, descriptor: Option<&ModelDescriptor>) {
    const THINKING_PTR: &str = "/request/generationConfig/thinkingConfig";

    let caps = match descriptor.and_then(|d| d.thinking) {
        Some(caps) => caps,
        None => {
            super::delete(envelope, THINKING_PTR);
            return;
        }
    };

    // A zero directive only sticks when the model actually supports a zero
    // budget; otherwise it is discarded and the default applies.
    let requested = match requested {
        Some(0) if caps.zero_allowed => {
            super::set(envelope, THINKING_PTR, json!({ "thinkingBudget": 0 }));
            return;
        }
        Some(0) => None,
        other => other,
    };

    let budget = match requested {
        Some(DYNAMIC_BUDGET) if caps.dynamic_allowed => {
            super::set(
                envelope,
                THINKING_PTR,
                json!({ "thinkingBudget": DYNAMIC_BUDGET, "include_thoughts": true }),
            );
            return;
        }
        Some(DYNAMIC_BUDGET) | None => caps.default_budget,
        Some(budget) => budget,
    };

    // Clamp: strictly below maxOutputTokens when present, then into [min, max]
    let max_output = super::get(envelope, "/request/generationConfig/maxOutputTokens")
        .and_then(Value::as_i64);
    let mut budget = budget;
    if let Some(max_output) = max_output {
        budget = budget.min(max_output - 1);
    }
    budget = budget.min(caps.max);

    if budget < caps.min {
        super::delete(envelope, THINKING_PTR);
        return;
    }

    super::set(
        envelope,
        THINKING_PTR,
        json!({ "thinkingBudget": budget, "include_thoughts": true }),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ModelRegistry;

    fn envelope() -> Value {
        crate::translate::empty_envelope("test")
    }

    fn budget_of(envelope: &Value) -> Option<i64> {
        envelope
            .pointer("/request/generationConfig/thinkingConfig/thinkingBudget")
            .and_then(Value::as_i64)
    }

    #[test]
    fn test_effort_table() {
        assert_eq!(effort_to_budget("none"), Some(0));
        assert_eq!(effort_to_budget("minimal"), Some(512));
        assert_eq!(effort_to_budget("low"), Some(1024));
        assert_eq!(effort_to_budget("medium"), Some(8192));
        assert_eq!(effort_to_budget("high"), Some(24576));
        assert_eq!(effort_to_budget("xhigh"), Some(32768));
        assert_eq!(effort_to_budget("auto"), Some(DYNAMIC_BUDGET));
        assert_eq!(effort_to_budget("frantic"), None);
    }

    #[test]
    fn test_medium_effort_lands_inside_span() {
        let registry = ModelRegistry::new();
        let descriptor = registry.descriptor("gemini-3-pro-preview");
        let mut env = envelope();
        apply_thinking(&mut env, effort_to_budget("medium"), descriptor);
        assert_eq!(budget_of(&env), Some(8192));
    }

    #[test]
    fn test_default_injection_for_flash() {
        let registry = ModelRegistry::new();
        let descriptor = registry.descriptor("gemini-3-flash");
        let mut env = envelope();
        apply_thinking(&mut env, None, descriptor);
        assert_eq!(budget_of(&env), Some(512));
    }

    #[test]
    fn test_below_min_strips_config() {
        let registry = ModelRegistry::new();
        // claude descriptors carry min=1024
        let descriptor = registry.descriptor("claude-sonnet-4-5");
        let mut env = envelope();
        apply_thinking(&mut env, Some(512), descriptor);
        assert!(env
            .pointer("/request/generationConfig/thinkingConfig")
            .is_none());
    }

    #[test]
    fn test_budget_strictly_below_max_output() {
        let registry = ModelRegistry::new();
        let descriptor = registry.descriptor("gemini-3-pro-preview");
        let mut env = envelope();
        crate::translate::set(
            &mut env,
            "/request/generationConfig/maxOutputTokens",
            json!(8192),
        );
        apply_thinking(&mut env, Some(24576), descriptor);
        assert_eq!(budget_of(&env), Some(8191));
    }

    #[test]
    fn test_zero_effort_needs_zero_capable_model() {
        let registry = ModelRegistry::new();

        // Flash allows a zero budget: thinking is disabled outright
        let mut env = envelope();
        apply_thinking(&mut env, Some(0), registry.descriptor("gemini-3-flash"));
        assert_eq!(budget_of(&env), Some(0));

        // Pro does not: the directive is discarded, default injection wins
        let mut env = envelope();
        apply_thinking(&mut env, Some(0), registry.descriptor("gemini-3-pro-preview"));
        assert_eq!(budget_of(&env), Some(24576));
    }

    #[test]
    fn test_dynamic_budget_gated_by_descriptor() {
        let registry = ModelRegistry::new();

        let mut env = envelope();
        apply_thinking(&mut env, Some(-1), registry.descriptor("gemini-3-pro-preview"));
        assert_eq!(budget_of(&env), Some(-1));

        // claude models do not take a dynamic budget; fall back to default
        let mut env = envelope();
        apply_thinking(&mut env, Some(-1), registry.descriptor("claude-sonnet-4-5"));
        assert_eq!(budget_of(&env), Some(24576));
    }

    #[test]
    fn test_no_thinking_model_never_configured() {
        let mut env = envelope();
        apply_thinking(&mut env, Some(8192), None);
        assert!(env
            .pointer("/request/generationConfig/thinkingConfig")
            .is_none());
    }
}
