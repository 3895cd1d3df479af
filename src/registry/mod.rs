//! Model registry - static capability map for the upstream catalog
//!
//! The registry is built once at startup and read-only afterwards. It answers
//! three questions for the rest of the pipeline:
//!
//! 1. What does a user-facing model id resolve to? (alias resolution)
//! 2. What are the model's thinking-budget bounds, if any?
//! 3. What shows up in `/v1/models` and `/admin/models`?

use serde::Serialize;
use std::collections::HashMap;

/// Model id used when a request omits the `model` field entirely.
pub const DEFAULT_MODEL: &str = "gemini-3-pro-preview";

/// Thinking-budget capability block for a single model.
///
/// `default_budget` is what gets injected when the client supplies no budget
/// at all; the flash-class models run with a much smaller default than the
/// pro-class ones.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ThinkingCaps {
    pub min: i64,
    pub max: i64,
    pub zero_allowed: bool,
    pub dynamic_allowed: bool,
    pub default_budget: i64,
}

/// Static descriptor for one upstream model.
#[derive(Debug, Clone, Serialize)]
pub struct ModelDescriptor {
    pub id: String,
    pub display_name: String,
    pub owned_by: String,
    pub max_output_tokens: Option<i64>,
    pub thinking: Option<ThinkingCaps>,
}

impl ModelDescriptor {
    /// Claude-family models need the stricter schema dialect on tool
    /// declarations (see the Anthropic request converter).
    pub fn is_claude_family(&self) -> bool {
        self.id.starts_with("claude")
    }
}

/// Registry of model descriptors plus an alias table.
#[derive(Debug)]
pub struct ModelRegistry {
    models: HashMap<String, ModelDescriptor>,
    aliases: HashMap<String, String>,
    /// Catalog order for listing endpoints.
    order: Vec<String>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            models: HashMap::new(),
            aliases: HashMap::new(),
            order: Vec::new(),
        };

        registry.insert(ModelDescriptor {
            id: "gemini-3-pro-preview".to_string(),
            display_name: "Gemini 3 Pro".to_string(),
            owned_by: "google".to_string(),
            max_output_tokens: Some(65536),
            thinking: Some(ThinkingCaps {
                min: 128,
                max: 32768,
                zero_allowed: false,
                dynamic_allowed: true,
                default_budget: 24576,
            }),
        });
        registry.insert(ModelDescriptor {
            id: "gemini-3-flash".to_string(),
            display_name: "Gemini 3 Flash".to_string(),
            owned_by: "google".to_string(),
            max_output_tokens: Some(65536),
            thinking: Some(ThinkingCaps {
                min: 0,
                max: 24576,
                zero_allowed: true,
                dynamic_allowed: true,
                default_budget: 512,
            }),
        });
        registry.insert(ModelDescriptor {
            id: "gemini-2.5-pro".to_string(),
            display_name: "Gemini 2.5 Pro".to_string(),
            owned_by: "google".to_string(),
            max_output_tokens: Some(65536),
            thinking: Some(ThinkingCaps {
                min: 128,
                max: 32768,
                zero_allowed: false,
                dynamic_allowed: true,
                default_budget: 24576,
            }),
        });
        registry.insert(ModelDescriptor {
            id: "gemini-2.5-flash".to_string(),
            display_name: "Gemini 2.5 Flash".to_string(),
            owned_by: "google".to_string(),
            max_output_tokens: Some(65536),
            thinking: Some(ThinkingCaps {
                min: 0,
                max: 24576,
                zero_allowed: true,
                dynamic_allowed: true,
                default_budget: 512,
            }),
        });
        registry.insert(ModelDescriptor {
            id: "claude-sonnet-4-5".to_string(),
            display_name: "Claude Sonnet 4.5".to_string(),
            owned_by: "anthropic".to_string(),
            max_output_tokens: Some(64000),
            thinking: Some(ThinkingCaps {
                min: 1024,
                max: 32000,
                zero_allowed: true,
                dynamic_allowed: false,
                default_budget: 24576,
            }),
        });
        registry.insert(ModelDescriptor {
            id: "claude-opus-4-5".to_string(),
            display_name: "Claude Opus 4.5".to_string(),
            owned_by: "anthropic".to_string(),
            max_output_tokens: Some(64000),
            thinking: Some(ThinkingCaps {
                min: 1024,
                max: 32000,
                zero_allowed: true,
                dynamic_allowed: false,
                default_budget: 24576,
            }),
        });

        // User-facing shorthands onto catalog ids
        registry.alias("gemini-3-pro", "gemini-3-pro-preview");
        registry.alias("gemini-3-flash-preview", "gemini-3-flash");
        registry.alias("claude-sonnet-4.5", "claude-sonnet-4-5");
        registry.alias("claude-opus-4.5", "claude-opus-4-5");

        registry
    }

    fn insert(&mut self, descriptor: ModelDescriptor) {
        self.order.push(descriptor.id.clone());
        self.models.insert(descriptor.id.clone(), descriptor);
    }

    fn alias(&mut self, from: &str, to: &str) {
        self.aliases.insert(from.to_string(), to.to_string());
    }

    /// Resolve a user-facing id to the upstream catalog id.
    ///
    /// Unknown ids pass through unchanged - the upstream is the authority on
    /// what exists, the registry only resolves the names it knows.
    pub fn resolve<'a>(&'a self, model: &'a str) -> &'a str {
        if self.models.contains_key(model) {
            return model;
        }
        self.aliases.get(model).map(String::as_str).unwrap_or(model)
    }

    /// Look up the descriptor for a (possibly aliased) model id.
    pub fn descriptor(&self, model: &str) -> Option<&ModelDescriptor> {
        self.models.get(self.resolve(model))
    }

    /// Whether the resolved model emits Claude-family output.
    pub fn is_claude_family(&self, model: &str) -> bool {
        self.descriptor(model)
            .map(ModelDescriptor::is_claude_family)
            .unwrap_or_else(|| self.resolve(model).starts_with("claude"))
    }

    /// All descriptors in catalog order.
    pub fn list(&self) -> Vec<&ModelDescriptor> {
        self.order
            .iter()
            .filter_map(|id| self.models.get(id))
            .collect()
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new()
    }
}
