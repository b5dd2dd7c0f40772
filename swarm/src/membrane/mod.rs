//! The context membrane: a prompt planner for strict token budgets.
//!
//! Under a strict budget, packing the whole history truncates arbitrarily
//! and corrupts semantics. The membrane instead makes a principled choice
//! each turn: it exposes only a just-in-time slice of the tool catalog,
//! and replaces oversized message content with resolvable pointers. When
//! the envelope still does not fit, it pointerizes more aggressively —
//! never brute truncation.

mod pointer;
mod tools;

pub use pointer::{ContentPointer, PointerTable};
pub use tools::{ADD_TOOLS, LOAD_TOOL_SCHEMA, MEMBRANE_TOOL_NAMES, REMOVE_TOOLS, RESOLVE_POINTER};

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::error::Result;
use crate::message::MemoryMessage;
use crate::schema::ToolSchema;
use crate::tool::Tool;

// Rough chars-per-token estimate shared with the memory layer.
const CHARS_PER_TOKEN: usize = 4;
// Pointerization never shrinks its threshold below this.
const MIN_POINTER_THRESHOLD: usize = 64;

/// Membrane heuristics and budget.
#[derive(Debug, Clone)]
pub struct MembraneConfig {
    /// Prompt budget in tokens.
    pub token_budget: usize,
    /// Minimum catalog size that triggers JIT tool loading.
    pub jit_min_tool_count: usize,
    /// How many catalog tools to expose when JIT is active.
    pub default_jit_load_count: usize,
    /// Content above this many bytes is pointerized.
    pub pointer_threshold_bytes: usize,
    /// Length of pointer preview text, in characters.
    pub pointer_summary_max_chars: usize,
}

impl Default for MembraneConfig {
    fn default() -> Self {
        Self {
            token_budget: 4096,
            jit_min_tool_count: 10,
            default_jit_load_count: 6,
            pointer_threshold_bytes: 1024,
            pointer_summary_max_chars: 120,
        }
    }
}

impl MembraneConfig {
    /// A strict 4 KiB profile.
    #[must_use]
    pub fn strict_4k() -> Self {
        Self::default()
    }

    /// Set the token budget.
    #[must_use]
    pub const fn with_token_budget(mut self, tokens: usize) -> Self {
        self.token_budget = tokens;
        self
    }

    /// Set the pointerization threshold in bytes.
    #[must_use]
    pub const fn with_pointer_threshold(mut self, bytes: usize) -> Self {
        self.pointer_threshold_bytes = bytes;
        self
    }
}

/// What the planner sees each turn.
#[derive(Debug, Clone, Copy)]
pub struct PlanRequest<'a> {
    /// The agent's instructions.
    pub instructions: &'a str,
    /// The current user input.
    pub input: &'a str,
    /// Session messages so far.
    pub history: &'a [MemoryMessage],
    /// The full tool catalog.
    pub catalog: &'a [ToolSchema],
}

/// The planner's decision for one turn.
#[derive(Debug, Clone)]
pub struct PromptPlan {
    /// The rendered prompt.
    pub prompt: String,
    /// Tool schemas to expose, sorted by name, unique.
    pub exposed: Vec<ToolSchema>,
    /// How many messages were pointerized.
    pub pointerized: usize,
}

/// A prompt planner. The engine falls back to a naive prompt when a
/// planner fails; a planner error must never crash the run.
pub trait PromptPlanner: Send + Sync {
    /// Plan the next turn's prompt and exposed tools.
    ///
    /// # Errors
    ///
    /// Planner-specific; any error triggers the engine's fallback path.
    fn plan(&self, request: &PlanRequest<'_>) -> Result<PromptPlan>;

    /// The planner's internal tools, exposed on every planned turn.
    fn internal_tools(&self) -> Vec<Arc<dyn Tool>> {
        Vec::new()
    }

    /// Observe that the model invoked `name` this session.
    fn note_tool_used(&self, name: &str) {
        let _ = name;
    }
}

#[derive(Debug, Default)]
struct MembraneState {
    pointers: PointerTable,
    used: Mutex<BTreeSet<String>>,
    additions: Mutex<BTreeSet<String>>,
    removals: Mutex<BTreeSet<String>>,
    catalog: Mutex<Vec<ToolSchema>>,
}

impl MembraneState {
    fn locked<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
        m.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// The default membrane implementation.
#[derive(Debug, Clone)]
pub struct ContextMembrane {
    config: MembraneConfig,
    state: Arc<MembraneState>,
}

impl Default for ContextMembrane {
    fn default() -> Self {
        Self::new(MembraneConfig::default())
    }
}

impl ContextMembrane {
    /// Create a membrane with the given configuration.
    #[must_use]
    pub fn new(config: MembraneConfig) -> Self {
        Self {
            config,
            state: Arc::new(MembraneState::default()),
        }
    }

    /// The membrane's configuration.
    #[must_use]
    pub const fn config(&self) -> &MembraneConfig {
        &self.config
    }

    /// Resolve a pointer produced by this membrane's planner.
    #[must_use]
    pub fn resolve_pointer(&self, pointer_id: &str) -> Option<String> {
        self.state.pointers.resolve(pointer_id)
    }

    fn select_tools(&self, catalog: &[ToolSchema], input: &str) -> Vec<ToolSchema> {
        let used = MembraneState::locked(&self.state.used).clone();
        let additions = MembraneState::locked(&self.state.additions).clone();
        let removals = MembraneState::locked(&self.state.removals).clone();

        let mut selected: Vec<&ToolSchema> = Vec::new();
        let mut selected_names: BTreeSet<&str> = BTreeSet::new();
        let budget = self.config.default_jit_load_count;

        // Pass 1: tools the model already used this session, plus
        // model-directed additions.
        for schema in catalog {
            if selected.len() >= budget {
                break;
            }
            if removals.contains(&schema.name) {
                continue;
            }
            if used.contains(&schema.name) || additions.contains(&schema.name) {
                if selected_names.insert(&schema.name) {
                    selected.push(schema);
                }
            }
        }

        // Pass 2: tools whose names textually match the input.
        let input_lower = input.to_lowercase();
        for schema in catalog {
            if selected.len() >= budget {
                break;
            }
            if removals.contains(&schema.name) || selected_names.contains(schema.name.as_str()) {
                continue;
            }
            if name_matches_input(&schema.name, &input_lower) {
                selected_names.insert(&schema.name);
                selected.push(schema);
            }
        }

        // Pass 3: alphabetic fill.
        for schema in catalog {
            if selected.len() >= budget {
                break;
            }
            if removals.contains(&schema.name) || selected_names.contains(schema.name.as_str()) {
                continue;
            }
            selected_names.insert(&schema.name);
            selected.push(schema);
        }

        selected.into_iter().cloned().collect()
    }

    fn render(
        &self,
        request: &PlanRequest<'_>,
        threshold: usize,
    ) -> (String, usize) {
        let mut pointerized = 0;
        let mut lines = Vec::with_capacity(request.history.len());
        for message in request.history {
            if message.content.len() > threshold {
                let pointer = self
                    .state
                    .pointers
                    .intern(&message.content, self.config.pointer_summary_max_chars);
                pointerized += 1;
                lines.push(format!(
                    "{}: [pointer {}: \"{}\" ({} bytes; call resolve_pointer to read)]",
                    message.role, pointer.pointer_id, pointer.preview, pointer.size
                ));
            } else {
                lines.push(format!("{}: {}", message.role, message.content));
            }
        }

        let mut prompt = String::new();
        if !request.instructions.is_empty() {
            prompt.push_str(request.instructions);
            prompt.push_str("\n\n");
        }
        if !lines.is_empty() {
            prompt.push_str(&lines.join("\n"));
            prompt.push_str("\n\n");
        }
        prompt.push_str("user: ");
        prompt.push_str(request.input);
        (prompt, pointerized)
    }
}

impl PromptPlanner for ContextMembrane {
    fn plan(&self, request: &PlanRequest<'_>) -> Result<PromptPlan> {
        let mut catalog = request.catalog.to_vec();
        catalog.sort_by(|a, b| a.name.as_bytes().cmp(b.name.as_bytes()));
        *MembraneState::locked(&self.state.catalog) = catalog.clone();

        let jit_active = catalog.len() >= self.config.jit_min_tool_count;
        let mut exposed = if jit_active {
            self.select_tools(&catalog, request.input)
        } else {
            catalog
        };

        // Fit the envelope by pointerizing progressively more content.
        let char_budget = self.config.token_budget.saturating_mul(CHARS_PER_TOKEN);
        let mut threshold = self.config.pointer_threshold_bytes;
        let (mut prompt, mut pointerized) = self.render(request, threshold);
        while prompt.len() > char_budget && threshold > MIN_POINTER_THRESHOLD {
            threshold = (threshold / 2).max(MIN_POINTER_THRESHOLD);
            debug!(threshold, "prompt over budget, pointerizing more aggressively");
            let rendered = self.render(request, threshold);
            prompt = rendered.0;
            pointerized = rendered.1;
        }

        // The internal tools ride along whenever the membrane is doing
        // work the model may need to undo: a JIT-narrowed catalog, or
        // pointerized content.
        if jit_active || pointerized > 0 {
            exposed.extend(tools::internal_schemas());
        }
        exposed.sort_by(|a, b| a.name.as_bytes().cmp(b.name.as_bytes()));
        exposed.dedup_by(|a, b| a.name == b.name);

        Ok(PromptPlan {
            prompt,
            exposed,
            pointerized,
        })
    }

    fn internal_tools(&self) -> Vec<Arc<dyn Tool>> {
        tools::internal_tools(&self.state)
    }

    fn note_tool_used(&self, name: &str) {
        MembraneState::locked(&self.state.used).insert(name.to_owned());
    }
}

fn name_matches_input(name: &str, input_lower: &str) -> bool {
    let name_lower = name.to_lowercase();
    if input_lower.contains(&name_lower) {
        return true;
    }
    name_lower
        .split('_')
        .filter(|part| part.len() >= 3)
        .any(|part| input_lower.contains(part))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog(n: usize) -> Vec<ToolSchema> {
        (0..n)
            .map(|i| ToolSchema::new(format!("tool_{i:02}"), format!("Tool number {i}")))
            .collect()
    }

    fn request<'a>(
        input: &'a str,
        history: &'a [MemoryMessage],
        catalog: &'a [ToolSchema],
    ) -> PlanRequest<'a> {
        PlanRequest {
            instructions: "You are a helpful assistant.",
            input,
            history,
            catalog,
        }
    }

    #[test]
    fn small_catalogs_skip_jit() {
        let membrane = ContextMembrane::default();
        let tools = catalog(4);
        let plan = membrane
            .plan(&request("hi", &[], &tools))
            .expect("plan");
        assert_eq!(plan.exposed.len(), 4);
        assert!(!plan.exposed.iter().any(|t| t.name == LOAD_TOOL_SCHEMA));
    }

    #[test]
    fn large_catalogs_expose_a_jit_slice_plus_internal_tools() {
        let membrane = ContextMembrane::default();
        let tools = catalog(30);
        let plan = membrane
            .plan(&request("hi", &[], &tools))
            .expect("plan");
        assert!(plan.exposed.len() < 30);
        assert_eq!(plan.exposed.len(), 6 + MEMBRANE_TOOL_NAMES.len());
        for name in MEMBRANE_TOOL_NAMES {
            assert!(plan.exposed.iter().any(|t| t.name == *name), "missing {name}");
        }
        let names: Vec<&str> = plan.exposed.iter().map(|t| t.name.as_str()).collect();
        let mut sorted = names.clone();
        sorted.sort_unstable();
        assert_eq!(names, sorted, "exposed tools must be sorted by name");
    }

    #[test]
    fn used_tools_are_preferred() {
        let membrane = ContextMembrane::default();
        let tools = catalog(30);
        membrane.note_tool_used("tool_25");
        let plan = membrane
            .plan(&request("hi", &[], &tools))
            .expect("plan");
        assert!(plan.exposed.iter().any(|t| t.name == "tool_25"));
    }

    #[test]
    fn input_matching_tools_are_preferred() {
        let membrane = ContextMembrane::default();
        let mut tools = catalog(29);
        tools.push(ToolSchema::new("weather_lookup", "Look up the weather."));
        let plan = membrane
            .plan(&request("what's the weather in Paris?", &[], &tools))
            .expect("plan");
        assert!(plan.exposed.iter().any(|t| t.name == "weather_lookup"));
    }

    #[test]
    fn boundary_pointerization_is_strict() {
        let config = MembraneConfig::default().with_pointer_threshold(1024);
        let membrane = ContextMembrane::new(config);
        let at_threshold = MemoryMessage::user("a".repeat(1024));
        let over_threshold = MemoryMessage::user("b".repeat(1025));
        let history = [at_threshold, over_threshold];
        let tools = catalog(2);
        let plan = membrane
            .plan(&request("hi", &history, &tools))
            .expect("plan");
        assert_eq!(plan.pointerized, 1);
        assert!(plan.prompt.contains(&"a".repeat(1024)));
        assert!(!plan.prompt.contains(&"b".repeat(1025)));
    }

    #[test]
    fn over_budget_prompts_pointerize_harder_not_truncate() {
        let config = MembraneConfig::default().with_token_budget(256);
        let membrane = ContextMembrane::new(config);
        let history: Vec<MemoryMessage> = (0..20)
            .map(|i| MemoryMessage::user(format!("{i}: {}", "long context ".repeat(40))))
            .collect();
        let tools = catalog(30);
        let plan = membrane
            .plan(&request("summarize", &history, &tools))
            .expect("plan");
        assert!(!plan.prompt.contains("[... context truncated for strict4k budget ...]"));
        assert!(plan.pointerized > 0);
    }

    #[test]
    fn pointers_resolve_to_original_content() {
        let membrane = ContextMembrane::default();
        let big = "payload ".repeat(500);
        let history = [MemoryMessage::user(big.clone())];
        let tools = catalog(1);
        let plan = membrane
            .plan(&request("hi", &history, &tools))
            .expect("plan");
        assert_eq!(plan.pointerized, 1);
        assert_eq!(membrane.resolve_pointer("ptr-1").expect("interned"), big);
    }
}
