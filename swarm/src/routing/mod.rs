//! Routing: choosing which agent handles an input.
//!
//! A [`RoutingStrategy`] maps an input to one of a set of named routes.
//! Built-ins cover keyword matching, an LLM classifier, and a fixed
//! route for tests. The [`Supervisor`] executes the selected agent and
//! applies an interruption policy when that agent is unavailable.

mod supervisor;

pub use supervisor::{InterruptionPolicy, Supervisor};

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::provider::{InferenceOptions, InferenceProvider};

/// A routing strategy's verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteDecision {
    /// Name of the selected route.
    pub selected: String,
    /// Confidence in `[0, 1]`, when the strategy produces one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// Why this route was chosen.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

impl RouteDecision {
    /// A bare decision with no confidence or reasoning.
    #[must_use]
    pub fn new(selected: impl Into<String>) -> Self {
        Self {
            selected: selected.into(),
            confidence: None,
            reasoning: None,
        }
    }
}

/// Chooses one of `routes` for an input.
#[async_trait]
pub trait RoutingStrategy: Send + Sync {
    /// Select a route for `input`. `routes` is sorted by name.
    async fn route(&self, input: &str, routes: &[String]) -> Result<RouteDecision>;
}

/// Routes on the first matching keyword rule.
#[derive(Debug, Clone, Default)]
pub struct KeywordRouter {
    rules: Vec<(String, String)>,
    default_route: Option<String>,
}

impl KeywordRouter {
    /// Create an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Route inputs containing `keyword` (case-insensitive) to `route`.
    #[must_use]
    pub fn rule(mut self, keyword: impl Into<String>, route: impl Into<String>) -> Self {
        self.rules
            .push((keyword.into().to_lowercase(), route.into()));
        self
    }

    /// Route unmatched inputs here instead of failing.
    #[must_use]
    pub fn default_route(mut self, route: impl Into<String>) -> Self {
        self.default_route = Some(route.into());
        self
    }
}

#[async_trait]
impl RoutingStrategy for KeywordRouter {
    async fn route(&self, input: &str, _routes: &[String]) -> Result<RouteDecision> {
        let input_lower = input.to_lowercase();
        for (keyword, route) in &self.rules {
            if input_lower.contains(keyword) {
                debug!(%keyword, %route, "keyword route matched");
                return Ok(RouteDecision {
                    selected: route.clone(),
                    confidence: Some(1.0),
                    reasoning: Some(format!("matched keyword '{keyword}'")),
                });
            }
        }
        self.default_route
            .clone()
            .map(|route| RouteDecision {
                selected: route,
                confidence: Some(0.0),
                reasoning: Some("no keyword matched, using default".into()),
            })
            .ok_or_else(|| Error::generation("no route matched the input"))
    }
}

/// Always selects the same route. For tests and single-target wiring.
#[derive(Debug, Clone)]
pub struct FixedRouter(pub String);

#[async_trait]
impl RoutingStrategy for FixedRouter {
    async fn route(&self, _input: &str, _routes: &[String]) -> Result<RouteDecision> {
        Ok(RouteDecision::new(self.0.clone()))
    }
}

/// Asks a classifier model to pick the route.
pub struct LlmRouter {
    provider: Arc<dyn InferenceProvider>,
    options: InferenceOptions,
}

impl std::fmt::Debug for LlmRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmRouter").finish_non_exhaustive()
    }
}

impl LlmRouter {
    /// Create a router over `provider`.
    #[must_use]
    pub fn new(provider: Arc<dyn InferenceProvider>) -> Self {
        Self {
            provider,
            options: InferenceOptions::new().with_temperature(0.0),
        }
    }

    fn prompt(input: &str, routes: &[String]) -> String {
        let mut prompt = String::from(
            "Classify the user input into exactly one of the following routes. \
             Reply with the route name only.\n\nRoutes:\n",
        );
        for route in routes {
            prompt.push_str("- ");
            prompt.push_str(route);
            prompt.push('\n');
        }
        prompt.push_str("\nInput: ");
        prompt.push_str(input);
        prompt
    }
}

#[async_trait]
impl RoutingStrategy for LlmRouter {
    async fn route(&self, input: &str, routes: &[String]) -> Result<RouteDecision> {
        let reply = self
            .provider
            .generate(&Self::prompt(input, routes), &self.options)
            .await?;
        let reply_lower = reply.to_lowercase();
        routes
            .iter()
            .find(|route| reply_lower.contains(&route.to_lowercase()))
            .map(|route| RouteDecision {
                selected: route.clone(),
                confidence: None,
                reasoning: Some(reply.trim().to_owned()),
            })
            .ok_or_else(|| {
                Error::generation(format!("classifier reply named no known route: {reply}"))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MockProvider;

    fn routes(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| (*n).to_owned()).collect()
    }

    #[tokio::test]
    async fn keyword_router_matches_first_rule() {
        let router = KeywordRouter::new()
            .rule("invoice", "billing")
            .rule("password", "support");
        let decision = router
            .route("Where is my invoice?", &routes(&["billing", "support"]))
            .await
            .expect("match");
        assert_eq!(decision.selected, "billing");
        assert_eq!(decision.confidence, Some(1.0));
    }

    #[tokio::test]
    async fn keyword_router_uses_default() {
        let router = KeywordRouter::new()
            .rule("invoice", "billing")
            .default_route("general");
        let decision = router
            .route("hello there", &routes(&["billing", "general"]))
            .await
            .expect("default");
        assert_eq!(decision.selected, "general");
    }

    #[tokio::test]
    async fn keyword_router_without_default_fails() {
        let router = KeywordRouter::new().rule("invoice", "billing");
        assert!(router.route("hello", &routes(&["billing"])).await.is_err());
    }

    #[tokio::test]
    async fn llm_router_parses_the_reply() {
        let provider = Arc::new(MockProvider::new().then_text("billing, most likely"));
        let router = LlmRouter::new(provider);
        let decision = router
            .route("invoice trouble", &routes(&["billing", "support"]))
            .await
            .expect("classified");
        assert_eq!(decision.selected, "billing");
        assert!(decision.reasoning.is_some());
    }

    #[tokio::test]
    async fn llm_router_rejects_unknown_routes() {
        let provider = Arc::new(MockProvider::new().then_text("shipping"));
        let router = LlmRouter::new(provider);
        assert!(
            router
                .route("x", &routes(&["billing", "support"]))
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn fixed_router_is_fixed() {
        let router = FixedRouter("billing".into());
        let decision = router.route("anything", &routes(&["billing"])).await.expect("fixed");
        assert_eq!(decision.selected, "billing");
    }
}
