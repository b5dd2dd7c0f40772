//! The membrane's internal tools.
//!
//! These four tools are exposed on every JIT-planned turn so the model
//! can widen its own view: load an excluded schema, amend the catalog for
//! subsequent turns, and resolve content pointers.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::context::RunContext;
use crate::error::{Error, Result};
use crate::schema::{ParameterType, ToolParameter, ToolSchema};
use crate::tool::Tool;
use crate::value::{JsonMap, Value};

use super::MembraneState;

/// Name of the schema-loading tool.
pub const LOAD_TOOL_SCHEMA: &str = "membrane_load_tool_schema";
/// Name of the catalog-addition tool.
pub const ADD_TOOLS: &str = "Add_Tools";
/// Name of the catalog-removal tool.
pub const REMOVE_TOOLS: &str = "Remove_Tools";
/// Name of the pointer-resolution tool.
pub const RESOLVE_POINTER: &str = "resolve_pointer";

/// All four internal tool names.
pub const MEMBRANE_TOOL_NAMES: &[&str] =
    &[LOAD_TOOL_SCHEMA, ADD_TOOLS, REMOVE_TOOLS, RESOLVE_POINTER];

pub(super) fn internal_schemas() -> Vec<ToolSchema> {
    vec![
        load_schema_schema(),
        add_tools_schema(),
        remove_tools_schema(),
        resolve_pointer_schema(),
    ]
}

pub(super) fn internal_tools(state: &Arc<MembraneState>) -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(LoadToolSchema {
            state: Arc::clone(state),
        }),
        Arc::new(AddTools {
            state: Arc::clone(state),
        }),
        Arc::new(RemoveTools {
            state: Arc::clone(state),
        }),
        Arc::new(ResolvePointer {
            state: Arc::clone(state),
        }),
    ]
}

fn load_schema_schema() -> ToolSchema {
    ToolSchema::new(
        LOAD_TOOL_SCHEMA,
        "Load the full schema of a registered tool that is not currently exposed.",
    )
    .parameter(ToolParameter::required(
        "name",
        "Name of the tool to load",
        ParameterType::String,
    ))
}

fn add_tools_schema() -> ToolSchema {
    ToolSchema::new(
        ADD_TOOLS,
        "Add tools to the exposed catalog for subsequent turns.",
    )
    .parameter(ToolParameter::required(
        "names",
        "Tool names to add",
        ParameterType::Array(Box::new(ParameterType::String)),
    ))
}

fn remove_tools_schema() -> ToolSchema {
    ToolSchema::new(
        REMOVE_TOOLS,
        "Remove tools from the exposed catalog for subsequent turns.",
    )
    .parameter(ToolParameter::required(
        "names",
        "Tool names to remove",
        ParameterType::Array(Box::new(ParameterType::String)),
    ))
}

fn resolve_pointer_schema() -> ToolSchema {
    ToolSchema::new(
        RESOLVE_POINTER,
        "Retrieve the original content behind a context pointer.",
    )
    .parameter(ToolParameter::required(
        "pointer_id",
        "The pointer id, e.g. ptr-3",
        ParameterType::String,
    ))
}

fn string_list(arguments: &JsonMap<String, Value>, key: &str) -> Vec<String> {
    arguments
        .get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default()
}

struct LoadToolSchema {
    state: Arc<MembraneState>,
}

#[async_trait]
impl Tool for LoadToolSchema {
    fn schema(&self) -> ToolSchema {
        load_schema_schema()
    }

    async fn invoke(&self, arguments: &JsonMap<String, Value>, _cx: &RunContext) -> Result<Value> {
        let name = arguments
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let catalog = MembraneState::locked(&self.state.catalog);
        let schema = catalog
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| Error::ToolNotFound(name.to_owned()))?;
        Ok(json!({
            "name": schema.name,
            "description": schema.description,
            "parameters": schema.to_json_schema(),
        }))
    }
}

struct AddTools {
    state: Arc<MembraneState>,
}

#[async_trait]
impl Tool for AddTools {
    fn schema(&self) -> ToolSchema {
        add_tools_schema()
    }

    async fn invoke(&self, arguments: &JsonMap<String, Value>, _cx: &RunContext) -> Result<Value> {
        let names = string_list(arguments, "names");
        {
            let mut additions = MembraneState::locked(&self.state.additions);
            let mut removals = MembraneState::locked(&self.state.removals);
            for name in &names {
                removals.remove(name);
                additions.insert(name.clone());
            }
        }
        Ok(json!({ "added": names }))
    }
}

struct RemoveTools {
    state: Arc<MembraneState>,
}

#[async_trait]
impl Tool for RemoveTools {
    fn schema(&self) -> ToolSchema {
        remove_tools_schema()
    }

    async fn invoke(&self, arguments: &JsonMap<String, Value>, _cx: &RunContext) -> Result<Value> {
        let names = string_list(arguments, "names");
        {
            let mut additions = MembraneState::locked(&self.state.additions);
            let mut removals = MembraneState::locked(&self.state.removals);
            for name in &names {
                additions.remove(name);
                removals.insert(name.clone());
            }
        }
        Ok(json!({ "removed": names }))
    }
}

struct ResolvePointer {
    state: Arc<MembraneState>,
}

#[async_trait]
impl Tool for ResolvePointer {
    fn schema(&self) -> ToolSchema {
        resolve_pointer_schema()
    }

    async fn invoke(&self, arguments: &JsonMap<String, Value>, _cx: &RunContext) -> Result<Value> {
        let pointer_id = arguments
            .get("pointer_id")
            .and_then(Value::as_str)
            .unwrap_or_default();
        self.state
            .pointers
            .resolve(pointer_id)
            .map(Value::String)
            .ok_or_else(|| {
                Error::invalid_arguments(RESOLVE_POINTER, format!("unknown pointer '{pointer_id}'"))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::membrane::{ContextMembrane, PlanRequest, PromptPlanner};
    use crate::message::MemoryMessage;

    fn find<'a>(tools: &'a [Arc<dyn Tool>], name: &str) -> &'a Arc<dyn Tool> {
        tools
            .iter()
            .find(|t| t.name() == name)
            .unwrap_or_else(|| panic!("missing internal tool {name}"))
    }

    fn args(value: Value) -> JsonMap<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn load_tool_schema_returns_excluded_schemas() {
        let membrane = ContextMembrane::default();
        let catalog: Vec<ToolSchema> = (0..15)
            .map(|i| ToolSchema::new(format!("tool_{i:02}"), "A tool."))
            .collect();
        let plan = membrane
            .plan(&PlanRequest {
                instructions: "",
                input: "hi",
                history: &[],
                catalog: &catalog,
            })
            .expect("plan");
        // tool_14 fell outside the JIT slice but is still loadable.
        assert!(!plan.exposed.iter().any(|t| t.name == "tool_14"));

        let tools = membrane.internal_tools();
        let cx = RunContext::new("t");
        let loaded = find(&tools, LOAD_TOOL_SCHEMA)
            .invoke(&args(json!({"name": "tool_14"})), &cx)
            .await
            .expect("schema is loadable");
        assert_eq!(loaded["name"], "tool_14");
    }

    #[tokio::test]
    async fn add_and_remove_adjust_subsequent_turns() {
        let membrane = ContextMembrane::default();
        let catalog: Vec<ToolSchema> = (0..20)
            .map(|i| ToolSchema::new(format!("tool_{i:02}"), "A tool."))
            .collect();
        let tools = membrane.internal_tools();
        let cx = RunContext::new("t");

        find(&tools, ADD_TOOLS)
            .invoke(&args(json!({"names": ["tool_19"]})), &cx)
            .await
            .expect("add");
        let plan = membrane
            .plan(&PlanRequest {
                instructions: "",
                input: "hi",
                history: &[],
                catalog: &catalog,
            })
            .expect("plan");
        assert!(plan.exposed.iter().any(|t| t.name == "tool_19"));

        find(&tools, REMOVE_TOOLS)
            .invoke(&args(json!({"names": ["tool_19"]})), &cx)
            .await
            .expect("remove");
        let plan = membrane
            .plan(&PlanRequest {
                instructions: "",
                input: "hi",
                history: &[],
                catalog: &catalog,
            })
            .expect("plan");
        assert!(!plan.exposed.iter().any(|t| t.name == "tool_19"));
    }

    #[tokio::test]
    async fn resolve_pointer_round_trips_content() {
        let membrane = ContextMembrane::default();
        let big = "data ".repeat(400);
        let history = [MemoryMessage::user(big.clone())];
        membrane
            .plan(&PlanRequest {
                instructions: "",
                input: "hi",
                history: &history,
                catalog: &[],
            })
            .expect("plan");

        let tools = membrane.internal_tools();
        let cx = RunContext::new("t");
        let resolved = find(&tools, RESOLVE_POINTER)
            .invoke(&args(json!({"pointer_id": "ptr-1"})), &cx)
            .await
            .expect("pointer resolves");
        assert_eq!(resolved, Value::String(big));

        let err = find(&tools, RESOLVE_POINTER)
            .invoke(&args(json!({"pointer_id": "ptr-9"})), &cx)
            .await
            .expect_err("unknown pointer");
        assert!(err.to_string().contains("ptr-9"));
    }
}
