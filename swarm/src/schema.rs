//! Tool schemas: the typed description of a tool's call surface.
//!
//! A [`ToolSchema`] is what a provider sees when a tool is exposed for
//! function calling, and what the registry validates arguments against
//! before execution. Parameter types form a small recursive language
//! ([`ParameterType`]) that renders to ordinary JSON schema.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::{Error, Result};
use crate::value::JsonMap;

/// The type of a single tool parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterType {
    /// A UTF-8 string.
    String,
    /// A signed integer.
    Integer,
    /// A floating-point number. Accepts integers as well.
    Float,
    /// A boolean.
    Boolean,
    /// A homogeneous array of the inner type.
    Array(Box<ParameterType>),
    /// A nested object with its own parameter list.
    Object(Vec<ToolParameter>),
    /// A closed enumeration of string values.
    OneOf(Vec<String>),
    /// Any JSON value.
    Any,
}

impl ParameterType {
    /// Human-readable name used in validation messages.
    #[must_use]
    pub fn describe(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Float => "number",
            Self::Boolean => "boolean",
            Self::Array(_) => "array",
            Self::Object(_) => "object",
            Self::OneOf(_) => "enum",
            Self::Any => "any",
        }
    }

    fn to_json_schema(&self) -> Value {
        match self {
            Self::String => json!({"type": "string"}),
            Self::Integer => json!({"type": "integer"}),
            Self::Float => json!({"type": "number"}),
            Self::Boolean => json!({"type": "boolean"}),
            Self::Array(inner) => json!({"type": "array", "items": inner.to_json_schema()}),
            Self::Object(params) => object_schema(params),
            Self::OneOf(options) => json!({"type": "string", "enum": options}),
            Self::Any => json!({}),
        }
    }

    fn matches(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Float => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Array(inner) => value
                .as_array()
                .is_some_and(|items| items.iter().all(|item| inner.matches(item))),
            Self::Object(params) => value
                .as_object()
                .is_some_and(|map| validate_object(params, map).is_ok()),
            Self::OneOf(options) => value
                .as_str()
                .is_some_and(|s| options.iter().any(|o| o == s)),
            Self::Any => true,
        }
    }
}

/// One named parameter of a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolParameter {
    /// Parameter name, unique within its object.
    pub name: String,
    /// What the parameter means to the model.
    pub description: String,
    /// The parameter's type.
    #[serde(rename = "type")]
    pub param_type: ParameterType,
    /// Whether the parameter must be present.
    pub required: bool,
    /// Default value substituted when the parameter is absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl ToolParameter {
    /// Create a required parameter.
    #[must_use]
    pub fn required(
        name: impl Into<String>,
        description: impl Into<String>,
        param_type: ParameterType,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            param_type,
            required: true,
            default: None,
        }
    }

    /// Create an optional parameter.
    #[must_use]
    pub fn optional(
        name: impl Into<String>,
        description: impl Into<String>,
        param_type: ParameterType,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            param_type,
            required: false,
            default: None,
        }
    }

    /// Attach a default value.
    #[must_use]
    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }
}

/// The callable surface of one tool.
///
/// Names are unique within a registry and within any single model call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    /// Tool name, unique within a registry.
    pub name: String,
    /// What the tool does and when to use it.
    pub description: String,
    /// Top-level parameters.
    pub parameters: Vec<ToolParameter>,
    /// Whether the provider should enforce strict argument validation.
    pub strict: bool,
}

impl ToolSchema {
    /// Create a schema with no parameters.
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
            strict: false,
        }
    }

    /// Append a parameter.
    #[must_use]
    pub fn parameter(mut self, parameter: ToolParameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    /// Enable strict provider-side validation.
    #[must_use]
    pub const fn strict(mut self) -> Self {
        self.strict = true;
        self
    }

    /// Render the parameter list as a JSON schema object for providers.
    #[must_use]
    pub fn to_json_schema(&self) -> Value {
        object_schema(&self.parameters)
    }

    /// Validate `arguments` against this schema.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidToolArguments`] on a missing required key,
    /// a type mismatch, or an enum value outside its closed set.
    pub fn validate_arguments(&self, arguments: &JsonMap<String, Value>) -> Result<()> {
        validate_object(&self.parameters, arguments)
            .map_err(|message| Error::invalid_arguments(&self.name, message))
    }
}

fn object_schema(params: &[ToolParameter]) -> Value {
    let mut properties = JsonMap::new();
    let mut required = Vec::new();
    for param in params {
        let mut schema = param.param_type.to_json_schema();
        if let Some(obj) = schema.as_object_mut() {
            obj.insert("description".into(), Value::String(param.description.clone()));
            if let Some(default) = &param.default {
                obj.insert("default".into(), default.clone());
            }
        }
        properties.insert(param.name.clone(), schema);
        if param.required {
            required.push(Value::String(param.name.clone()));
        }
    }
    json!({
        "type": "object",
        "properties": Value::Object(properties),
        "required": Value::Array(required),
    })
}

fn validate_object(
    params: &[ToolParameter],
    arguments: &JsonMap<String, Value>,
) -> std::result::Result<(), String> {
    for param in params {
        match arguments.get(&param.name) {
            Some(value) => {
                if !param.param_type.matches(value) {
                    return Err(format!(
                        "parameter '{}' expected {}, got {}",
                        param.name,
                        param.param_type.describe(),
                        type_name(value)
                    ));
                }
            }
            None if param.required && param.default.is_none() => {
                return Err(format!("missing required parameter '{}'", param.name));
            }
            None => {}
        }
    }
    Ok(())
}

pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;

    fn search_schema() -> ToolSchema {
        ToolSchema::new("search", "Search the index.")
            .parameter(ToolParameter::required(
                "query",
                "The search query",
                ParameterType::String,
            ))
            .parameter(ToolParameter::optional(
                "limit",
                "Maximum hits",
                ParameterType::Integer,
            ))
            .parameter(ToolParameter::optional(
                "mode",
                "Match mode",
                ParameterType::OneOf(vec!["exact".into(), "fuzzy".into()]),
            ))
    }

    fn args(value: Value) -> JsonMap<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn accepts_valid_arguments() {
        let schema = search_schema();
        let result = schema.validate_arguments(&args(json!({
            "query": "rust",
            "limit": 5,
            "mode": "fuzzy",
        })));
        assert!(result.is_ok());
    }

    #[test]
    fn rejects_missing_required() {
        let schema = search_schema();
        let err = schema
            .validate_arguments(&args(json!({"limit": 5})))
            .expect_err("query is required");
        assert_eq!(err.kind(), ErrorKind::InvalidToolArguments);
        assert!(err.to_string().contains("query"));
    }

    #[test]
    fn rejects_type_mismatch() {
        let schema = search_schema();
        let err = schema
            .validate_arguments(&args(json!({"query": "rust", "limit": "five"})))
            .expect_err("limit must be an integer");
        assert!(err.to_string().contains("integer"));
    }

    #[test]
    fn rejects_enum_out_of_range() {
        let schema = search_schema();
        let err = schema
            .validate_arguments(&args(json!({"query": "rust", "mode": "regex"})))
            .expect_err("mode is a closed enum");
        assert!(err.to_string().contains("mode"));
    }

    #[test]
    fn nested_objects_validate_recursively() {
        let schema = ToolSchema::new("configure", "Apply settings.").parameter(
            ToolParameter::required(
                "settings",
                "Settings block",
                ParameterType::Object(vec![ToolParameter::required(
                    "retries",
                    "Retry count",
                    ParameterType::Integer,
                )]),
            ),
        );
        assert!(schema
            .validate_arguments(&args(json!({"settings": {"retries": 3}})))
            .is_ok());
        assert!(schema
            .validate_arguments(&args(json!({"settings": {"retries": "three"}})))
            .is_err());
    }

    #[test]
    fn renders_json_schema() {
        let rendered = search_schema().to_json_schema();
        assert_eq!(rendered["type"], "object");
        assert_eq!(rendered["properties"]["query"]["type"], "string");
        assert_eq!(rendered["required"], json!(["query"]));
        assert_eq!(rendered["properties"]["mode"]["enum"], json!(["exact", "fuzzy"]));
    }
}
