//! Channels: named, typed slots holding values between steps.

use serde::{Deserialize, Serialize};
use serde_json::Number;

use crate::schema::type_name;
use crate::value::Value;

/// Who can see a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelScope {
    /// Visible to the whole workflow.
    Global,
    /// Private to one task/branch.
    TaskLocal,
}

/// How often a channel accepts writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdatePolicy {
    /// Any number of writes.
    Always,
    /// At most one write per turn.
    Single,
}

/// The declared type of a channel's values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    /// Any JSON value.
    Any,
    /// A string.
    String,
    /// An integer. Integral floats normalize to integers on write.
    Integer,
    /// Any number.
    Float,
    /// A boolean.
    Boolean,
    /// An array.
    Array,
    /// An object.
    Object,
}

impl ValueType {
    /// Whether `value` conforms to this type.
    #[must_use]
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            Self::Any => true,
            Self::String => value.is_string(),
            Self::Integer => {
                value.is_i64()
                    || value.is_u64()
                    || value.as_f64().is_some_and(|f| f.fract() == 0.0 && f.is_finite())
            }
            Self::Float => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
        }
    }

    /// Human-readable name used in errors.
    #[must_use]
    pub const fn describe(&self) -> &'static str {
        match self {
            Self::Any => "any",
            Self::String => "string",
            Self::Integer => "integer",
            Self::Float => "number",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        }
    }

    /// Normalize `value` for storage on a channel of this type.
    ///
    /// Floats that represent integers serialize as integers only when the
    /// channel's declared type is integer; otherwise they stay floats.
    #[must_use]
    pub fn normalize(&self, value: Value) -> Value {
        if *self == Self::Integer {
            if let Some(f) = value.as_f64() {
                if f.fract() == 0.0 && f.is_finite() && value.as_i64().is_none() {
                    // Safe range check before the lossy cast.
                    if (i64::MIN as f64..=i64::MAX as f64).contains(&f) {
                        return Value::Number(Number::from(f as i64));
                    }
                }
            }
        }
        value
    }

    /// The type of an offered value, for error messages.
    #[must_use]
    pub fn of(value: &Value) -> &'static str {
        type_name(value)
    }
}

/// Declaration of one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSpec {
    /// Channel name.
    pub name: String,
    /// Declared value type.
    pub value_type: ValueType,
    /// Visibility scope.
    pub scope: ChannelScope,
    /// Write policy.
    pub update: UpdatePolicy,
}

impl ChannelSpec {
    /// A global, any-typed, always-writable channel.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value_type: ValueType::Any,
            scope: ChannelScope::Global,
            update: UpdatePolicy::Always,
        }
    }

    /// Declare the value type.
    #[must_use]
    pub const fn typed(mut self, value_type: ValueType) -> Self {
        self.value_type = value_type;
        self
    }

    /// Make the channel task-local.
    #[must_use]
    pub const fn task_local(mut self) -> Self {
        self.scope = ChannelScope::TaskLocal;
        self
    }

    /// Accept at most one write per turn.
    #[must_use]
    pub const fn single_update(mut self) -> Self {
        self.update = UpdatePolicy::Single;
        self
    }
}

/// One out-of-band channel mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalWrite {
    /// Target channel name.
    pub channel: String,
    /// The scope the writer claims.
    pub scope: ChannelScope,
    /// The value to write.
    pub value: Value,
}

impl ExternalWrite {
    /// A global-scope write.
    #[must_use]
    pub fn global(channel: impl Into<String>, value: Value) -> Self {
        Self {
            channel: channel.into(),
            scope: ChannelScope::Global,
            value,
        }
    }

    /// A task-local write.
    #[must_use]
    pub fn task_local(channel: impl Into<String>, value: Value) -> Self {
        Self {
            channel: channel.into(),
            scope: ChannelScope::TaskLocal,
            value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn integer_channels_accept_integral_floats() {
        assert!(ValueType::Integer.matches(&json!(5)));
        assert!(ValueType::Integer.matches(&json!(5.0)));
        assert!(!ValueType::Integer.matches(&json!(5.5)));
        assert!(!ValueType::Integer.matches(&json!("5")));
    }

    #[test]
    fn integral_floats_normalize_to_integers_only_on_integer_channels() {
        let normalized = ValueType::Integer.normalize(json!(5.0));
        assert_eq!(normalized, json!(5));
        assert!(normalized.is_i64());

        // Float channels keep the float representation.
        let kept = ValueType::Float.normalize(json!(5.0));
        assert!(kept.is_f64());
    }

    #[test]
    fn type_matching_covers_shapes() {
        assert!(ValueType::String.matches(&json!("s")));
        assert!(ValueType::Array.matches(&json!([1, 2])));
        assert!(ValueType::Object.matches(&json!({"k": 1})));
        assert!(!ValueType::Boolean.matches(&json!(1)));
        assert!(ValueType::Any.matches(&json!(null)));
    }
}
