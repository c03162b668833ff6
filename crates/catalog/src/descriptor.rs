//! Tool identity and argument types.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The `(server, name)` pair identifying one tool.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ToolRef {
    pub server: String,
    pub name: String,
}

impl ToolRef {
    pub fn new(server: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for ToolRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.server, self.name)
    }
}

/// Accepted JSON shape of a tool parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
    Any,
}

impl ParamKind {
    /// Whether `value` fits this kind. `null` fits every kind; a missing
    /// required parameter is caught separately.
    pub fn accepts(self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) | (ParamKind::Any, _) => true,
            (ParamKind::String, Value::String(_)) => true,
            (ParamKind::Number, Value::Number(_)) => true,
            (ParamKind::Integer, Value::Number(n)) => n.is_i64() || n.is_u64(),
            (ParamKind::Boolean, Value::Bool(_)) => true,
            (ParamKind::Array, Value::Array(_)) => true,
            (ParamKind::Object, Value::Object(_)) => true,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ParamKind::String => "string",
            ParamKind::Number => "number",
            ParamKind::Integer => "integer",
            ParamKind::Boolean => "boolean",
            ParamKind::Array => "array",
            ParamKind::Object => "object",
            ParamKind::Any => "any",
        }
    }
}

/// One keyword parameter accepted by a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ParamKind,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

impl ParamSpec {
    pub fn required(name: impl Into<String>, kind: ParamKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: true,
            description: String::new(),
        }
    }

    pub fn optional(name: impl Into<String>, kind: ParamKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            description: String::new(),
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Static description of one invocable tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub server: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub description: String,
    #[serde(default)]
    pub parameters: Vec<ParamSpec>,
}

impl ToolDescriptor {
    pub fn new(
        server: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            server: server.into(),
            name: name.into(),
            category: None,
            description: description.into(),
            parameters: Vec::new(),
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_param(mut self, param: ParamSpec) -> Self {
        self.parameters.push(param);
        self
    }

    pub fn tool_ref(&self) -> ToolRef {
        ToolRef::new(&self.server, &self.name)
    }

    /// Check keyword arguments against the declared parameters.
    ///
    /// A descriptor with no parameters accepts anything, so tools registered
    /// without a schema still work.
    pub fn validate(&self, args: &Arguments) -> std::result::Result<(), String> {
        if self.parameters.is_empty() {
            return Ok(());
        }

        for key in args.0.keys() {
            if !self.parameters.iter().any(|p| &p.name == key) {
                return Err(format!("unexpected argument '{key}'"));
            }
        }

        for param in &self.parameters {
            match args.0.get(&param.name) {
                None | Some(Value::Null) if param.required => {
                    return Err(format!("missing required argument '{}'", param.name));
                }
                Some(value) if !param.kind.accepts(value) => {
                    return Err(format!(
                        "argument '{}' must be {}, got {}",
                        param.name,
                        param.kind.as_str(),
                        json_type_name(value)
                    ));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Keyword arguments passed to a tool.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Arguments(pub Map<String, Value>);

impl Arguments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key).filter(|v| !v.is_null())
    }

    pub fn str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(Value::as_f64)
    }

    pub fn i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(Value::as_i64)
    }

    pub fn bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(Value::as_bool)
    }

    /// Required string argument.
    pub fn require_str(&self, key: &str) -> std::result::Result<&str, ToolFailure> {
        self.str(key)
            .ok_or_else(|| ToolFailure::new(format!("'{key}' is required")))
    }

    /// Required numeric argument.
    pub fn require_f64(&self, key: &str) -> std::result::Result<f64, ToolFailure> {
        self.f64(key)
            .ok_or_else(|| ToolFailure::new(format!("'{key}' is required")))
    }
}

impl From<Map<String, Value>> for Arguments {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Error raised by a tool implementation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolFailure(pub String);

impl ToolFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl std::fmt::Display for ToolFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for ToolFailure {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn forecast() -> ToolDescriptor {
        ToolDescriptor::new("weather", "marine_forecast", "Marine weather forecast")
            .with_param(ParamSpec::required("latitude", ParamKind::Number))
            .with_param(ParamSpec::optional("days", ParamKind::Integer))
    }

    #[test]
    fn tool_ref_display() {
        assert_eq!(ToolRef::new("weather", "marine_forecast").to_string(), "weather/marine_forecast");
    }

    #[test]
    fn validate_accepts_declared_arguments() {
        let args = Arguments::new().with("latitude", 40.9).with("days", 3);
        assert!(forecast().validate(&args).is_ok());
    }

    #[test]
    fn validate_rejects_unknown_argument() {
        let args = Arguments::new().with("latitude", 40.9).with("colour", "blue");
        let err = forecast().validate(&args).unwrap_err();
        assert!(err.contains("unexpected argument 'colour'"));
    }

    #[test]
    fn validate_rejects_missing_required() {
        let err = forecast().validate(&Arguments::new()).unwrap_err();
        assert!(err.contains("missing required argument 'latitude'"));
    }

    #[test]
    fn validate_rejects_wrong_kind() {
        let args = Arguments::new().with("latitude", "north").with("days", 2.5);
        let err = forecast().validate(&args).unwrap_err();
        assert!(err.contains("'latitude' must be number, got string"));
    }

    #[test]
    fn integer_kind_rejects_fractional_numbers() {
        assert!(ParamKind::Integer.accepts(&json!(3)));
        assert!(!ParamKind::Integer.accepts(&json!(2.5)));
        assert!(ParamKind::Number.accepts(&json!(2.5)));
    }

    #[test]
    fn schemaless_descriptor_accepts_anything() {
        let bare = ToolDescriptor::new("misc", "echo", "Echo arguments");
        let args = Arguments::new().with("anything", json!([1, 2]));
        assert!(bare.validate(&args).is_ok());
    }
}
