//! Tool metadata, argument validation and the name → handler registry.

use std::collections::HashMap;
use std::fmt;

use futures::future::BoxFuture;
use serde_json::{Map, Value, json};

use crate::config::{ToolCategory, ToolFilter};
use crate::dispatcher::ToolContext;
use crate::error::ToolError;

/// Async tool implementation.
pub type ToolHandler =
    for<'a> fn(&'a ToolContext, &'a Map<String, Value>) -> BoxFuture<'a, Result<Value, ToolError>>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("tool '{0}' is already registered")]
    DuplicateTool(String),
    #[error("unknown tool: {0}")]
    UnknownTool(String),
    #[error("tool name cannot be empty")]
    EmptyName,
}

/// Parameter type for tool inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamType {
    String,
    Int,
    Bool,
    StringList,
    /// Object whose values are all strings.
    StringMap,
    Enum(&'static [&'static str]),
    Optional(Box<ParamType>),
}

impl ParamType {
    pub fn optional(inner: ParamType) -> Self {
        ParamType::Optional(Box::new(inner))
    }

    /// Validate a JSON value against this parameter type.
    pub fn validate(&self, value: &Value) -> Result<(), String> {
        match self {
            ParamType::String => match value {
                Value::String(_) => Ok(()),
                other => Err(format!("expected string, got {}", value_type_name(other))),
            },
            ParamType::Int => {
                if value.is_i64() || value.is_u64() {
                    Ok(())
                } else {
                    Err(format!("expected integer, got {}", value_type_name(value)))
                }
            }
            ParamType::Bool => match value {
                Value::Bool(_) => Ok(()),
                other => Err(format!("expected boolean, got {}", value_type_name(other))),
            },
            ParamType::StringList => {
                let arr = value
                    .as_array()
                    .ok_or_else(|| format!("expected array, got {}", value_type_name(value)))?;
                for (i, item) in arr.iter().enumerate() {
                    if !item.is_string() {
                        return Err(format!(
                            "expected string at index {i}, got {}",
                            value_type_name(item)
                        ));
                    }
                }
                Ok(())
            }
            ParamType::StringMap => {
                let map = value
                    .as_object()
                    .ok_or_else(|| format!("expected object, got {}", value_type_name(value)))?;
                for (key, item) in map {
                    if !item.is_string() {
                        return Err(format!(
                            "expected string for key '{key}', got {}",
                            value_type_name(item)
                        ));
                    }
                }
                Ok(())
            }
            ParamType::Enum(variants) => {
                let s = value.as_str().ok_or_else(|| {
                    format!("expected string for enum, got {}", value_type_name(value))
                })?;
                if variants.contains(&s) {
                    Ok(())
                } else {
                    Err(format!(
                        "invalid value '{s}', expected one of: {}",
                        variants.join(", ")
                    ))
                }
            }
            ParamType::Optional(inner) => {
                if value.is_null() {
                    Ok(())
                } else {
                    inner.validate(value)
                }
            }
        }
    }

    fn json_schema(&self) -> Value {
        match self {
            ParamType::String => json!({ "type": "string" }),
            ParamType::Int => json!({ "type": "integer" }),
            ParamType::Bool => json!({ "type": "boolean" }),
            ParamType::StringList => json!({ "type": "array", "items": { "type": "string" } }),
            ParamType::StringMap => {
                json!({ "type": "object", "additionalProperties": { "type": "string" } })
            }
            ParamType::Enum(variants) => json!({ "type": "string", "enum": variants }),
            ParamType::Optional(inner) => inner.json_schema(),
        }
    }
}

fn value_type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// A single parameter definition for a tool.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamDef {
    pub name: &'static str,
    pub param_type: ParamType,
    pub description: &'static str,
    pub default: Option<Value>,
}

impl ParamDef {
    pub fn required(name: &'static str, param_type: ParamType, description: &'static str) -> Self {
        Self {
            name,
            param_type,
            description,
            default: None,
        }
    }

    pub fn optional(name: &'static str, param_type: ParamType, description: &'static str) -> Self {
        Self {
            name,
            param_type: ParamType::optional(param_type),
            description,
            default: None,
        }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn is_required(&self) -> bool {
        self.default.is_none() && !matches!(self.param_type, ParamType::Optional(_))
    }
}

/// Tool metadata plus its implementation.
#[derive(Clone)]
pub struct ToolDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    pub category: ToolCategory,
    /// Read-only tools never mutate platform state; cancelling them leaves nothing half-applied.
    pub read_only: bool,
    pub params: Vec<ParamDef>,
    pub handler: ToolHandler,
}

impl fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("name", &self.name)
            .field("category", &self.category)
            .field("read_only", &self.read_only)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

impl ToolDescriptor {
    pub fn input_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for param in &self.params {
            let mut schema = param.param_type.json_schema();
            schema["description"] = Value::String(param.description.to_string());
            if let Some(default) = &param.default {
                schema["default"] = default.clone();
            }
            properties.insert(param.name.to_string(), schema);
            if param.is_required() {
                required.push(param.name);
            }
        }
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": false,
        })
    }

    /// Check `args` against the declared parameters; unknown keys are rejected.
    pub fn validate_arguments(&self, args: &Map<String, Value>) -> Result<(), ToolError> {
        for key in args.keys() {
            if !self.params.iter().any(|p| p.name == key) {
                let known: Vec<&str> = self.params.iter().map(|p| p.name).collect();
                return Err(ToolError::invalid_arguments(format!(
                    "unknown argument '{key}' for {} (accepted: {})",
                    self.name,
                    known.join(", ")
                ))
                .with_field(key.clone()));
            }
        }
        for param in &self.params {
            match args.get(param.name) {
                None if param.is_required() => {
                    return Err(ToolError::invalid_arguments(format!(
                        "missing required argument '{}'",
                        param.name
                    ))
                    .with_field(param.name));
                }
                None => {}
                Some(value) => param.param_type.validate(value).map_err(|reason| {
                    ToolError::invalid_arguments(format!("argument '{}': {reason}", param.name))
                        .with_field(param.name)
                })?,
            }
        }
        Ok(())
    }

    pub fn to_list_entry(&self) -> Value {
        json!({
            "name": self.name,
            "description": self.description,
            "inputSchema": self.input_schema(),
            "annotations": {
                "readOnlyHint": self.read_only,
            },
        })
    }
}

/// Registered tools in registration order.
#[derive(Debug, Default)]
pub struct ToolRegistry {
    tools: Vec<ToolDescriptor>,
    index: HashMap<&'static str, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, descriptor: ToolDescriptor) -> Result<(), RegistryError> {
        if descriptor.name.trim().is_empty() {
            return Err(RegistryError::EmptyName);
        }
        if self.index.contains_key(descriptor.name) {
            return Err(RegistryError::DuplicateTool(descriptor.name.to_string()));
        }
        self.index.insert(descriptor.name, self.tools.len());
        self.tools.push(descriptor);
        Ok(())
    }

    pub fn resolve(&self, name: &str) -> Result<&ToolDescriptor, RegistryError> {
        self.index
            .get(name)
            .map(|&i| &self.tools[i])
            .ok_or_else(|| RegistryError::UnknownTool(name.to_string()))
    }

    /// Descriptors whose category `filter` includes, in registration order.
    pub fn list_visible(&self, filter: ToolFilter) -> Vec<&ToolDescriptor> {
        self.tools
            .iter()
            .filter(|t| filter.includes(t.category))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
