//! Field descriptors

use std::fmt;

use convert_case::{Case, Casing};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::relationship::Relationship;
use crate::error::{ModelError, ModelResult};

/// Semantic type of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldType {
    String,
    Int,
    Float,
    Bool,
    Time,
    Object,
    Array,
}

impl FieldType {
    pub fn parse(name: &str) -> ModelResult<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "string" | "text" | "str" => Ok(Self::String),
            "int" | "integer" | "int64" | "int32" | "uint" | "uint64" => Ok(Self::Int),
            "float" | "double" | "number" | "float64" | "float32" => Ok(Self::Float),
            "bool" | "boolean" => Ok(Self::Bool),
            "time" | "datetime" | "timestamp" | "date" => Ok(Self::Time),
            "object" | "map" | "struct" => Ok(Self::Object),
            "array" | "slice" | "list" => Ok(Self::Array),
            other => Err(ModelError::InvalidMetadata(format!(
                "unknown field type '{}'",
                other
            ))),
        }
    }

    /// Infer the type from a sample value
    pub fn infer(value: &Value) -> Self {
        match value {
            Value::Bool(_) => Self::Bool,
            Value::Number(n) if n.is_i64() || n.is_u64() => Self::Int,
            Value::Number(_) => Self::Float,
            Value::String(s) if chrono::DateTime::parse_from_rfc3339(s).is_ok() => Self::Time,
            Value::String(_) | Value::Null => Self::String,
            Value::Array(_) => Self::Array,
            Value::Object(_) => Self::Object,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Int => "int",
            Self::Float => "float",
            Self::Bool => "bool",
            Self::Time => "time",
            Self::Object => "object",
            Self::Array => "array",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Default native name for a declared field name
pub fn native_name_for(name: &str) -> String {
    name.to_case(Case::Snake)
}

/// One field of a metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    /// Declared name, as the caller's records serialize it
    pub name: String,
    /// Backend field name
    pub native_name: String,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub field_type: FieldType,
    pub required: bool,
    pub unique: bool,
    pub primary: bool,
    pub auto_increment: bool,
    pub default: Option<Value>,
    pub relationship: Option<Relationship>,
}

impl Field {
    /// Create a field whose native name is the snake_case form of `name`
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        let name = name.into();
        Self {
            native_name: native_name_for(&name),
            name,
            display_name: None,
            description: None,
            field_type,
            required: false,
            unique: false,
            primary: false,
            auto_increment: false,
            default: None,
            relationship: None,
        }
    }

    pub fn with_native_name(mut self, native_name: impl Into<String>) -> Self {
        self.native_name = native_name.into();
        self
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Mark as primary key; primary keys are unique and required
    pub fn primary(mut self) -> Self {
        self.primary = true;
        self.unique = true;
        self.required = true;
        self
    }

    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn with_relationship(mut self, relationship: Relationship) -> Self {
        self.relationship = Some(relationship);
        self
    }

    /// Relationship fields hold preloaded data, not stored values
    pub fn is_virtual(&self) -> bool {
        self.relationship.is_some()
    }

    pub fn validate(&self) -> ModelResult<()> {
        if self.name.is_empty() {
            return Err(ModelError::InvalidMetadata("field name cannot be empty".to_string()));
        }
        if self.native_name.is_empty() {
            return Err(ModelError::InvalidMetadata(format!(
                "field '{}' has an empty native name",
                self.name
            )));
        }
        if let Some(rel) = &self.relationship {
            rel.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_native_name_defaults_to_snake_case() {
        assert_eq!(Field::new("FirstName", FieldType::String).native_name, "first_name");
        assert_eq!(Field::new("createdAt", FieldType::Time).native_name, "created_at");
        assert_eq!(
            Field::new("ID", FieldType::Int).with_native_name("_id").native_name,
            "_id"
        );
    }

    #[test]
    fn test_infer_types() {
        assert_eq!(FieldType::infer(&json!(1)), FieldType::Int);
        assert_eq!(FieldType::infer(&json!(1.5)), FieldType::Float);
        assert_eq!(FieldType::infer(&json!(true)), FieldType::Bool);
        assert_eq!(FieldType::infer(&json!("2024-01-02T03:04:05Z")), FieldType::Time);
        assert_eq!(FieldType::infer(&json!("Eason")), FieldType::String);
        assert_eq!(FieldType::infer(&json!({"a": 1})), FieldType::Object);
        assert_eq!(FieldType::infer(&json!([1])), FieldType::Array);
    }

    #[test]
    fn test_primary_implies_unique_and_required() {
        let field = Field::new("ID", FieldType::Int).primary();
        assert!(field.unique && field.required && field.primary);
    }

    #[test]
    fn test_parse_type_aliases() {
        assert_eq!(FieldType::parse("Integer").unwrap(), FieldType::Int);
        assert_eq!(FieldType::parse("timestamp").unwrap(), FieldType::Time);
        assert!(FieldType::parse("blob").is_err());
    }
}
