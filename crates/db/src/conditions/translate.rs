//! Shared pieces of the per-backend condition translators

use regex::{Regex, RegexBuilder};
use serde_json::Value;

use super::union::Conditional;
use crate::error::{ModelError, ModelResult};
use crate::metadata::Metadata;

/// Translate a predicate tree into a backend-native fragment.
///
/// Implementations are pure: the same metadata and tree always produce the
/// same fragment, and nothing reaches the backend before translation succeeds.
pub trait ConditionTranslator {
    type Fragment;

    fn translate(
        &self,
        metadata: Option<&Metadata>,
        conditional: &Conditional,
    ) -> ModelResult<Self::Fragment>;
}

/// Native name for a field, or the name itself when metadata does not know it
pub fn resolve_field(metadata: Option<&Metadata>, field: &str) -> String {
    metadata
        .and_then(|m| m.field_by_name(field))
        .map(|f| f.native_name.clone())
        .unwrap_or_else(|| field.to_string())
}

/// A regexp operand: bare pattern or `/pattern/flags`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegexpLiteral {
    pub pattern: String,
    pub flags: String,
}

impl RegexpLiteral {
    pub fn parse(value: &Value) -> ModelResult<Self> {
        let raw = value.as_str().ok_or_else(|| {
            ModelError::Query(format!("regexp operand must be a string, got {}", value))
        })?;

        let literal = match raw.strip_prefix('/') {
            Some(rest) => {
                let end = rest.rfind('/').ok_or_else(|| {
                    ModelError::Query(format!("malformed regexp literal '{}'", raw))
                })?;
                let flags = &rest[end + 1..];
                if let Some(bad) = flags.chars().find(|c| !"imsx".contains(*c)) {
                    return Err(ModelError::Query(format!(
                        "unsupported regexp flag '{}' in '{}'",
                        bad, raw
                    )));
                }
                Self {
                    pattern: rest[..end].to_string(),
                    flags: flags.to_string(),
                }
            }
            None => Self {
                pattern: raw.to_string(),
                flags: String::new(),
            },
        };

        literal.compile()?;
        Ok(literal)
    }

    pub fn has_flag(&self, flag: char) -> bool {
        self.flags.contains(flag)
    }

    pub fn compile(&self) -> ModelResult<Regex> {
        RegexBuilder::new(&self.pattern)
            .case_insensitive(self.has_flag('i'))
            .multi_line(self.has_flag('m'))
            .dot_matches_new_line(self.has_flag('s'))
            .ignore_whitespace(self.has_flag('x'))
            .build()
            .map_err(|e| ModelError::Query(format!("invalid regexp '{}': {}", self.pattern, e)))
    }
}
