//! Metadata hooks registered by `"<namePattern>:<stage>[:<fields>]"`
//!
//! A pattern expands into one hook per matching lifecycle stage. Hooks are
//! bound to every registered metadata whose name matches the glob, and bind
//! again whenever metadata is registered later, so registration order between
//! hooks and metadata does not matter.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;
use wildmatch::WildMatch;

use crate::callbacks::Scope;
use crate::conditions::Junction;
use crate::error::{ModelError, ModelResult};
use crate::event_error::EventError;
use crate::metadata::Metadata;

/// Lifecycle stage a hook runs at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    BeforeSave,
    BeforeCreate,
    AfterCreate,
    AfterSave,
    BeforeUpdate,
    AfterUpdate,
    BeforeQuery,
    AfterQuery,
    BeforeDelete,
    AfterDelete,
}

impl Stage {
    pub const ALL: [Stage; 10] = [
        Stage::BeforeSave,
        Stage::BeforeCreate,
        Stage::AfterCreate,
        Stage::AfterSave,
        Stage::BeforeUpdate,
        Stage::AfterUpdate,
        Stage::BeforeQuery,
        Stage::AfterQuery,
        Stage::BeforeDelete,
        Stage::AfterDelete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::BeforeSave => "beforeSave",
            Stage::BeforeCreate => "beforeCreate",
            Stage::AfterCreate => "afterCreate",
            Stage::AfterSave => "afterSave",
            Stage::BeforeUpdate => "beforeUpdate",
            Stage::AfterUpdate => "afterUpdate",
            Stage::BeforeQuery => "beforeQuery",
            Stage::AfterQuery => "afterQuery",
            Stage::BeforeDelete => "beforeDelete",
            Stage::AfterDelete => "afterDelete",
        }
    }

    /// Stages whose names match a case-insensitive glob
    pub fn matching(pattern: &str) -> Vec<Stage> {
        let matcher = WildMatch::new(&pattern.trim().to_ascii_lowercase());
        Stage::ALL
            .into_iter()
            .filter(|stage| matcher.matches(&stage.as_str().to_ascii_lowercase()))
            .collect()
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Hook callback; an error rejects the operation
pub type HookFn = Arc<dyn Fn(&mut Scope) -> Result<(), EventError> + Send + Sync>;

/// One hook bound to a single stage
pub struct MetadataHook {
    pub pattern: String,
    pub stage: Stage,
    /// Field gate; empty means always fire
    pub fields: Vec<String>,
    pub junction: Junction,
    callback: HookFn,
}

impl fmt::Debug for MetadataHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetadataHook")
            .field("pattern", &self.pattern)
            .field("stage", &self.stage)
            .field("fields", &self.fields)
            .field("junction", &self.junction)
            .finish()
    }
}

impl MetadataHook {
    /// Whether the field gate lets this hook fire for the touched fields
    pub fn applies(&self, metadata: &Metadata, touched: &[String]) -> bool {
        if self.fields.is_empty() {
            return true;
        }
        let canonical = |name: &str| {
            metadata
                .field_by_name(name)
                .map(|f| f.name.clone())
                .unwrap_or_else(|| name.to_string())
        };
        let touched: Vec<String> = touched.iter().map(|f| canonical(f)).collect();
        let mut hits = self.fields.iter().map(|f| touched.contains(&canonical(f)));
        match self.junction {
            Junction::And => hits.all(|hit| hit),
            Junction::Or => hits.any(|hit| hit),
        }
    }

    pub fn call(&self, scope: &mut Scope) -> Result<(), EventError> {
        (self.callback)(scope)
    }
}

/// Parsed `"<namePattern>:<stage>[:<fields>]"`
#[derive(Debug, Clone, PartialEq)]
pub struct HookPattern {
    pub name: String,
    pub stages: Vec<Stage>,
    pub fields: Vec<String>,
    pub junction: Junction,
}

impl HookPattern {
    pub fn parse(pattern: &str) -> ModelResult<Self> {
        let invalid = |why: &str| {
            ModelError::Configuration(format!("invalid middleware pattern '{}': {}", pattern, why))
        };
        let parts: Vec<&str> = pattern.trim().split(':').map(str::trim).collect();
        if parts.len() < 2 || parts.len() > 3 {
            return Err(invalid("expected <name>:<stage>[:<fields>]"));
        }
        if parts[0].is_empty() {
            return Err(invalid("empty name pattern"));
        }

        let stages = Stage::matching(parts[1]);
        if stages.is_empty() {
            return Err(invalid("no lifecycle stage matches"));
        }

        let (fields, junction) = match parts.get(2).copied().filter(|f| !f.is_empty()) {
            None => (Vec::new(), Junction::And),
            Some(list) if list.contains('|') && list.contains(',') => {
                return Err(invalid("field list mixes ',' and '|'"))
            }
            Some(list) if list.contains('|') => (split_fields(list, '|'), Junction::Or),
            Some(list) => (split_fields(list, ','), Junction::And),
        };
        if fields.iter().any(String::is_empty) {
            return Err(invalid("empty field name"));
        }

        Ok(Self {
            name: parts[0].to_string(),
            stages,
            fields,
            junction,
        })
    }
}

fn split_fields(list: &str, sep: char) -> Vec<String> {
    list.split(sep).map(|f| f.trim().to_string()).collect()
}

/// Hook patterns and their per-metadata bindings
#[derive(Debug, Default)]
pub struct HookRegistry {
    hooks: Vec<Arc<MetadataHook>>,
    bound: HashMap<String, HashMap<Stage, Vec<Arc<MetadataHook>>>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a hook pattern and bind it to every known metadata name.
    /// Returns the number of stage hooks created.
    pub fn register<'a, I>(&mut self, pattern: &str, callback: HookFn, names: I) -> ModelResult<usize>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let parsed = HookPattern::parse(pattern)?;
        let created: Vec<Arc<MetadataHook>> = parsed
            .stages
            .iter()
            .map(|&stage| {
                Arc::new(MetadataHook {
                    pattern: parsed.name.clone(),
                    stage,
                    fields: parsed.fields.clone(),
                    junction: parsed.junction,
                    callback: Arc::clone(&callback),
                })
            })
            .collect();

        let matcher = WildMatch::new(&parsed.name);
        for name in names {
            if matcher.matches(name) {
                let stages = self.bound.entry(name.to_string()).or_default();
                for hook in &created {
                    stages.entry(hook.stage).or_default().push(Arc::clone(hook));
                }
            }
        }

        debug!(pattern = %pattern, stages = created.len(), "Registered metadata hook");
        let count = created.len();
        self.hooks.extend(created);
        Ok(count)
    }

    /// Rebuild the bindings of one metadata name from all patterns
    pub fn bind(&mut self, name: &str) {
        let mut stages: HashMap<Stage, Vec<Arc<MetadataHook>>> = HashMap::new();
        for hook in &self.hooks {
            if WildMatch::new(&hook.pattern).matches(name) {
                stages.entry(hook.stage).or_default().push(Arc::clone(hook));
            }
        }
        if stages.is_empty() {
            self.bound.remove(name);
        } else {
            self.bound.insert(name.to_string(), stages);
        }
    }

    pub fn unbind(&mut self, name: &str) {
        self.bound.remove(name);
    }

    /// Hooks for a metadata name and stage, in registration order
    pub fn hooks_for(&self, name: &str, stage: Stage) -> Vec<Arc<MetadataHook>> {
        self.bound
            .get(name)
            .and_then(|stages| stages.get(&stage))
            .cloned()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> HookFn {
        Arc::new(|_scope: &mut Scope| Ok(()))
    }

    #[test]
    fn test_parse_pattern_with_and_fields() {
        let parsed = HookPattern::parse("Member:beforeCreate:FirstName,LastName").unwrap();
        assert_eq!(parsed.name, "Member");
        assert_eq!(parsed.stages, vec![Stage::BeforeCreate]);
        assert_eq!(parsed.fields, vec!["FirstName", "LastName"]);
        assert_eq!(parsed.junction, Junction::And);
    }

    #[test]
    fn test_parse_pattern_with_or_fields() {
        let parsed = HookPattern::parse("*:AFTERSAVE:Email|Phone").unwrap();
        assert_eq!(parsed.stages, vec![Stage::AfterSave]);
        assert_eq!(parsed.junction, Junction::Or);
    }

    #[test]
    fn test_stage_glob_is_case_insensitive() {
        let stages = Stage::matching("BEFORE*");
        assert_eq!(stages.len(), 5);
        assert!(stages.iter().all(|s| s.as_str().starts_with("before")));
        assert_eq!(Stage::matching("*query"), vec![Stage::BeforeQuery, Stage::AfterQuery]);
    }

    #[test]
    fn test_invalid_patterns() {
        assert!(HookPattern::parse("Member").is_err());
        assert!(HookPattern::parse("Member:onLoad").is_err());
        assert!(HookPattern::parse(":beforeSave").is_err());
        assert!(HookPattern::parse("Member:beforeSave:A,B|C").is_err());
    }

    #[test]
    fn test_binding_and_retroactive_bind() {
        let mut registry = HookRegistry::new();
        let created = registry
            .register("Mem*:before*", noop(), ["Member", "Order"])
            .unwrap();
        assert_eq!(created, 5);
        assert_eq!(registry.hooks_for("Member", Stage::BeforeQuery).len(), 1);
        assert!(registry.hooks_for("Order", Stage::BeforeQuery).is_empty());

        assert!(registry.hooks_for("Memo", Stage::BeforeSave).is_empty());
        registry.bind("Memo");
        assert_eq!(registry.hooks_for("Memo", Stage::BeforeSave).len(), 1);
    }

    #[test]
    fn test_field_gate() {
        let meta = Metadata::builder("Member")
            .field(crate::metadata::Field::new("FirstName", crate::metadata::FieldType::String))
            .build()
            .unwrap();
        let hook = MetadataHook {
            pattern: "*".to_string(),
            stage: Stage::BeforeSave,
            fields: vec!["FirstName".to_string(), "LastName".to_string()],
            junction: Junction::And,
            callback: noop(),
        };
        assert!(!hook.applies(&meta, &["first_name".to_string()]));
        assert!(hook.applies(&meta, &["first_name".to_string(), "LastName".to_string()]));

        let any = MetadataHook {
            junction: Junction::Or,
            ..hook
        };
        assert!(any.applies(&meta, &["first_name".to_string()]));
        assert!(!any.applies(&meta, &["Email".to_string()]));
    }
}
