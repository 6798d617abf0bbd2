//! Soft-delete rules bound to metadata by name pattern
//!
//! A rule rewrites deletes into updates (`set`) and adds a liveness predicate
//! to reads (`get`). When several patterns match a name, the most specific
//! wins: an exact name beats any glob, and a glob beats `"*"`. Between equally
//! specific patterns the earlier registration is kept.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};
use tracing::debug;
use wildmatch::WildMatch;

use crate::conditions::Cond;
use crate::error::{ModelError, ModelResult};

/// Value template applied on delete
#[derive(Debug, Clone, PartialEq)]
pub enum SetValue {
    Literal(Value),
    /// Current epoch seconds
    Now,
    /// Current RFC 3339 timestamp
    NowIso,
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl SetValue {
    /// Parse `$now`, `$now_iso`, `$int(n)`, `$float(n)`, `$bool(b)` or a literal
    pub fn parse(template: &str) -> ModelResult<Self> {
        let trimmed = template.trim();
        match trimmed {
            "$now" | "$ts" => return Ok(Self::Now),
            "$now_iso" | "$iso" => return Ok(Self::NowIso),
            _ => {}
        }

        let typed = |prefix: &str| {
            trimmed
                .strip_prefix(prefix)
                .and_then(|rest| rest.strip_suffix(')'))
                .map(str::trim)
        };
        let invalid = |kind: &str, raw: &str| {
            ModelError::Configuration(format!("invalid {} template value '{}'", kind, raw))
        };

        if let Some(raw) = typed("$int(") {
            return raw.parse().map(Self::Int).map_err(|_| invalid("$int", raw));
        }
        if let Some(raw) = typed("$float(") {
            return raw.parse().map(Self::Float).map_err(|_| invalid("$float", raw));
        }
        if let Some(raw) = typed("$bool(") {
            return raw.parse().map(Self::Bool).map_err(|_| invalid("$bool", raw));
        }
        Ok(Self::Literal(Value::String(template.to_string())))
    }

    pub fn render(&self) -> Value {
        match self {
            Self::Literal(value) => value.clone(),
            Self::Now => Value::from(Utc::now().timestamp()),
            Self::NowIso => Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)),
            Self::Int(v) => Value::from(*v),
            Self::Float(v) => Value::from(*v),
            Self::Bool(v) => Value::Bool(*v),
        }
    }
}

/// Soft-delete policy
#[derive(Debug, Clone, PartialEq)]
pub struct LogicDeleteRule {
    pub set: Vec<(String, SetValue)>,
    pub get: Cond,
}

impl LogicDeleteRule {
    /// Rule whose reads only see records matching `get`
    pub fn new(get: Cond) -> Self {
        Self {
            set: Vec::new(),
            get,
        }
    }

    /// Add a templated assignment, e.g. `("DeletedAt", "$now")`
    pub fn set(mut self, field: &str, template: &str) -> ModelResult<Self> {
        let value = SetValue::parse(template)?;
        self.set.push((field.to_string(), value));
        Ok(self)
    }

    pub fn set_value(mut self, field: &str, value: SetValue) -> Self {
        self.set.push((field.to_string(), value));
        self
    }

    /// Update document applied instead of a physical delete
    pub fn render_set(&self) -> Map<String, Value> {
        self.set
            .iter()
            .map(|(field, value)| (field.clone(), value.render()))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Specificity {
    Wildcard,
    Glob,
    Exact,
}

fn specificity(pattern: &str, name: &str) -> Option<Specificity> {
    if pattern == name {
        Some(Specificity::Exact)
    } else if pattern == "*" {
        Some(Specificity::Wildcard)
    } else if WildMatch::new(pattern).matches(name) {
        Some(Specificity::Glob)
    } else {
        None
    }
}

#[derive(Debug)]
struct PatternRule {
    pattern: String,
    rule: Arc<LogicDeleteRule>,
}

/// Pattern registry with per-name bindings
#[derive(Debug, Default)]
pub struct LogicDeleteRegistry {
    patterns: Vec<PatternRule>,
    bound: HashMap<String, usize>,
}

impl LogicDeleteRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a rule and rebind every known metadata name
    pub fn register<'a, I>(&mut self, pattern: &str, rule: LogicDeleteRule, names: I)
    where
        I: IntoIterator<Item = &'a str>,
    {
        let rule = Arc::new(rule);
        match self.patterns.iter_mut().find(|p| p.pattern == pattern) {
            Some(existing) => existing.rule = rule,
            None => self.patterns.push(PatternRule {
                pattern: pattern.to_string(),
                rule,
            }),
        }
        for name in names {
            self.bind(name);
        }
    }

    /// Recompute the binding of one metadata name
    pub fn bind(&mut self, name: &str) {
        let mut best: Option<(Specificity, usize)> = None;
        for (idx, entry) in self.patterns.iter().enumerate() {
            if let Some(spec) = specificity(&entry.pattern, name) {
                // strictly greater: equal specificity keeps the earlier pattern
                if best.map_or(true, |(current, _)| spec > current) {
                    best = Some((spec, idx));
                }
            }
        }
        match best {
            Some((_, idx)) => {
                debug!(metadata = name, pattern = %self.patterns[idx].pattern, "Bound logic delete rule");
                self.bound.insert(name.to_string(), idx);
            }
            None => {
                self.bound.remove(name);
            }
        }
    }

    pub fn unbind(&mut self, name: &str) {
        self.bound.remove(name);
    }

    /// Rule in effect for a metadata name
    pub fn resolve(&self, name: &str) -> Option<Arc<LogicDeleteRule>> {
        self.bound
            .get(name)
            .and_then(|&idx| self.patterns.get(idx))
            .map(|p| Arc::clone(&p.rule))
    }

    /// Pattern that produced the binding for a name
    pub fn resolved_pattern(&self, name: &str) -> Option<&str> {
        self.bound
            .get(name)
            .and_then(|&idx| self.patterns.get(idx))
            .map(|p| p.pattern.as_str())
    }
}
