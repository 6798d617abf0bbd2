//! Leaf predicates

use serde_json::Value;

use super::operator::Operator;
use crate::error::{ModelError, ModelResult};

/// One `field operator value` predicate
#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    pub field: String,
    pub operator: Operator,
    pub value: Value,
}

impl Comparison {
    pub fn new(field: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            operator,
            value: value.into(),
        }
    }

    /// Values of a set operator; a scalar counts as a one-element set
    pub fn values(&self) -> Vec<Value> {
        match &self.value {
            Value::Array(items) => items.clone(),
            Value::Null => Vec::new(),
            other => vec![other.clone()],
        }
    }

    /// Boolean operand of `exists`; anything but `false`/`0`/null means true
    pub fn exists_flag(&self) -> bool {
        match &self.value {
            Value::Bool(b) => *b,
            Value::Null => false,
            Value::Number(n) => n.as_f64().map(|v| v != 0.0).unwrap_or(true),
            Value::String(s) => !matches!(s.as_str(), "false" | "0" | ""),
            _ => true,
        }
    }
}

/// A leaf predicate: all comparisons must hold.
///
/// Keys are unique per `(field, operator)`; setting the same pair twice
/// replaces the earlier value. Keys written in the string form
/// `"<field>[ <operator>]"` that fail to parse are kept aside and reported by
/// [`Cond::validate`], which every translator calls first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Cond {
    comparisons: Vec<Comparison>,
    invalid: Vec<String>,
}

impl Cond {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `(key, value)` pairs in the string form
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        pairs
            .into_iter()
            .fold(Self::new(), |cond, (key, value)| cond.with(key.as_ref(), value))
    }

    /// Split `"<field> <operator>"` into its parts
    pub fn parse_key(key: &str) -> ModelResult<(String, Operator)> {
        let key = key.trim();
        let (field, token) = match key.split_once(char::is_whitespace) {
            Some((field, token)) => (field, token.trim()),
            None => (key, ""),
        };
        if field.is_empty() {
            return Err(ModelError::Query(format!("empty field in condition key '{}'", key)));
        }
        Ok((field.to_string(), Operator::parse(token)?))
    }

    /// Add a predicate written in the string form
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        match Self::parse_key(key) {
            Ok((field, operator)) => self.push(Comparison {
                field,
                operator,
                value: value.into(),
            }),
            Err(err) => self.invalid.push(err.to_string()),
        }
        self
    }

    /// Like [`Cond::with`] but fails immediately on a malformed key
    pub fn try_with(mut self, key: &str, value: impl Into<Value>) -> ModelResult<Self> {
        let (field, operator) = Self::parse_key(key)?;
        self.push(Comparison {
            field,
            operator,
            value: value.into(),
        });
        Ok(self)
    }

    pub fn compare(mut self, field: &str, operator: Operator, value: impl Into<Value>) -> Self {
        self.push(Comparison::new(field, operator, value));
        self
    }

    pub fn eq(self, field: &str, value: impl Into<Value>) -> Self {
        self.compare(field, Operator::Equal, value)
    }

    pub fn ne(self, field: &str, value: impl Into<Value>) -> Self {
        self.compare(field, Operator::NotEqual, value)
    }

    pub fn gt(self, field: &str, value: impl Into<Value>) -> Self {
        self.compare(field, Operator::GreaterThan, value)
    }

    pub fn gte(self, field: &str, value: impl Into<Value>) -> Self {
        self.compare(field, Operator::GreaterThanOrEqual, value)
    }

    pub fn lt(self, field: &str, value: impl Into<Value>) -> Self {
        self.compare(field, Operator::LessThan, value)
    }

    pub fn lte(self, field: &str, value: impl Into<Value>) -> Self {
        self.compare(field, Operator::LessThanOrEqual, value)
    }

    pub fn prefix(self, field: &str, value: impl Into<String>) -> Self {
        self.compare(field, Operator::Prefix, Value::String(value.into()))
    }

    pub fn suffix(self, field: &str, value: impl Into<String>) -> Self {
        self.compare(field, Operator::Suffix, Value::String(value.into()))
    }

    pub fn contains(self, field: &str, value: impl Into<String>) -> Self {
        self.compare(field, Operator::Contains, Value::String(value.into()))
    }

    pub fn is_in<I, V>(self, field: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let values: Vec<Value> = values.into_iter().map(Into::into).collect();
        self.compare(field, Operator::In, Value::Array(values))
    }

    pub fn not_in<I, V>(self, field: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let values: Vec<Value> = values.into_iter().map(Into::into).collect();
        self.compare(field, Operator::NotIn, Value::Array(values))
    }

    pub fn exists(self, field: &str, present: bool) -> Self {
        self.compare(field, Operator::Exists, Value::Bool(present))
    }

    /// Bare pattern or `/pattern/flags` literal
    pub fn regexp(self, field: &str, pattern: impl Into<String>) -> Self {
        self.compare(field, Operator::Regexp, Value::String(pattern.into()))
    }

    pub fn comparisons(&self) -> &[Comparison] {
        &self.comparisons
    }

    pub fn get(&self, field: &str, operator: Operator) -> Option<&Value> {
        self.comparisons
            .iter()
            .find(|c| c.field == field && c.operator == operator)
            .map(|c| &c.value)
    }

    /// Fields referenced with a non-null value
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.comparisons
            .iter()
            .filter(|c| !c.value.is_null())
            .map(|c| c.field.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.comparisons.is_empty() && self.invalid.is_empty()
    }

    pub fn len(&self) -> usize {
        self.comparisons.len()
    }

    /// Report keys that failed to parse
    pub fn validate(&self) -> ModelResult<()> {
        match self.invalid.as_slice() {
            [] => Ok(()),
            [one] => Err(ModelError::Query(one.clone())),
            many => Err(ModelError::Query(many.join("; "))),
        }
    }

    fn push(&mut self, comparison: Comparison) {
        match self
            .comparisons
            .iter_mut()
            .find(|c| c.field == comparison.field && c.operator == comparison.operator)
        {
            Some(existing) => existing.value = comparison.value,
            None => self.comparisons.push(comparison),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_string_keys_default_to_equality() {
        let cond = Cond::new().with("FirstName", "Eason").with("Age >=", 18);
        assert_eq!(cond.len(), 2);
        assert_eq!(cond.comparisons()[0].operator, Operator::Equal);
        assert_eq!(cond.get("Age", Operator::GreaterThanOrEqual), Some(&json!(18)));
        assert!(cond.validate().is_ok());
    }

    #[test]
    fn test_same_key_replaces_value() {
        let cond = Cond::new().eq("Name", "a").with("Name =", "b").gt("Name", "c");
        assert_eq!(cond.len(), 2);
        assert_eq!(cond.get("Name", Operator::Equal), Some(&json!("b")));
    }

    #[test]
    fn test_malformed_key_surfaces_on_validate() {
        let cond = Cond::new().with("Age between", json!([1, 2]));
        assert!(!cond.is_empty());
        assert!(matches!(cond.validate(), Err(ModelError::Query(_))));
        assert!(Cond::new().try_with(" >", 1).is_err());
    }

    #[test]
    fn test_set_values_accept_scalars() {
        let cond = Cond::new().with("Id in", 7).is_in("Tag", Vec::<String>::new());
        assert_eq!(cond.comparisons()[0].values(), vec![json!(7)]);
        assert!(cond.comparisons()[1].values().is_empty());
    }

    #[test]
    fn test_fields_skip_null_values() {
        let cond = Cond::from_pairs([("Name", json!("x")), ("Email", Value::Null)]);
        assert_eq!(cond.fields().collect::<Vec<_>>(), vec!["Name"]);
    }

    #[test]
    fn test_exists_flag() {
        assert!(!Comparison::new("a", Operator::Exists, false).exists_flag());
        assert!(Comparison::new("a", Operator::Exists, 1).exists_flag());
        assert!(!Comparison::new("a", Operator::Exists, "false").exists_flag());
    }
}
