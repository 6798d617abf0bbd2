//! Document-store translation
//!
//! Conditions become an ordered list of `(field, value)` pairs where equality
//! is the bare value and every other operator is an operator sub-document
//! (`{"$gt": 5}`). Unions become `$and`/`$or` arrays of sub-documents.
//! [`DocumentFilter::matches`] evaluates a filter against a document, which
//! is what the in-memory backend runs on.

use std::cmp::Ordering;

use serde_json::{json, Map, Value};

use super::core::Document;
use crate::conditions::{
    resolve_field, Cond, ConditionTranslator, Conditional, Junction, Operator, RegexpLiteral,
};
use crate::error::ModelResult;
use crate::metadata::Metadata;

/// Native document-store filter
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentFilter(pub Vec<(String, Value)>);

impl DocumentFilter {
    /// Empty filter matches every document
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn entries(&self) -> &[(String, Value)] {
        &self.0
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.iter().cloned().collect::<Map<String, Value>>())
    }

    pub fn matches(&self, doc: &Document) -> bool {
        self.0.iter().all(|(key, cond)| match_entry(doc, key, cond))
    }
}

/// Translator for document stores
#[derive(Debug, Clone, Copy, Default)]
pub struct DocumentTranslator;

impl ConditionTranslator for DocumentTranslator {
    type Fragment = DocumentFilter;

    fn translate(
        &self,
        metadata: Option<&Metadata>,
        conditional: &Conditional,
    ) -> ModelResult<DocumentFilter> {
        conditional.validate()?;
        self.node(metadata, conditional).map(DocumentFilter)
    }
}

impl DocumentTranslator {
    fn node(&self, metadata: Option<&Metadata>, node: &Conditional) -> ModelResult<Vec<(String, Value)>> {
        match node {
            Conditional::Leaf(cond) => self.leaf(metadata, cond),
            Conditional::Combinator(union) => {
                let mut parts = Vec::with_capacity(union.children.len());
                let mut unrestricted = false;
                for child in &union.children {
                    let entries = self.node(metadata, child)?;
                    if entries.is_empty() {
                        unrestricted = true;
                        continue;
                    }
                    parts.push(Value::Object(entries.into_iter().collect()));
                }
                // an OR with a match-all branch matches everything
                if parts.is_empty() || (unrestricted && union.junction == Junction::Or) {
                    return Ok(Vec::new());
                }
                let key = match union.junction {
                    Junction::And => "$and",
                    Junction::Or => "$or",
                };
                Ok(vec![(key.to_string(), Value::Array(parts))])
            }
        }
    }

    fn leaf(&self, metadata: Option<&Metadata>, cond: &Cond) -> ModelResult<Vec<(String, Value)>> {
        let mut entries: Vec<(String, Value)> = Vec::with_capacity(cond.len());
        for cmp in cond.comparisons() {
            let field = resolve_field(metadata, &cmp.field);
            let value = match cmp.operator {
                Operator::Equal => cmp.value.clone(),
                Operator::NotEqual => json!({ "$ne": cmp.value }),
                Operator::GreaterThan => json!({ "$gt": cmp.value }),
                Operator::GreaterThanOrEqual => json!({ "$gte": cmp.value }),
                Operator::LessThan => json!({ "$lt": cmp.value }),
                Operator::LessThanOrEqual => json!({ "$lte": cmp.value }),
                Operator::Prefix => {
                    json!({ "$regex": format!("^{}", regex::escape(&operand_text(&cmp.value))) })
                }
                Operator::Suffix => {
                    json!({ "$regex": format!("{}$", regex::escape(&operand_text(&cmp.value))) })
                }
                Operator::Contains => {
                    json!({ "$regex": regex::escape(&operand_text(&cmp.value)) })
                }
                Operator::In | Operator::NotIn => {
                    let values = cmp.values();
                    if values.is_empty() {
                        // empty sets never match, for `nin` as well
                        json!({ "$in": [] })
                    } else if cmp.operator == Operator::In {
                        json!({ "$in": values })
                    } else {
                        json!({ "$nin": values })
                    }
                }
                Operator::Exists => json!({ "$exists": cmp.exists_flag() }),
                Operator::Regexp => {
                    let literal = RegexpLiteral::parse(&cmp.value)?;
                    if literal.flags.is_empty() {
                        json!({ "$regex": literal.pattern })
                    } else {
                        json!({ "$regex": literal.pattern, "$options": literal.flags })
                    }
                }
            };
            entries.push((field, value));
        }

        let mut seen = std::collections::HashSet::new();
        if entries.iter().all(|(k, _)| seen.insert(k.clone())) {
            return Ok(entries);
        }
        // the same native field twice: keep both predicates under $and
        let parts = entries
            .into_iter()
            .map(|(k, v)| {
                let mut doc = Map::new();
                doc.insert(k, v);
                Value::Object(doc)
            })
            .collect();
        Ok(vec![("$and".to_string(), Value::Array(parts))])
    }
}

fn operand_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn match_entry(doc: &Document, key: &str, cond: &Value) -> bool {
    match key {
        "$and" => cond
            .as_array()
            .map_or(false, |parts| parts.iter().all(|p| match_sub_document(doc, p))),
        "$or" => cond
            .as_array()
            .map_or(false, |parts| parts.iter().any(|p| match_sub_document(doc, p))),
        field => match_field(doc.get(field), cond),
    }
}

fn match_sub_document(doc: &Document, part: &Value) -> bool {
    part.as_object()
        .map_or(false, |entries| entries.iter().all(|(k, v)| match_entry(doc, k, v)))
}

fn match_field(actual: Option<&Value>, cond: &Value) -> bool {
    if let Value::Object(ops) = cond {
        if !ops.is_empty() && ops.keys().all(|k| k.starts_with('$')) {
            return match_operators(actual, ops);
        }
    }
    values_equal(actual.unwrap_or(&Value::Null), cond)
}

fn match_operators(actual: Option<&Value>, ops: &Map<String, Value>) -> bool {
    let value = actual.unwrap_or(&Value::Null);
    ops.iter().all(|(op, operand)| match op.as_str() {
        "$eq" => values_equal(value, operand),
        "$ne" => !values_equal(value, operand),
        "$gt" => compare(value, operand) == Some(Ordering::Greater),
        "$gte" => matches!(compare(value, operand), Some(Ordering::Greater | Ordering::Equal)),
        "$lt" => compare(value, operand) == Some(Ordering::Less),
        "$lte" => matches!(compare(value, operand), Some(Ordering::Less | Ordering::Equal)),
        "$in" => operand
            .as_array()
            .map_or(false, |set| set.iter().any(|v| values_equal(value, v))),
        "$nin" => operand
            .as_array()
            .map_or(true, |set| !set.iter().any(|v| values_equal(value, v))),
        "$exists" => {
            let present = !value.is_null();
            present == operand.as_bool().unwrap_or(true)
        }
        "$regex" => {
            let literal = RegexpLiteral {
                pattern: operand.as_str().unwrap_or_default().to_string(),
                flags: ops
                    .get("$options")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            };
            match (value.as_str(), literal.compile()) {
                (Some(text), Ok(re)) => re.is_match(text),
                _ => false,
            }
        }
        "$options" => true,
        _ => false,
    })
}

/// Equality with numeric widening; a scalar matches any element of an array field
pub fn values_equal(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        (Value::Array(items), scalar) if !scalar.is_array() => {
            items.iter().any(|item| values_equal(item, scalar))
        }
        (a, b) => a == b,
    }
}

/// Ordering between comparable scalars; `None` when the kinds differ
pub fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conditions::{and, or};
    use crate::metadata::{Field, FieldType};

    fn meta() -> Metadata {
        Metadata::builder("Member")
            .field(Field::new("FirstName", FieldType::String))
            .field(Field::new("Age", FieldType::Int))
            .build()
            .unwrap()
    }

    fn translate(cond: impl Into<Conditional>) -> DocumentFilter {
        DocumentTranslator.translate(Some(&meta()), &cond.into()).unwrap()
    }

    #[test]
    fn test_each_operator_fragment() {
        let cases: Vec<(Cond, Value)> = vec![
            (Cond::new().eq("Age", 5), json!({"age": 5})),
            (Cond::new().ne("Age", 5), json!({"age": {"$ne": 5}})),
            (Cond::new().gt("Age", 5), json!({"age": {"$gt": 5}})),
            (Cond::new().gte("Age", 5), json!({"age": {"$gte": 5}})),
            (Cond::new().lt("Age", 5), json!({"age": {"$lt": 5}})),
            (Cond::new().lte("Age", 5), json!({"age": {"$lte": 5}})),
            (Cond::new().prefix("FirstName", "Ea"), json!({"first_name": {"$regex": "^Ea"}})),
            (Cond::new().suffix("FirstName", "on"), json!({"first_name": {"$regex": "on$"}})),
            (Cond::new().contains("FirstName", "a.s"), json!({"first_name": {"$regex": "a\\.s"}})),
            (Cond::new().is_in("Age", [1, 2]), json!({"age": {"$in": [1, 2]}})),
            (Cond::new().not_in("Age", [1]), json!({"age": {"$nin": [1]}})),
            (Cond::new().exists("Age", false), json!({"age": {"$exists": false}})),
            (
                Cond::new().regexp("FirstName", "/^ea/i"),
                json!({"first_name": {"$regex": "^ea", "$options": "i"}}),
            ),
        ];
        for (cond, expected) in cases {
            assert_eq!(translate(cond.clone()).to_value(), expected, "{:?}", cond);
        }
    }

    #[test]
    fn test_unknown_fields_pass_through() {
        let filter = translate(Cond::new().eq("_id", 3));
        assert_eq!(filter.entries()[0].0, "_id");
    }

    #[test]
    fn test_union_nesting_preserves_order() {
        let tree = and([
            Conditional::from(or([Cond::new().eq("a", 1), Cond::new().eq("a", 2)])),
            Conditional::from(Cond::new().eq("b", 3)),
        ]);
        assert_eq!(
            translate(tree).to_value(),
            json!({"$and": [{"$or": [{"a": 1}, {"a": 2}]}, {"b": 3}]})
        );
    }

    #[test]
    fn test_empty_filter_and_empty_sets() {
        assert!(translate(Cond::new()).is_empty());

        let doc: Document = json!({"x": 1}).as_object().unwrap().clone();
        for cond in [Cond::new().is_in("x", Vec::<i32>::new()), Cond::new().not_in("x", Vec::<i32>::new())] {
            let filter = translate(cond);
            assert_eq!(filter.to_value(), json!({"x": {"$in": []}}));
            assert!(!filter.matches(&doc));
        }
    }

    #[test]
    fn test_or_with_match_all_branch() {
        let tree = or([Cond::new().eq("a", 1), Cond::new()]);
        assert!(translate(tree).is_empty());
    }

    #[test]
    fn test_translation_errors_before_execution() {
        let bad = Cond::new().regexp("FirstName", "/(/");
        assert!(DocumentTranslator.translate(None, &bad.into()).is_err());
        let bad_key = Cond::new().with("Age ~~", 1);
        assert!(DocumentTranslator.translate(None, &bad_key.into()).is_err());
    }

    #[test]
    fn test_duplicate_field_goes_under_and() {
        let filter = translate(Cond::new().gt("Age", 1).with("age <", 9));
        assert_eq!(
            filter.to_value(),
            json!({"$and": [{"age": {"$gt": 1}}, {"age": {"$lt": 9}}]})
        );
    }

    #[test]
    fn test_matching_semantics() {
        let doc: Document = json!({"first_name": "Eason", "age": 30, "deleted_at": null})
            .as_object()
            .unwrap()
            .clone();
        let cases = vec![
            (Cond::new().eq("FirstName", "Eason"), true),
            (Cond::new().gt("Age", 29.5), true),
            (Cond::new().lte("Age", 29), false),
            (Cond::new().prefix("FirstName", "Ea"), true),
            (Cond::new().prefix("FirstName", "ea"), false),
            (Cond::new().regexp("FirstName", "/^ea/i"), true),
            (Cond::new().exists("DeletedAt", false), true),
            (Cond::new().exists("Age", true), true),
            (Cond::new().not_in("Age", [1, 2]), true),
            (Cond::new().ne("Missing", 1), true),
        ];
        for (cond, expected) in cases {
            assert_eq!(translate(cond.clone()).matches(&doc), expected, "{:?}", cond);
        }
    }
}
