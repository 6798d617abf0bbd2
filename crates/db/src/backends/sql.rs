//! Relational translation and statement building
//!
//! Conditions become parameterized SQL text plus a positional argument list in
//! left-to-right order. Unions are parenthesized `AND`/`OR` clauses.

use serde_json::Value;

use super::core::{Document, FindQuery, SqlDialect};
use crate::conditions::{
    resolve_field, Cond, ConditionTranslator, Conditional, Junction, Operator, RegexpLiteral,
    SortDirection,
};
use crate::error::{ModelError, ModelResult};
use crate::metadata::Metadata;

/// SQL text with its bound arguments; empty text means "no restriction"
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SqlFragment {
    pub sql: String,
    pub args: Vec<Value>,
}

impl SqlFragment {
    pub fn is_empty(&self) -> bool {
        self.sql.is_empty()
    }
}

/// Translator for relational backends
#[derive(Debug, Clone, Copy)]
pub struct SqlTranslator {
    dialect: SqlDialect,
    offset: usize,
}

impl SqlTranslator {
    pub fn new(dialect: SqlDialect) -> Self {
        Self { dialect, offset: 0 }
    }

    /// Number placeholders after `offset` already-bound arguments
    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    fn bind(&self, args: &mut Vec<Value>, value: Value) -> String {
        args.push(value);
        self.dialect.parameter_placeholder(self.offset + args.len() - 1)
    }

    fn node(&self, metadata: Option<&Metadata>, node: &Conditional, args: &mut Vec<Value>) -> ModelResult<String> {
        match node {
            Conditional::Leaf(cond) => self.leaf(metadata, cond, args),
            Conditional::Combinator(union) => {
                let mark = args.len();
                let mut parts = Vec::with_capacity(union.children.len());
                let mut unrestricted = false;
                for child in &union.children {
                    let sql = self.node(metadata, child, args)?;
                    if sql.is_empty() {
                        unrestricted = true;
                    } else {
                        parts.push(format!("({})", sql));
                    }
                }
                if parts.is_empty() || (unrestricted && union.junction == Junction::Or) {
                    args.truncate(mark);
                    return Ok(String::new());
                }
                let glue = match union.junction {
                    Junction::And => " AND ",
                    Junction::Or => " OR ",
                };
                Ok(parts.join(glue))
            }
        }
    }

    fn leaf(&self, metadata: Option<&Metadata>, cond: &Cond, args: &mut Vec<Value>) -> ModelResult<String> {
        let mut clauses = Vec::with_capacity(cond.len());
        for cmp in cond.comparisons() {
            let column = self.dialect.quote(&resolve_field(metadata, &cmp.field));
            let clause = match cmp.operator {
                Operator::Equal if cmp.value.is_null() => format!("{} IS NULL", column),
                Operator::NotEqual if cmp.value.is_null() => format!("{} IS NOT NULL", column),
                Operator::Equal => format!("{} = {}", column, self.bind(args, cmp.value.clone())),
                Operator::NotEqual => format!("{} <> {}", column, self.bind(args, cmp.value.clone())),
                Operator::GreaterThan => format!("{} > {}", column, self.bind(args, cmp.value.clone())),
                Operator::GreaterThanOrEqual => {
                    format!("{} >= {}", column, self.bind(args, cmp.value.clone()))
                }
                Operator::LessThan => format!("{} < {}", column, self.bind(args, cmp.value.clone())),
                Operator::LessThanOrEqual => {
                    format!("{} <= {}", column, self.bind(args, cmp.value.clone()))
                }
                Operator::Prefix | Operator::Suffix | Operator::Contains => {
                    let text = like_escape(&operand_text(&cmp.value));
                    let pattern = match cmp.operator {
                        Operator::Prefix => format!("{}%", text),
                        Operator::Suffix => format!("%{}", text),
                        _ => format!("%{}%", text),
                    };
                    format!(
                        "{} LIKE {} ESCAPE '\\'",
                        column,
                        self.bind(args, Value::String(pattern))
                    )
                }
                Operator::In | Operator::NotIn => {
                    let values = cmp.values();
                    if values.is_empty() {
                        // empty sets never match, for NOT IN as well
                        "1 = 0".to_string()
                    } else {
                        let placeholders: Vec<String> =
                            values.into_iter().map(|v| self.bind(args, v)).collect();
                        let keyword = if cmp.operator == Operator::In { "IN" } else { "NOT IN" };
                        format!("{} {} ({})", column, keyword, placeholders.join(", "))
                    }
                }
                Operator::Exists => {
                    if cmp.exists_flag() {
                        format!("{} IS NOT NULL", column)
                    } else {
                        format!("{} IS NULL", column)
                    }
                }
                Operator::Regexp => {
                    let literal = RegexpLiteral::parse(&cmp.value)?;
                    if let Some(flag) = literal.flags.chars().find(|f| *f != 'i') {
                        return Err(ModelError::Query(format!(
                            "regexp flag '{}' is not supported by SQL backends",
                            flag
                        )));
                    }
                    let op = self.dialect.regexp_operator(literal.has_flag('i'));
                    format!("{} {} {}", column, op, self.bind(args, Value::String(literal.pattern)))
                }
            };
            clauses.push(clause);
        }
        Ok(clauses.join(" AND "))
    }
}

impl ConditionTranslator for SqlTranslator {
    type Fragment = SqlFragment;

    fn translate(&self, metadata: Option<&Metadata>, conditional: &Conditional) -> ModelResult<SqlFragment> {
        conditional.validate()?;
        let mut args = Vec::new();
        let sql = self.node(metadata, conditional, &mut args)?;
        Ok(SqlFragment { sql, args })
    }
}

fn operand_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Escape LIKE wildcards with backslash
pub fn like_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Builds complete statements for one dialect
#[derive(Debug, Clone, Copy)]
pub struct StatementBuilder {
    dialect: SqlDialect,
}

impl StatementBuilder {
    pub fn new(dialect: SqlDialect) -> Self {
        Self { dialect }
    }

    fn table(&self, metadata: &Metadata) -> String {
        self.dialect.quote(&metadata.native_name)
    }

    /// Placeholder for a written value. Nulls are inlined since an untyped
    /// null parameter does not coerce to every column type.
    fn value(&self, args: &mut Vec<Value>, value: &Value) -> String {
        if value.is_null() {
            return "NULL".to_string();
        }
        args.push(value.clone());
        self.dialect.parameter_placeholder(args.len() - 1)
    }

    fn where_clause(&self, fragment: &SqlFragment) -> String {
        if fragment.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", fragment.sql)
        }
    }

    pub fn select(&self, metadata: &Metadata, query: &FindQuery) -> ModelResult<SqlFragment> {
        let filter = SqlTranslator::new(self.dialect).translate(Some(metadata), &query.filter)?;
        let columns = if query.projection.is_empty() {
            "*".to_string()
        } else {
            query
                .projection
                .iter()
                .map(|c| self.dialect.quote(c))
                .collect::<Vec<_>>()
                .join(", ")
        };

        let mut sql = format!("SELECT {} FROM {}{}", columns, self.table(metadata), self.where_clause(&filter));
        if !query.order.is_empty() {
            let order: Vec<String> = query
                .order
                .iter()
                .map(|o| {
                    let dir = match o.direction {
                        SortDirection::Asc => "ASC",
                        SortDirection::Desc => "DESC",
                    };
                    format!("{} {}", self.dialect.quote(&o.field), dir)
                })
                .collect();
            sql.push_str(&format!(" ORDER BY {}", order.join(", ")));
        }
        if let Some(limit) = query.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }
        if let Some(skip) = query.skip.filter(|s| *s > 0) {
            sql.push_str(&format!(" OFFSET {}", skip));
        }
        Ok(SqlFragment { sql, args: filter.args })
    }

    pub fn count(&self, metadata: &Metadata, filter: &Conditional) -> ModelResult<SqlFragment> {
        let filter = SqlTranslator::new(self.dialect).translate(Some(metadata), filter)?;
        Ok(SqlFragment {
            sql: format!(
                "SELECT COUNT(*) AS count FROM {}{}",
                self.table(metadata),
                self.where_clause(&filter)
            ),
            args: filter.args,
        })
    }

    pub fn insert(&self, metadata: &Metadata, doc: &Document, returning: Option<&str>) -> SqlFragment {
        let mut args = Vec::with_capacity(doc.len());
        let mut sql = if doc.is_empty() {
            format!("INSERT INTO {} DEFAULT VALUES", self.table(metadata))
        } else {
            let columns: Vec<String> = doc.keys().map(|k| self.dialect.quote(k)).collect();
            let placeholders: Vec<String> = doc.values().map(|v| self.value(&mut args, v)).collect();
            format!(
                "INSERT INTO {} ({}) VALUES ({})",
                self.table(metadata),
                columns.join(", "),
                placeholders.join(", ")
            )
        };
        if let Some(column) = returning {
            sql.push_str(&format!(" RETURNING {}", self.dialect.quote(column)));
        }
        SqlFragment { sql, args }
    }

    pub fn update(
        &self,
        metadata: &Metadata,
        filter: &Conditional,
        set: &Document,
        multi: bool,
    ) -> ModelResult<SqlFragment> {
        if set.is_empty() {
            return Err(ModelError::Query(format!(
                "update of '{}' has no fields to set",
                metadata.name
            )));
        }
        let mut args = Vec::with_capacity(set.len());
        let assignments: Vec<String> = set
            .iter()
            .map(|(k, v)| format!("{} = {}", self.dialect.quote(k), self.value(&mut args, v)))
            .collect();
        let filter = SqlTranslator::new(self.dialect)
            .with_offset(args.len())
            .translate(Some(metadata), filter)?;
        let sql = format!(
            "UPDATE {} SET {}{}",
            self.table(metadata),
            assignments.join(", "),
            self.target_clause(metadata, &filter, multi)
        );
        args.extend(filter.args);
        Ok(SqlFragment { sql, args })
    }

    pub fn delete(&self, metadata: &Metadata, filter: &Conditional, multi: bool) -> ModelResult<SqlFragment> {
        let filter = SqlTranslator::new(self.dialect).translate(Some(metadata), filter)?;
        Ok(SqlFragment {
            sql: format!(
                "DELETE FROM {}{}",
                self.table(metadata),
                self.target_clause(metadata, &filter, multi)
            ),
            args: filter.args,
        })
    }

    /// WHERE clause restricted to a single row when `multi` is false
    fn target_clause(&self, metadata: &Metadata, filter: &SqlFragment, multi: bool) -> String {
        if multi {
            return self.where_clause(filter);
        }
        let row_id = match self.dialect {
            SqlDialect::PostgreSQL => "ctid",
            SqlDialect::SQLite => "rowid",
            SqlDialect::MySQL => return format!("{} LIMIT 1", self.where_clause(filter)),
        };
        format!(
            " WHERE {} IN (SELECT {} FROM {}{} LIMIT 1)",
            row_id,
            row_id,
            self.table(metadata),
            self.where_clause(filter)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::core::NativeOrder;
    use crate::conditions::{and, or};
    use crate::metadata::{Field, FieldType};
    use serde_json::json;

    fn meta() -> Metadata {
        Metadata::builder("Member")
            .field(Field::new("FirstName", FieldType::String))
            .field(Field::new("Age", FieldType::Int))
            .build()
            .unwrap()
    }

    fn pg(cond: impl Into<Conditional>) -> SqlFragment {
        SqlTranslator::new(SqlDialect::PostgreSQL)
            .translate(Some(&meta()), &cond.into())
            .unwrap()
    }

    #[test]
    fn test_each_operator_clause() {
        let cases: Vec<(Cond, &str, Vec<Value>)> = vec![
            (Cond::new().eq("Age", 5), "\"age\" = $1", vec![json!(5)]),
            (Cond::new().ne("Age", 5), "\"age\" <> $1", vec![json!(5)]),
            (Cond::new().gt("Age", 5), "\"age\" > $1", vec![json!(5)]),
            (Cond::new().gte("Age", 5), "\"age\" >= $1", vec![json!(5)]),
            (Cond::new().lt("Age", 5), "\"age\" < $1", vec![json!(5)]),
            (Cond::new().lte("Age", 5), "\"age\" <= $1", vec![json!(5)]),
            (
                Cond::new().prefix("FirstName", "Ea_"),
                "\"first_name\" LIKE $1 ESCAPE '\\'",
                vec![json!("Ea\\_%")],
            ),
            (
                Cond::new().suffix("FirstName", "on"),
                "\"first_name\" LIKE $1 ESCAPE '\\'",
                vec![json!("%on")],
            ),
            (
                Cond::new().contains("FirstName", "as"),
                "\"first_name\" LIKE $1 ESCAPE '\\'",
                vec![json!("%as%")],
            ),
            (Cond::new().is_in("Age", [1, 2]), "\"age\" IN ($1, $2)", vec![json!(1), json!(2)]),
            (Cond::new().not_in("Age", [3]), "\"age\" NOT IN ($1)", vec![json!(3)]),
            (Cond::new().exists("Age", true), "\"age\" IS NOT NULL", vec![]),
            (Cond::new().exists("Age", false), "\"age\" IS NULL", vec![]),
            (Cond::new().eq("Age", Value::Null), "\"age\" IS NULL", vec![]),
            (
                Cond::new().regexp("FirstName", "/^ea/i"),
                "\"first_name\" ~* $1",
                vec![json!("^ea")],
            ),
        ];
        for (cond, sql, args) in cases {
            let fragment = pg(cond);
            assert_eq!(fragment.sql, sql);
            assert_eq!(fragment.args, args);
        }
    }

    #[test]
    fn test_union_nesting_and_argument_order() {
        let tree = and([
            Conditional::from(or([Cond::new().eq("a", 1), Cond::new().eq("a", 2)])),
            Conditional::from(Cond::new().eq("b", 3)),
        ]);
        let fragment = pg(tree);
        assert_eq!(fragment.sql, "((\"a\" = $1) OR (\"a\" = $2)) AND (\"b\" = $3)");
        assert_eq!(fragment.args, vec![json!(1), json!(2), json!(3)]);
    }

    #[test]
    fn test_empty_filter_and_empty_sets() {
        assert!(pg(Cond::new()).is_empty());
        assert_eq!(pg(Cond::new().is_in("x", Vec::<i32>::new())).sql, "1 = 0");
        assert_eq!(pg(Cond::new().not_in("x", Vec::<i32>::new())).sql, "1 = 0");
    }

    #[test]
    fn test_unrestricted_or_drops_its_arguments() {
        let tree = and([
            Conditional::from(or([Cond::new().eq("a", 1), Cond::new()])),
            Conditional::from(Cond::new().eq("b", 2)),
        ]);
        let fragment = pg(tree);
        assert_eq!(fragment.sql, "(\"b\" = $1)");
        assert_eq!(fragment.args, vec![json!(2)]);
    }

    #[test]
    fn test_mysql_placeholders_and_regexp_flags() {
        let fragment = SqlTranslator::new(SqlDialect::MySQL)
            .translate(None, &Cond::new().eq("a", 1).gt("b", 2).into())
            .unwrap();
        assert_eq!(fragment.sql, "`a` = ? AND `b` > ?");

        let err = SqlTranslator::new(SqlDialect::MySQL)
            .translate(None, &Cond::new().regexp("a", "/x/m").into())
            .unwrap_err();
        assert!(matches!(err, ModelError::Query(_)));
    }

    #[test]
    fn test_select_statement() {
        let mut query = FindQuery::new(Cond::new().eq("FirstName", "Eason").into())
            .limit(10)
            .skip(20);
        query.projection = vec!["first_name".to_string()];
        query.order = vec![NativeOrder {
            field: "age".to_string(),
            direction: SortDirection::Desc,
        }];
        let stmt = StatementBuilder::new(SqlDialect::PostgreSQL)
            .select(&meta(), &query)
            .unwrap();
        assert_eq!(
            stmt.sql,
            "SELECT \"first_name\" FROM \"member\" WHERE \"first_name\" = $1 ORDER BY \"age\" DESC LIMIT 10 OFFSET 20"
        );
    }

    #[test]
    fn test_update_numbers_filter_after_assignments() {
        let set: Document = json!({"age": 31}).as_object().unwrap().clone();
        let stmt = StatementBuilder::new(SqlDialect::PostgreSQL)
            .update(&meta(), &Cond::new().eq("FirstName", "Daniel").into(), &set, false)
            .unwrap();
        assert_eq!(
            stmt.sql,
            "UPDATE \"member\" SET \"age\" = $1 WHERE ctid IN (SELECT ctid FROM \"member\" WHERE \"first_name\" = $2 LIMIT 1)"
        );
        assert_eq!(stmt.args, vec![json!(31), json!("Daniel")]);
    }

    #[test]
    fn test_insert_and_delete_statements() {
        let doc: Document = json!({"first_name": "Eason", "age": 30}).as_object().unwrap().clone();
        let builder = StatementBuilder::new(SqlDialect::PostgreSQL);
        let insert = builder.insert(&meta(), &doc, Some("id"));
        assert_eq!(
            insert.sql,
            "INSERT INTO \"member\" (\"first_name\", \"age\") VALUES ($1, $2) RETURNING \"id\""
        );

        let delete = builder.delete(&meta(), &Cond::new().into(), true).unwrap();
        assert_eq!(delete.sql, "DELETE FROM \"member\"");
    }

    #[test]
    fn test_null_values_are_written_inline() {
        let builder = StatementBuilder::new(SqlDialect::PostgreSQL);
        let doc: Document = json!({"first_name": "Eason", "deleted_at": null, "age": 30})
            .as_object()
            .unwrap()
            .clone();
        let insert = builder.insert(&meta(), &doc, None);
        assert_eq!(
            insert.sql,
            "INSERT INTO \"member\" (\"first_name\", \"deleted_at\", \"age\") VALUES ($1, NULL, $2)"
        );
        assert_eq!(insert.args, vec![json!("Eason"), json!(30)]);

        let set: Document = json!({"deleted_at": null, "age": 31}).as_object().unwrap().clone();
        let update = builder
            .update(&meta(), &Cond::new().eq("Age", 30).into(), &set, true)
            .unwrap();
        assert_eq!(
            update.sql,
            "UPDATE \"member\" SET \"deleted_at\" = NULL, \"age\" = $1 WHERE \"age\" = $2"
        );
        assert_eq!(update.args, vec![json!(31), json!(30)]);
    }
}
