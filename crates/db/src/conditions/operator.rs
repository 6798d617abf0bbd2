//! Comparison operators and their caller-facing tokens

use std::fmt;

use crate::error::{ModelError, ModelResult};

/// Comparison operator of a single predicate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Equal,
    NotEqual,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    /// `*=`
    Prefix,
    /// `=*`
    Suffix,
    /// `*`
    Contains,
    In,
    NotIn,
    Exists,
    Regexp,
}

impl Operator {
    /// Parse an operator token as written after the field name
    pub fn parse(token: &str) -> ModelResult<Self> {
        let op = match token.trim() {
            "" | "=" | "==" | "$eq" => Operator::Equal,
            "!=" | "<>" | "$ne" => Operator::NotEqual,
            ">" | "$gt" => Operator::GreaterThan,
            ">=" | "$gte" => Operator::GreaterThanOrEqual,
            "<" | "$lt" => Operator::LessThan,
            "<=" | "$lte" => Operator::LessThanOrEqual,
            "*=" => Operator::Prefix,
            "=*" => Operator::Suffix,
            "*" => Operator::Contains,
            "in" | "$in" => Operator::In,
            "nin" | "$nin" => Operator::NotIn,
            "exists" | "$exists" => Operator::Exists,
            "regexp" | "$regex" | "~=" => Operator::Regexp,
            other => {
                return Err(ModelError::Query(format!(
                    "unsupported operator '{}'",
                    other
                )))
            }
        };
        Ok(op)
    }

    /// Canonical token
    pub fn token(&self) -> &'static str {
        match self {
            Operator::Equal => "=",
            Operator::NotEqual => "!=",
            Operator::GreaterThan => ">",
            Operator::GreaterThanOrEqual => ">=",
            Operator::LessThan => "<",
            Operator::LessThanOrEqual => "<=",
            Operator::Prefix => "*=",
            Operator::Suffix => "=*",
            Operator::Contains => "*",
            Operator::In => "in",
            Operator::NotIn => "nin",
            Operator::Exists => "exists",
            Operator::Regexp => "regexp",
        }
    }

    /// Operators whose value is a collection
    pub fn is_set(&self) -> bool {
        matches!(self, Operator::In | Operator::NotIn)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.token())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_baseline_tokens() {
        let cases = [
            ("=", Operator::Equal),
            ("", Operator::Equal),
            ("!=", Operator::NotEqual),
            (">", Operator::GreaterThan),
            (">=", Operator::GreaterThanOrEqual),
            ("<", Operator::LessThan),
            ("<=", Operator::LessThanOrEqual),
            ("*=", Operator::Prefix),
            ("=*", Operator::Suffix),
            ("*", Operator::Contains),
            ("in", Operator::In),
            ("$in", Operator::In),
            ("nin", Operator::NotIn),
            ("$exists", Operator::Exists),
            ("regexp", Operator::Regexp),
            ("~=", Operator::Regexp),
        ];
        for (token, expected) in cases {
            assert_eq!(Operator::parse(token).unwrap(), expected, "token {:?}", token);
        }
    }

    #[test]
    fn test_unknown_operator_is_query_error() {
        let err = Operator::parse("between").unwrap_err();
        assert!(matches!(err, ModelError::Query(_)));
    }

    #[test]
    fn test_token_round_trips_through_parse() {
        for op in [Operator::Prefix, Operator::NotIn, Operator::Exists] {
            assert_eq!(Operator::parse(op.token()).unwrap(), op);
        }
    }
}
