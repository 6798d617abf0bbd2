//! ORDER BY clauses

use std::fmt;

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortDirection::Asc => write!(f, "ASC"),
            SortDirection::Desc => write!(f, "DESC"),
        }
    }
}

/// One sort key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub field: String,
    pub direction: SortDirection,
}

impl OrderBy {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Desc,
        }
    }

    /// `"Name"`, `"-Name"` or `"Name desc"`
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if let Some(field) = raw.strip_prefix('-') {
            return Self::desc(field.trim());
        }
        if let Some(field) = raw.strip_prefix('+') {
            return Self::asc(field.trim());
        }
        match raw.rsplit_once(char::is_whitespace) {
            Some((field, dir)) if dir.eq_ignore_ascii_case("desc") => Self::desc(field.trim()),
            Some((field, dir)) if dir.eq_ignore_ascii_case("asc") => Self::asc(field.trim()),
            _ => Self::asc(raw),
        }
    }
}

impl From<&str> for OrderBy {
    fn from(raw: &str) -> Self {
        OrderBy::parse(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_forms() {
        assert_eq!(OrderBy::parse("Name"), OrderBy::asc("Name"));
        assert_eq!(OrderBy::parse("-CreatedAt"), OrderBy::desc("CreatedAt"));
        assert_eq!(OrderBy::parse("Age desc"), OrderBy::desc("Age"));
        assert_eq!(OrderBy::parse("Age ASC"), OrderBy::asc("Age"));
    }
}
