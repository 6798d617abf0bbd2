//! Boolean combination of predicates

use std::fmt;

use super::cond::Cond;
use crate::error::ModelResult;

/// How the children of a union combine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Junction {
    And,
    Or,
}

impl fmt::Display for Junction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Junction::And => write!(f, "AND"),
            Junction::Or => write!(f, "OR"),
        }
    }
}

/// AND/OR over child predicates
#[derive(Debug, Clone, PartialEq)]
pub struct Union {
    pub junction: Junction,
    pub children: Vec<Conditional>,
}

impl Union {
    pub fn new(junction: Junction) -> Self {
        Self {
            junction,
            children: Vec::new(),
        }
    }

    pub fn push(mut self, child: impl Into<Conditional>) -> Self {
        self.children.push(child.into());
        self
    }
}

/// A predicate tree node: either a leaf [`Cond`] or a [`Union`]
#[derive(Debug, Clone, PartialEq)]
pub enum Conditional {
    Leaf(Cond),
    Combinator(Union),
}

impl Conditional {
    /// A leaf is the conjunction of its comparisons
    pub fn junction(&self) -> Junction {
        match self {
            Conditional::Leaf(_) => Junction::And,
            Conditional::Combinator(union) => union.junction,
        }
    }

    pub fn children(&self) -> &[Conditional] {
        match self {
            Conditional::Leaf(_) => &[],
            Conditional::Combinator(union) => &union.children,
        }
    }

    /// True when the predicate places no restriction
    pub fn is_empty(&self) -> bool {
        match self {
            Conditional::Leaf(cond) => cond.is_empty(),
            Conditional::Combinator(union) => union.children.iter().all(|c| c.is_empty()),
        }
    }

    /// Check every leaf for malformed keys
    pub fn validate(&self) -> ModelResult<()> {
        match self {
            Conditional::Leaf(cond) => cond.validate(),
            Conditional::Combinator(union) => {
                union.children.iter().try_for_each(|c| c.validate())
            }
        }
    }

    /// Every field referenced anywhere in the tree
    pub fn fields(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_fields(&mut out);
        out
    }

    fn collect_fields(&self, out: &mut Vec<String>) {
        match self {
            Conditional::Leaf(cond) => {
                for field in cond.fields() {
                    if !out.iter().any(|f| f == field) {
                        out.push(field.to_string());
                    }
                }
            }
            Conditional::Combinator(union) => {
                for child in &union.children {
                    child.collect_fields(out);
                }
            }
        }
    }

    /// Conjoin a list of predicates, dropping empty ones
    pub fn all_of(conditions: Vec<Conditional>) -> Conditional {
        let mut parts: Vec<Conditional> = conditions.into_iter().filter(|c| !c.is_empty()).collect();
        match parts.len() {
            0 => Conditional::Leaf(Cond::new()),
            1 => parts.remove(0),
            _ => Conditional::Combinator(Union {
                junction: Junction::And,
                children: parts,
            }),
        }
    }
}

impl From<Cond> for Conditional {
    fn from(cond: Cond) -> Self {
        Conditional::Leaf(cond)
    }
}

impl From<Union> for Conditional {
    fn from(union: Union) -> Self {
        Conditional::Combinator(union)
    }
}

/// Conjunction of any mix of leaves and unions
pub fn and<I, C>(children: I) -> Union
where
    I: IntoIterator<Item = C>,
    C: Into<Conditional>,
{
    Union {
        junction: Junction::And,
        children: children.into_iter().map(Into::into).collect(),
    }
}

/// Disjunction of any mix of leaves and unions
pub fn or<I, C>(children: I) -> Union
where
    I: IntoIterator<Item = C>,
    C: Into<Conditional>,
{
    Union {
        junction: Junction::Or,
        children: children.into_iter().map(Into::into).collect(),
    }
}
