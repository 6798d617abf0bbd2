//! Backend-neutral condition model
//!
//! Leaves ([`Cond`]) hold structured comparisons; [`Union`] combines any mix of
//! leaves and unions with AND/OR. Backends translate the resulting
//! [`Conditional`] tree through a [`ConditionTranslator`].

pub mod cond;
pub mod operator;
pub mod ordering;
pub mod translate;
pub mod union;

pub use cond::*;
pub use operator::*;
pub use ordering::*;
pub use translate::*;
pub use union::*;
