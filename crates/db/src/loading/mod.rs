//! Relationship preloading
//!
//! Requested relationship paths are resolved after the top-level records are
//! decoded, one batched lookup per relationship level instead of one per
//! record.

pub mod resolver;

pub use resolver::{key_of, RelationshipResolver};

use crate::conditions::{Conditional, OrderBy};

/// One requested relationship path with its lookup options
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PreloadOptions {
    /// Dot-separated relationship path, e.g. `Orders.Items`
    pub path: String,
    /// Extra filter applied to the related records
    pub conditions: Vec<Conditional>,
    pub projection: Vec<String>,
    pub order: Vec<OrderBy>,
    /// 1-based page of related records per source record
    pub page: Option<u64>,
    pub size: Option<u64>,
}

impl PreloadOptions {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn filter(mut self, condition: impl Into<Conditional>) -> Self {
        self.conditions.push(condition.into());
        self
    }

    pub fn project<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.projection.extend(fields.into_iter().map(Into::into));
        self
    }

    pub fn order_by(mut self, order: impl Into<OrderBy>) -> Self {
        self.order.push(order.into());
        self
    }

    pub fn paginate(mut self, page: u64, size: u64) -> Self {
        self.page = Some(page.max(1));
        self.size = Some(size);
        self
    }

    /// Number of path segments
    pub fn depth(&self) -> usize {
        self.path.split('.').count()
    }

    /// Slice of a related collection selected by page and size
    pub(crate) fn window<T>(&self, items: Vec<T>) -> Vec<T> {
        match self.size {
            Some(size) => {
                let page = self.page.unwrap_or(1).max(1);
                let skip = usize::try_from((page - 1).saturating_mul(size)).unwrap_or(usize::MAX);
                let take = usize::try_from(size).unwrap_or(usize::MAX);
                items.into_iter().skip(skip).take(take).collect()
            }
            None => items,
        }
    }
}

impl From<&str> for PreloadOptions {
    fn from(path: &str) -> Self {
        PreloadOptions::new(path)
    }
}

impl From<String> for PreloadOptions {
    fn from(path: String) -> Self {
        PreloadOptions::new(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window() {
        let opts = PreloadOptions::new("Orders").paginate(2, 2);
        assert_eq!(opts.window(vec![1, 2, 3, 4, 5]), vec![3, 4]);
        assert_eq!(PreloadOptions::new("Orders").window(vec![1, 2]), vec![1, 2]);
        assert_eq!(opts.window(vec![1]), Vec::<i32>::new());
    }

    #[test]
    fn test_window_far_past_the_end() {
        let opts = PreloadOptions::new("Orders").paginate(u64::MAX, u64::MAX / 2);
        assert_eq!(opts.window(vec![1, 2, 3]), Vec::<i32>::new());
    }

    #[test]
    fn test_depth() {
        assert_eq!(PreloadOptions::from("Orders.Items").depth(), 2);
        assert_eq!(PreloadOptions::from("Orders").depth(), 1);
    }
}
