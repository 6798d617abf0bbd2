//! Batched streaming over query results

use std::collections::VecDeque;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use super::find::FindResult;
use crate::backends::core::Document;
use crate::error::ModelResult;

/// Pulls matches one batch at a time.
///
/// Each batch is a separate query, so results are stable only under a
/// deterministic `order_by`.
#[derive(Debug)]
pub struct Cursor {
    find: FindResult,
    batch_size: u64,
    next_skip: u64,
    remaining: Option<u64>,
    buffer: VecDeque<Document>,
    exhausted: bool,
}

impl Cursor {
    pub(crate) fn new(find: FindResult, batch_size: u64) -> Self {
        let (skip, limit) = find.bounds();
        Self {
            find,
            batch_size: batch_size.max(1),
            next_skip: skip,
            remaining: limit,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    pub fn batch_size(&self) -> u64 {
        self.batch_size
    }

    /// Next record, fetching another batch when the buffer is empty
    pub async fn next(&mut self) -> ModelResult<Option<Document>> {
        if self.buffer.is_empty() && !self.exhausted {
            self.fetch().await?;
        }
        Ok(self.buffer.pop_front())
    }

    pub async fn next_into<T: DeserializeOwned>(&mut self) -> ModelResult<Option<T>> {
        match self.next().await? {
            Some(record) => Ok(Some(serde_json::from_value(Value::Object(record))?)),
            None => Ok(None),
        }
    }

    async fn fetch(&mut self) -> ModelResult<()> {
        let take = match self.remaining {
            Some(0) => {
                self.exhausted = true;
                return Ok(());
            }
            Some(left) => left.min(self.batch_size),
            None => self.batch_size,
        };
        let batch = self.find.window(self.next_skip, take).all().await?;
        let fetched = batch.len() as u64;
        debug!(skip = self.next_skip, fetched, "Cursor fetched batch");

        self.next_skip = self.next_skip.saturating_add(fetched);
        if let Some(left) = self.remaining.as_mut() {
            *left = left.saturating_sub(fetched);
        }
        if fetched < take {
            self.exhausted = true;
        }
        self.buffer.extend(batch);
        Ok(())
    }
}
