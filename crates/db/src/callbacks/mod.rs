//! Operation pipeline
//!
//! Every operation runs through the [`Processor`] of its action kind. The
//! standard stage sets are:
//!
//! - create: `db:begin_transaction`, `db:before_create`, `db:create`,
//!   `db:after_create`, `db:commit_or_rollback_transaction`
//! - query: `db:before_query`, `db:query`, `db:preload`, `db:after_query`
//! - update: `db:begin_transaction`, `db:before_update`, `db:update`,
//!   `db:after_update`, `db:commit_or_rollback_transaction`
//! - delete: `db:begin_transaction`, `db:before_delete`, `db:delete`,
//!   `db:after_delete`, `db:commit_or_rollback_transaction`
//!
//! Custom stages are positioned relative to these names.

pub mod processor;
pub mod scope;
pub mod standard;

use std::sync::Arc;

pub use processor::{Callback, FnCallback, MatchFn, Processor, StageBuilder};
pub use scope::{Action, ActionKind, Scope, TxHandle, TX_KEY};

use crate::hooks::Stage;
use standard::*;

/// The four processors of a database
#[derive(Debug)]
pub struct Callbacks {
    create: Processor,
    query: Processor,
    update: Processor,
    delete: Processor,
}

impl Callbacks {
    /// Processors without any stage
    pub fn empty() -> Self {
        Self {
            create: Processor::new(ActionKind::Create),
            query: Processor::new(ActionKind::Query),
            update: Processor::new(ActionKind::Update),
            delete: Processor::new(ActionKind::Delete),
        }
    }

    /// Processors holding the built-in stages
    pub fn standard() -> Self {
        Self {
            create: Processor::with_stages(
                ActionKind::Create,
                vec![
                    (BEGIN_TRANSACTION, stage(BeginTransaction)),
                    (
                        BEFORE_CREATE,
                        stage(HookStage::before(&[
                            Stage::BeforeSave,
                            Stage::BeforeCreate,
                        ])),
                    ),
                    (CREATE, stage(CreateStage)),
                    (
                        AFTER_CREATE,
                        stage(HookStage::after(&[
                            Stage::AfterCreate,
                            Stage::AfterSave,
                        ])),
                    ),
                    (COMMIT_OR_ROLLBACK, stage(CommitOrRollback)),
                ],
            ),
            query: Processor::with_stages(
                ActionKind::Query,
                vec![
                    (
                        BEFORE_QUERY,
                        stage(HookStage::before(&[Stage::BeforeQuery])),
                    ),
                    (QUERY, stage(QueryStage)),
                    (PRELOAD, stage(PreloadStage)),
                    (
                        AFTER_QUERY,
                        stage(HookStage::after(&[Stage::AfterQuery])),
                    ),
                ],
            ),
            update: Processor::with_stages(
                ActionKind::Update,
                vec![
                    (BEGIN_TRANSACTION, stage(BeginTransaction)),
                    (
                        BEFORE_UPDATE,
                        stage(HookStage::before(&[
                            Stage::BeforeSave,
                            Stage::BeforeUpdate,
                        ])),
                    ),
                    (UPDATE, stage(UpdateStage)),
                    (
                        AFTER_UPDATE,
                        stage(HookStage::after(&[
                            Stage::AfterUpdate,
                            Stage::AfterSave,
                        ])),
                    ),
                    (COMMIT_OR_ROLLBACK, stage(CommitOrRollback)),
                ],
            ),
            delete: Processor::with_stages(
                ActionKind::Delete,
                vec![
                    (BEGIN_TRANSACTION, stage(BeginTransaction)),
                    (
                        BEFORE_DELETE,
                        stage(HookStage::before(&[Stage::BeforeDelete])),
                    ),
                    (DELETE, stage(DeleteStage)),
                    (
                        AFTER_DELETE,
                        stage(HookStage::after(&[Stage::AfterDelete])),
                    ),
                    (COMMIT_OR_ROLLBACK, stage(CommitOrRollback)),
                ],
            ),
        }
    }

    pub fn create(&self) -> &Processor {
        &self.create
    }

    pub fn query(&self) -> &Processor {
        &self.query
    }

    pub fn update(&self) -> &Processor {
        &self.update
    }

    pub fn delete(&self) -> &Processor {
        &self.delete
    }

    pub fn processor(&self, kind: ActionKind) -> &Processor {
        match kind {
            ActionKind::Create => &self.create,
            ActionKind::Query => &self.query,
            ActionKind::Update => &self.update,
            ActionKind::Delete => &self.delete,
        }
    }
}

fn stage<C: Callback + 'static>(callback: C) -> Arc<dyn Callback> {
    Arc::new(callback)
}

impl Default for Callbacks {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_stage_order() {
        let callbacks = Callbacks::standard();
        assert_eq!(
            callbacks.create().names(),
            vec![
                BEGIN_TRANSACTION,
                BEFORE_CREATE,
                CREATE,
                AFTER_CREATE,
                COMMIT_OR_ROLLBACK
            ]
        );
        assert_eq!(
            callbacks.query().names(),
            vec![BEFORE_QUERY, QUERY, PRELOAD, AFTER_QUERY]
        );
        assert_eq!(callbacks.processor(ActionKind::Delete).names()[2], DELETE);
    }

    #[test]
    fn test_custom_stage_positions_against_standard_names() {
        let callbacks = Callbacks::standard();
        callbacks
            .update()
            .after(BEFORE_UPDATE)
            .register_fn("audit", |_scope: &mut Scope| {})
            .unwrap();
        assert_eq!(
            callbacks.update().names(),
            vec![
                BEGIN_TRANSACTION,
                BEFORE_UPDATE,
                "audit",
                UPDATE,
                AFTER_UPDATE,
                COMMIT_OR_ROLLBACK
            ]
        );
    }

    #[test]
    fn test_empty_processors() {
        let callbacks = Callbacks::empty();
        assert!(callbacks.create().names().is_empty());
    }
}
