//! Named, dependency-ordered stages for one action kind
//!
//! Stages declare `before`/`after` constraints against other stage names, or
//! `"*"` for "ahead of/behind everything else". The execution order is the
//! topological order of those constraints with ties broken by registration
//! order. Registering a stage that creates a cycle fails and leaves the
//! previous order in place.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, warn};

use super::scope::{ActionKind, Scope};
use crate::connection::DataSource;
use crate::error::{ModelError, ModelResult};

/// A pipeline stage
#[async_trait]
pub trait Callback: Send + Sync {
    async fn call(&self, scope: &mut Scope);
}

/// Adapts a synchronous closure into a [`Callback`]
pub struct FnCallback<F>(pub F);

#[async_trait]
impl<F> Callback for FnCallback<F>
where
    F: Fn(&mut Scope) + Send + Sync,
{
    async fn call(&self, scope: &mut Scope) {
        (self.0)(scope)
    }
}

/// Predicate deciding per data source whether a stage runs
pub type MatchFn = Arc<dyn Fn(&DataSource) -> bool + Send + Sync>;

const ANY_STAGE: &str = "*";

struct Entry {
    name: String,
    before: Option<String>,
    after: Option<String>,
    matcher: Option<MatchFn>,
    handler: Arc<dyn Callback>,
}

#[derive(Clone)]
struct CompiledStage {
    name: String,
    matcher: Option<MatchFn>,
    handler: Arc<dyn Callback>,
}

/// Ordered stage list of one action kind
pub struct Processor {
    kind: ActionKind,
    entries: RwLock<Vec<Entry>>,
    compiled: RwLock<Arc<Vec<CompiledStage>>>,
}

impl fmt::Debug for Processor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Processor")
            .field("kind", &self.kind)
            .field("stages", &self.names())
            .finish()
    }
}

impl Processor {
    pub fn new(kind: ActionKind) -> Self {
        Self {
            kind,
            entries: RwLock::new(Vec::new()),
            compiled: RwLock::new(Arc::new(Vec::new())),
        }
    }

    /// Processor preloaded with unconstrained stages in the given order
    pub(crate) fn with_stages(kind: ActionKind, stages: Vec<(&str, Arc<dyn Callback>)>) -> Self {
        let entries: Vec<Entry> = stages
            .into_iter()
            .map(|(name, handler)| Entry {
                name: name.to_string(),
                before: None,
                after: None,
                matcher: None,
                handler,
            })
            .collect();
        let compiled = entries
            .iter()
            .map(|e| CompiledStage {
                name: e.name.clone(),
                matcher: None,
                handler: Arc::clone(&e.handler),
            })
            .collect();
        Self {
            kind,
            entries: RwLock::new(entries),
            compiled: RwLock::new(Arc::new(compiled)),
        }
    }

    pub fn kind(&self) -> ActionKind {
        self.kind
    }

    /// Start a registration constrained to run before `target`
    pub fn before(&self, target: &str) -> StageBuilder<'_> {
        StageBuilder::new(self).before(target)
    }

    /// Start a registration constrained to run after `target`
    pub fn after(&self, target: &str) -> StageBuilder<'_> {
        StageBuilder::new(self).after(target)
    }

    /// Start a registration that only runs for matching data sources
    pub fn matching<F>(&self, predicate: F) -> StageBuilder<'_>
    where
        F: Fn(&DataSource) -> bool + Send + Sync + 'static,
    {
        StageBuilder::new(self).matching(predicate)
    }

    /// Register an unconstrained stage
    pub fn register<C: Callback + 'static>(&self, name: &str, handler: C) -> ModelResult<()> {
        StageBuilder::new(self).register(name, handler)
    }

    /// Register a synchronous closure as a stage
    pub fn register_fn<F>(&self, name: &str, handler: F) -> ModelResult<()>
    where
        F: Fn(&mut Scope) + Send + Sync + 'static,
    {
        self.register(name, FnCallback(handler))
    }

    /// Swap the handler of an existing stage, keeping its constraints
    pub fn replace<C: Callback + 'static>(&self, name: &str, handler: C) -> ModelResult<()> {
        let mut entries = self.entries.write();
        let entry = entries
            .iter_mut()
            .find(|e| e.name == name)
            .ok_or_else(|| self.unknown(name))?;
        entry.handler = Arc::new(handler);
        self.recompile(&entries)?;
        debug!(processor = ?self.kind, stage = name, "Replaced callback");
        Ok(())
    }

    /// Remove a stage; constraints naming it are then ignored
    pub fn remove(&self, name: &str) -> ModelResult<()> {
        let mut entries = self.entries.write();
        let idx = entries
            .iter()
            .position(|e| e.name == name)
            .ok_or_else(|| self.unknown(name))?;
        let removed = entries.remove(idx);
        if let Err(err) = self.recompile(&entries) {
            entries.insert(idx, removed);
            return Err(err);
        }
        debug!(processor = ?self.kind, stage = name, "Removed callback");
        Ok(())
    }

    /// Stage names in execution order
    pub fn names(&self) -> Vec<String> {
        self.compiled.read().iter().map(|s| s.name.clone()).collect()
    }

    /// Run every stage in order until one skips, or an error is recorded
    /// after the deadline passed
    pub async fn execute(&self, scope: &mut Scope) {
        let stages = Arc::clone(&self.compiled.read());
        for stage in stages.iter() {
            if scope.is_skipped() {
                debug!(processor = ?self.kind, stage = %stage.name, "Pipeline skipped");
                break;
            }
            if let Some(matcher) = &stage.matcher {
                if !matcher(&scope.connection.source) {
                    continue;
                }
            }
            stage.handler.call(scope).await;
            if scope.has_error() && scope.deadline_elapsed() {
                warn!(processor = ?self.kind, stage = %stage.name, "Deadline elapsed, stopping pipeline");
                break;
            }
        }
        // a transaction opened here must not outlive the operation
        scope.abandon_transaction().await;
    }

    fn insert(&self, entry: Entry) -> ModelResult<()> {
        if entry.name.trim().is_empty() {
            return Err(ModelError::Pipeline("callback name cannot be empty".to_string()));
        }
        let mut entries = self.entries.write();
        if entries.iter().any(|e| e.name == entry.name) {
            return Err(ModelError::Pipeline(format!(
                "callback '{}' is already registered on the {:?} processor",
                entry.name, self.kind
            )));
        }
        let name = entry.name.clone();
        entries.push(entry);
        if let Err(err) = self.recompile(&entries) {
            entries.pop();
            return Err(err);
        }
        debug!(processor = ?self.kind, stage = %name, "Registered callback");
        Ok(())
    }

    fn recompile(&self, entries: &[Entry]) -> ModelResult<()> {
        let order = sort(entries)?;
        let compiled = order
            .into_iter()
            .map(|idx| {
                let e = &entries[idx];
                CompiledStage {
                    name: e.name.clone(),
                    matcher: e.matcher.clone(),
                    handler: Arc::clone(&e.handler),
                }
            })
            .collect();
        *self.compiled.write() = Arc::new(compiled);
        Ok(())
    }

    fn unknown(&self, name: &str) -> ModelError {
        ModelError::Pipeline(format!(
            "no callback named '{}' on the {:?} processor",
            name, self.kind
        ))
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    New,
    Active,
    Done,
}

/// Topological order of the entries.
///
/// Entries are visited in registration order and each one emits its
/// predecessors first, so unconstrained stages keep their relative order.
/// A stage constrained `after` a target follows it directly once its other
/// predecessors are placed.
fn sort(entries: &[Entry]) -> ModelResult<Vec<usize>> {
    let n = entries.len();
    let position: HashMap<&str, usize> = entries
        .iter()
        .enumerate()
        .map(|(i, e)| (e.name.as_str(), i))
        .collect();

    let mut predecessors: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut edge = |from: usize, to: usize| {
        if from != to && !predecessors[to].contains(&from) {
            predecessors[to].push(from);
        }
    };

    for (i, entry) in entries.iter().enumerate() {
        match entry.before.as_deref() {
            Some(ANY_STAGE) => {
                for (j, other) in entries.iter().enumerate() {
                    if other.before.as_deref() != Some(ANY_STAGE) {
                        edge(i, j);
                    }
                }
            }
            Some(target) => match position.get(target) {
                Some(&j) => edge(i, j),
                None => debug!(stage = %entry.name, target, "Ignoring constraint on unknown callback"),
            },
            None => {}
        }
        match entry.after.as_deref() {
            Some(ANY_STAGE) => {
                for (j, other) in entries.iter().enumerate() {
                    if other.after.as_deref() != Some(ANY_STAGE) {
                        edge(j, i);
                    }
                }
            }
            Some(target) => match position.get(target) {
                Some(&j) => edge(j, i),
                None => debug!(stage = %entry.name, target, "Ignoring constraint on unknown callback"),
            },
            None => {}
        }
    }
    for preds in &mut predecessors {
        preds.sort_unstable();
    }

    // stages naming a target in `after`, pulled in right behind it
    let mut followers: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (j, entry) in entries.iter().enumerate() {
        if let Some(&i) = entry.after.as_deref().and_then(|t| position.get(t)) {
            followers[i].push(j);
        }
    }

    let graph = Graph {
        entries,
        predecessors,
        followers,
    };
    let mut marks = vec![Mark::New; n];
    let mut order = Vec::with_capacity(n);
    for i in 0..n {
        graph.visit(i, &mut marks, &mut order)?;
    }
    Ok(order)
}

struct Graph<'a> {
    entries: &'a [Entry],
    predecessors: Vec<Vec<usize>>,
    followers: Vec<Vec<usize>>,
}

impl Graph<'_> {
    fn visit(&self, i: usize, marks: &mut [Mark], order: &mut Vec<usize>) -> ModelResult<()> {
        match marks[i] {
            Mark::Done => return Ok(()),
            Mark::Active => {
                let cycle: Vec<&str> = (0..self.entries.len())
                    .filter(|&j| marks[j] == Mark::Active)
                    .map(|j| self.entries[j].name.as_str())
                    .collect();
                return Err(ModelError::Pipeline(format!(
                    "callback ordering cycle among: {}",
                    cycle.join(", ")
                )));
            }
            Mark::New => {}
        }
        marks[i] = Mark::Active;
        for &p in &self.predecessors[i] {
            self.visit(p, marks, order)?;
        }
        marks[i] = Mark::Done;
        order.push(i);

        for &j in &self.followers[i] {
            let ready = marks[j] == Mark::New
                && self.predecessors[j].iter().all(|&p| marks[p] == Mark::Done);
            if ready {
                self.visit(j, marks, order)?;
            }
        }
        Ok(())
    }
}

/// Registration with optional ordering constraints
pub struct StageBuilder<'a> {
    processor: &'a Processor,
    before: Option<String>,
    after: Option<String>,
    matcher: Option<MatchFn>,
}

impl<'a> StageBuilder<'a> {
    fn new(processor: &'a Processor) -> Self {
        Self {
            processor,
            before: None,
            after: None,
            matcher: None,
        }
    }

    pub fn before(mut self, target: &str) -> Self {
        self.before = Some(target.to_string());
        self
    }

    pub fn after(mut self, target: &str) -> Self {
        self.after = Some(target.to_string());
        self
    }

    pub fn matching<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&DataSource) -> bool + Send + Sync + 'static,
    {
        self.matcher = Some(Arc::new(predicate));
        self
    }

    pub fn register<C: Callback + 'static>(self, name: &str, handler: C) -> ModelResult<()> {
        self.processor.insert(Entry {
            name: name.to_string(),
            before: self.before,
            after: self.after,
            matcher: self.matcher,
            handler: Arc::new(handler),
        })
    }

    pub fn register_fn<F>(self, name: &str, handler: F) -> ModelResult<()>
    where
        F: Fn(&mut Scope) + Send + Sync + 'static,
    {
        self.register(name, FnCallback(handler))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_scope: &mut Scope) {}

    fn processor() -> Processor {
        let processor = Processor::new(ActionKind::Create);
        processor.register_fn("a", noop).unwrap();
        processor.register_fn("b", noop).unwrap();
        processor.register_fn("c", noop).unwrap();
        processor
    }

    #[test]
    fn test_registration_order_without_constraints() {
        assert_eq!(processor().names(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_before_and_after_constraints() {
        let p = Processor::new(ActionKind::Create);
        p.after("a").before("c").register_fn("b", noop).unwrap();
        p.before("c").register_fn("a", noop).unwrap();
        p.register_fn("c", noop).unwrap();
        assert_eq!(p.names(), vec!["a", "b", "c"]);

        let p = Processor::new(ActionKind::Create);
        p.before("c").register_fn("a", noop).unwrap();
        p.after("a").before("c").register_fn("b", noop).unwrap();
        p.register_fn("c", noop).unwrap();
        assert_eq!(p.names(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_constraint_moves_stage_ahead() {
        let p = processor();
        p.before("b").register_fn("x", noop).unwrap();
        assert_eq!(p.names(), vec!["a", "x", "b", "c"]);
    }

    #[test]
    fn test_wildcard_constraints() {
        let p = processor();
        p.after("*").register_fn("last", noop).unwrap();
        p.before("*").register_fn("first", noop).unwrap();
        assert_eq!(p.names(), vec!["first", "a", "b", "c", "last"]);
    }

    #[test]
    fn test_unknown_target_is_ignored() {
        let p = processor();
        p.before("missing").register_fn("x", noop).unwrap();
        assert_eq!(p.names(), vec!["a", "b", "c", "x"]);
    }

    #[test]
    fn test_cycle_is_rejected_and_order_kept() {
        let p = Processor::new(ActionKind::Query);
        p.before("b").register_fn("a", noop).unwrap();
        let err = p.before("a").register_fn("b", noop).unwrap_err();
        assert!(matches!(err, ModelError::Pipeline(ref m) if m.contains("cycle")));
        assert_eq!(p.names(), vec!["a"]);
    }

    #[test]
    fn test_duplicate_name_is_rejected() {
        let p = processor();
        assert!(matches!(
            p.register_fn("a", noop),
            Err(ModelError::Pipeline(_))
        ));
    }

    #[test]
    fn test_remove_and_replace() {
        let p = processor();
        p.after("a").register_fn("x", noop).unwrap();
        p.remove("a").unwrap();
        assert_eq!(p.names(), vec!["b", "c", "x"]);
        assert!(p.remove("a").is_err());
        p.replace("b", FnCallback(noop)).unwrap();
        assert_eq!(p.names(), vec!["b", "c", "x"]);
    }
}
