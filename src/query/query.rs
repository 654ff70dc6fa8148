//! Deferred path queries.
//!
//! A [`Query`] accumulates location steps without touching the tree; the
//! terminal methods (`make`, `ensure`, `exist`, `expect`, `edit`) finalize
//! it into a statement that actually resolves the path and exposes typed
//! sub-operations. Failures ride along as a [`QueryOutcome`] instead of
//! unwinding, so chains can be composed and inspected.

use crate::error::{StoreError, StoreResult};
use crate::query::statement::{
    DoStatement, EnsureStatement, ExistStatement, ExpectStatement, MakeStatement, StatementCtx,
};
use crate::storage::StorageObject;

/// Success flag plus the first error captured along a query chain.
#[derive(Debug, Clone, Default)]
pub struct QueryOutcome {
    success: bool,
    error: Option<StoreError>,
}

impl QueryOutcome {
    pub fn ok() -> QueryOutcome {
        QueryOutcome {
            success: true,
            error: None,
        }
    }

    pub fn fail(error: StoreError) -> QueryOutcome {
        QueryOutcome {
            success: false,
            error: Some(error),
        }
    }

    pub fn from_result<T>(result: StoreResult<T>) -> QueryOutcome {
        match result {
            Ok(_) => QueryOutcome::ok(),
            Err(e) => QueryOutcome::fail(e),
        }
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn error(&self) -> Option<&StoreError> {
        self.error.as_ref()
    }

    pub fn into_error(self) -> Option<StoreError> {
        self.error
    }

    /// Both must succeed; the first failure wins.
    pub fn and(self, other: QueryOutcome) -> QueryOutcome {
        if self.success {
            other
        } else {
            self
        }
    }

    /// Either may succeed; errors survive only when both fail.
    pub fn or(self, other: QueryOutcome) -> QueryOutcome {
        if self.success {
            self
        } else {
            other
        }
    }
}

/// One accumulated path step.
#[derive(Debug, Clone)]
pub(crate) enum Step {
    Location(String),
    Index(usize),
    Previous,
}

/// A resolved step: child name plus optional element index.
#[derive(Debug, Clone)]
pub(crate) struct OwnedSegment {
    pub name: String,
    pub index: Option<usize>,
}

/// Deferred path accumulator. Cheap to clone; clones share nothing and can
/// be finalized independently.
#[derive(Debug, Clone)]
pub struct Query {
    root: StorageObject,
    steps: Vec<Step>,
}

impl Query {
    pub fn new(root: StorageObject) -> Query {
        Query {
            root,
            steps: Vec::new(),
        }
    }

    /// Descends into a named child or field.
    pub fn location(mut self, name: impl Into<String>) -> Query {
        self.steps.push(Step::Location(name.into()));
        self
    }

    /// Binds an element index to the location before it.
    pub fn index(mut self, index: usize) -> Query {
        self.steps.push(Step::Index(index));
        self
    }

    /// Steps back up one location.
    pub fn previous(mut self) -> Query {
        self.steps.push(Step::Previous);
        self
    }

    /// Flattens the steps; index/previous bookkeeping errors surface here.
    pub(crate) fn compile(&self) -> StoreResult<Vec<OwnedSegment>> {
        let mut segments: Vec<OwnedSegment> = Vec::new();
        for step in &self.steps {
            match step {
                Step::Location(name) => segments.push(OwnedSegment {
                    name: name.clone(),
                    index: None,
                }),
                Step::Index(index) => {
                    let Some(last) = segments.last_mut() else {
                        return Err(StoreError::MalformedPath(
                            "index without a preceding location".into(),
                        ));
                    };
                    if last.index.is_some() {
                        return Err(StoreError::MalformedPath(format!(
                            "{:?} is already indexed",
                            last.name
                        )));
                    }
                    last.index = Some(*index);
                }
                Step::Previous => {
                    if segments.pop().is_none() {
                        return Err(StoreError::MalformedPath(
                            "cannot step above the query root".into(),
                        ));
                    }
                }
            }
        }
        if segments.is_empty() {
            return Err(StoreError::MalformedPath("query names no location".into()));
        }
        Ok(segments)
    }

    fn ctx(self) -> StatementCtx {
        let compiled = self.compile();
        StatementCtx::new(self.root, compiled)
    }

    // ---- terminals ----

    /// Creates at the path, overwriting an incompatible field when
    /// `allow_override`.
    pub fn make(self, allow_override: bool) -> MakeStatement {
        MakeStatement::new(self.ctx(), allow_override)
    }

    /// Creates when absent; validates (or overwrites) when present.
    pub fn ensure(self, allow_override: bool) -> EnsureStatement {
        EnsureStatement::new(self.ctx(), allow_override)
    }

    /// Inspects without mutating.
    pub fn exist(self) -> ExistStatement {
        ExistStatement::new(self.ctx())
    }

    /// Non-mutating assertion chain.
    pub fn expect(self) -> ExpectStatement {
        ExpectStatement::new(self.ctx())
    }

    /// Structural operations (delete / rename).
    pub fn edit(self) -> DoStatement {
        DoStatement::new(self.ctx())
    }
}

impl StorageObject {
    /// Starts a deferred query anchored at this object.
    pub fn query(&self) -> Query {
        Query::new(*self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Storage;

    #[test]
    fn compile_binds_indices_left() {
        let storage = Storage::new().unwrap();
        let q = Query::new(storage.root().unwrap())
            .location("kids")
            .index(2)
            .location("hp");
        let segments = q.compile().unwrap();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].name, "kids");
        assert_eq!(segments[0].index, Some(2));
        assert_eq!(segments[1].name, "hp");
        assert_eq!(segments[1].index, None);
    }

    #[test]
    fn previous_pops_a_segment() {
        let storage = Storage::new().unwrap();
        let q = Query::new(storage.root().unwrap())
            .location("a")
            .location("b")
            .previous()
            .location("c");
        let segments = q.compile().unwrap();
        let names: Vec<&str> = segments.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["a", "c"]);
    }

    #[test]
    fn compile_errors() {
        let storage = Storage::new().unwrap();
        let root = storage.root().unwrap();
        assert!(Query::new(root).index(0).compile().is_err());
        assert!(Query::new(root).location("a").index(0).index(1).compile().is_err());
        assert!(Query::new(root).previous().compile().is_err());
        assert!(Query::new(root).compile().is_err());
    }

    #[test]
    fn outcome_merges() {
        let ok = QueryOutcome::ok();
        let bad = QueryOutcome::fail(StoreError::not_found("x"));
        assert!(ok.clone().and(QueryOutcome::ok()).is_success());
        assert!(!ok.clone().and(bad.clone()).is_success());
        assert!(ok.clone().or(bad.clone()).is_success());
        assert!(bad.clone().or(ok).is_success());
        assert!(!bad.clone().and(QueryOutcome::ok()).is_success());
        assert!(bad.error().unwrap().is_not_found());
    }

    #[test]
    fn clones_finalize_independently() {
        let storage = Storage::new().unwrap();
        let base = Query::new(storage.root().unwrap()).location("stats");
        let a = base.clone().location("hp");
        let b = base.location("mana");
        assert_eq!(a.compile().unwrap().len(), 2);
        assert_eq!(b.compile().unwrap()[1].name, "mana");
    }
}
