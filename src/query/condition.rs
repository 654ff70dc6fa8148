//! Control-flow combinators over query outcomes.
//!
//! `If` gates follow-up queries on an earlier outcome. A taken `then`
//! branch merges with and-semantics (the first failure wins); `else`
//! branches run only while no earlier branch was taken, and a chain where
//! no branch fired resolves successfully (the condition simply was not
//! met).

use crate::query::query::QueryOutcome;

pub struct If {
    cond: QueryOutcome,
}

impl If {
    pub fn new(cond: QueryOutcome) -> If {
        If { cond }
    }

    /// Runs `f` when the condition held.
    pub fn then(self, f: impl FnOnce() -> QueryOutcome) -> IfChain {
        if self.cond.is_success() {
            IfChain {
                taken: true,
                outcome: self.cond.and(f()),
            }
        } else {
            IfChain {
                taken: false,
                outcome: QueryOutcome::ok(),
            }
        }
    }
}

pub struct IfChain {
    taken: bool,
    outcome: QueryOutcome,
}

impl IfChain {
    /// Evaluates another condition when no earlier branch was taken.
    pub fn else_if(
        self,
        cond: impl FnOnce() -> QueryOutcome,
        f: impl FnOnce() -> QueryOutcome,
    ) -> IfChain {
        if self.taken {
            return self;
        }
        If::new(cond()).then(f)
    }

    /// Runs when no earlier branch was taken.
    pub fn otherwise(self, f: impl FnOnce() -> QueryOutcome) -> IfChain {
        if self.taken {
            return self;
        }
        IfChain {
            taken: true,
            outcome: f(),
        }
    }

    pub fn outcome(self) -> QueryOutcome {
        self.outcome
    }
}
