pub mod condition;
#[allow(clippy::module_inception)]
pub mod query;
pub mod statement;

pub use condition::{If, IfChain};
pub use query::{Query, QueryOutcome};
pub use statement::{DoStatement, EnsureStatement, ExistStatement, ExpectStatement, MakeStatement};
