//! Immutable snapshot-versioned research-tree store.
//!
//! The tree is a forest of problem nodes whose children are solution nodes
//! and vice versa. Every mutating command deep-clones the current snapshot's
//! roots (clones keep their original ids), applies the change to the clone
//! and commits the result as a new snapshot; prior snapshots stay reachable
//! forever. Cross-references (`selected_solution_id`, sub-problem reuse) are
//! plain ids, never shared pointers.

mod error;
mod node;
mod request;
mod snapshot;
mod store;
mod tree;

pub use error::TreeError;
pub use node::{Node, NodeKind, ProblemNode, ProblemType, SolutionNode, SolutionState};
pub use request::{ProblemRequest, SetSelectedSolutionRequest, SolutionRequest};
pub use snapshot::Snapshot;
pub use store::{NodeSummary, RelatedSolutions};
pub use tree::{ActionResult, ResearchTree};
