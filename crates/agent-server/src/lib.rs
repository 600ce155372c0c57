//! HTTP/SSE front of the research-planning server.
//!
//! Three groups of routes: the agent endpoints (message submission with an
//! SSE patch stream, mid-stream resume, stop, user rollback), the
//! research-tree commands and snapshot reads, and project persistence.

pub mod handlers;
pub mod project;
pub mod server;
pub mod sse;
pub mod state;

pub use project::ProjectManager;
pub use server::run_server;
pub use state::AppState;
