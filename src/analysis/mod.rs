//! Static analysis: scope/type resolution and conflict detection.
//!
//! Analysis is advisory. Conflicts never block compilation or execution;
//! they are exposed read-only for the editor collaborator to display.

pub mod conflict;
pub mod context;
pub mod types;

pub use conflict::{Conflict, node_conflicts, program_conflicts};
pub use context::{Context, Definition};
pub use types::{Type, Unit, UnknownReason};
