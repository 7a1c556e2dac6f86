//! Immutable program tree.
//!
//! Nodes live in an append-only arena and are addressed by stable handles.
//! Parent relations are derived per analysis pass, never stored on nodes,
//! so structural replacement can share unchanged subtrees.

pub mod arena;
pub mod node;

pub use arena::{NodeArena, NodeId};
pub use node::{ChildSlot, Node, NodeKind};
