//! Structural API errors.
//!
//! Language-level failures are ordinary exception values that flow through
//! the value stack (see `runtime::value`); `EngineError` only covers misuse
//! of the engine's own API surface.

use crate::tree::NodeId;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    /// A node handle that does not belong to the program's arena.
    #[error("unknown node {0:?}")]
    UnknownNode(NodeId),

    /// The replacement target is not reachable from the program root.
    #[error("node {0:?} is not part of the program tree")]
    DetachedNode(NodeId),

    /// A rewind was requested with no recorded moment to restore.
    #[error("no recorded moment to rewind to")]
    NoHistory,

    /// A serialized snapshot could not be mapped back onto runtime state.
    #[error("malformed snapshot: {0}")]
    Snapshot(String),

    /// A snapshot references a stream definition the catalog does not know.
    #[error("unknown stream definition `{0}`")]
    UnknownStreamDefinition(String),
}
