//! Rill: a small live language with time-travel debugging.
//!
//! Programs are immutable trees, analyzed for advisory conflicts, lowered
//! into relatively-addressed step sequences, and executed by a rewindable
//! stack machine that streams external inputs drive reactively.

pub mod analysis;
pub mod compiler;
pub mod error;
pub mod registry;
pub mod runtime;
pub mod tree;

pub use analysis::{Conflict, Context, Type, Unit, UnknownReason};
pub use compiler::{Step, compile};
pub use error::EngineError;
pub use registry::{BaseType, NativeCall, NativeFunction, Registry};
pub use runtime::{
    EngineEvent, Evaluator, EvaluatorSnapshot, EvaluatorState, EventSender, ExceptionKind, Mode,
    Source, Stream, StreamDefinition, StreamId, Value,
};
pub use tree::{NodeArena, NodeId, NodeKind};
