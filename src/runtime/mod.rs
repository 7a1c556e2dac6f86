//! The runtime: values, streams, the evaluator and its persistence mirror.

pub mod evaluator;
pub mod snapshot;
pub mod stream;
pub mod value;

pub use evaluator::{EngineEvent, Evaluator, EvaluatorState, EventSender, Frame, Mode, Source};
pub use snapshot::{EvaluatorSnapshot, SerializedValue, StreamSnapshot};
pub use stream::{Stream, StreamDefinition, StreamId, StreamInput};
pub use value::{Exception, ExceptionKind, StructureValue, Value};
