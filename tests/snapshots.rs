//! Persistence mirror round-trips.

use std::sync::Arc;

use rill::runtime::EvaluatorSnapshot;
use rill::{EngineEvent, Evaluator, NodeArena, NodeId, Registry, Source, Value};

/// A button bound and referenced; returns the evaluator and the stream's
/// defining node.
fn button_evaluator() -> (Evaluator, NodeId) {
    let mut arena = NodeArena::new();
    let press = arena.stream("button", vec![]);
    let bind = arena.bind(&["pressed"], None, Some(press));
    let reference = arena.reference("pressed");
    let root = arena.program(vec![bind, reference]);
    let evaluator = Evaluator::new(
        Source::new("main", arena, root),
        Arc::new(Registry::with_builtins()),
    );
    (evaluator, press)
}

fn press(evaluator: &mut Evaluator, node: NodeId, down: bool) {
    let id = evaluator.stream_at(node).expect("stream is live").id;
    evaluator
        .event_sender()
        .unbounded_send(EngineEvent::Append {
            stream: id,
            value: Value::bool(down),
            silent: false,
        })
        .unwrap();
    evaluator.pump();
}

#[test]
fn a_snapshot_round_trips_through_json() {
    let (mut evaluator, node) = button_evaluator();
    evaluator.start();
    press(&mut evaluator, node, false);

    let snapshot = EvaluatorSnapshot::capture(&evaluator);
    assert_eq!(snapshot.version, EvaluatorSnapshot::VERSION);

    let encoded = serde_json::to_string(&snapshot).expect("snapshots are serializable");
    let decoded: EvaluatorSnapshot =
        serde_json::from_str(&encoded).expect("snapshots deserialize");
    assert_eq!(snapshot, decoded);
}

#[test]
fn restoring_a_snapshot_rebuilds_stream_histories() {
    let (mut evaluator, node) = button_evaluator();
    evaluator.start();
    press(&mut evaluator, node, false);
    let id = evaluator.stream_at(node).unwrap().id;
    let snapshot = EvaluatorSnapshot::capture(&evaluator);

    // A fresh session over the same source picks the history back up.
    let (mut restored, restored_node) = button_evaluator();
    snapshot.restore(&mut restored).unwrap();

    let stream = restored.stream_at(restored_node).unwrap();
    assert_eq!(stream.id, id);
    assert_eq!(stream.history().len(), 2);
    assert_eq!(stream.latest(), Value::bool(false));
    assert_eq!(restored.tick(), evaluator.tick());
    assert_eq!(restored.latest(), Some(&Value::bool(false)));
}

#[test]
fn restoring_against_an_unknown_definition_is_rejected() {
    let (mut evaluator, _node) = button_evaluator();
    evaluator.start();
    let mut snapshot = EvaluatorSnapshot::capture(&evaluator);
    snapshot.streams[0].definition = "gone".to_string();

    let (mut restored, _) = button_evaluator();
    assert!(snapshot.restore(&mut restored).is_err());
}
