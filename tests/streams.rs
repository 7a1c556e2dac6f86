//! Reactive streams: wake-up, silencing, filtering, sampling.

use std::sync::Arc;

use rill::{
    EngineEvent, Evaluator, NodeArena, NodeId, Registry, Source, StreamId, Value,
};

fn evaluator_for(build: impl FnOnce(&mut NodeArena) -> NodeId) -> Evaluator {
    let mut arena = NodeArena::new();
    let root = build(&mut arena);
    Evaluator::new(
        Source::new("main", arena, root),
        Arc::new(Registry::with_builtins()),
    )
}

fn append(evaluator: &Evaluator, stream: StreamId, value: Value) {
    evaluator
        .event_sender()
        .unbounded_send(EngineEvent::Append {
            stream,
            value,
            silent: false,
        })
        .expect("the queue outlives the test");
}

#[test]
fn a_button_program_reevaluates_on_each_recorded_press() {
    let mut press_node = None;
    let mut evaluator = evaluator_for(|arena| {
        let press = arena.stream("button", vec![]);
        press_node = Some(press);
        let bind = arena.bind(&["pressed"], None, Some(press));
        let reference = arena.reference("pressed");
        arena.program(vec![bind, reference])
    });
    evaluator.start();
    // Buttons seed their history with a value.
    assert_eq!(evaluator.latest(), Some(&Value::bool(true)));

    let id = evaluator
        .stream_at(press_node.unwrap())
        .expect("the stream activated on first run")
        .id;
    append(&evaluator, id, Value::bool(false));
    assert_eq!(evaluator.pump(), 1);
    assert_eq!(evaluator.latest(), Some(&Value::bool(false)));
    assert_eq!(evaluator.tick(), 2);
}

#[test]
fn stream_activation_happens_once_per_defining_node() {
    let mut press_node = None;
    let mut evaluator = evaluator_for(|arena| {
        let press = arena.stream("button", vec![]);
        press_node = Some(press);
        let bind = arena.bind(&["pressed"], None, Some(press));
        let reference = arena.reference("pressed");
        arena.program(vec![bind, reference])
    });
    evaluator.start();
    let first = evaluator.stream_at(press_node.unwrap()).unwrap().id;
    append(&evaluator, first, Value::bool(false));
    evaluator.pump();
    // The re-evaluation reconfigured the existing stream instead of
    // constructing a new one.
    let second = evaluator.stream_at(press_node.unwrap()).unwrap().id;
    assert_eq!(first, second);
}

#[test]
fn a_silent_append_is_recorded_but_never_wakes_the_evaluator() {
    let mut press_node = None;
    let mut evaluator = evaluator_for(|arena| {
        let press = arena.stream("button", vec![]);
        press_node = Some(press);
        let bind = arena.bind(&["pressed"], None, Some(press));
        let reference = arena.reference("pressed");
        arena.program(vec![bind, reference])
    });
    evaluator.start();
    let id = evaluator.stream_at(press_node.unwrap()).unwrap().id;

    evaluator
        .event_sender()
        .unbounded_send(EngineEvent::Append {
            stream: id,
            value: Value::bool(false),
            silent: true,
        })
        .unwrap();
    evaluator.pump();

    // Recorded in history, but no re-evaluation happened.
    assert_eq!(evaluator.tick(), 1);
    assert_eq!(evaluator.latest(), Some(&Value::bool(true)));
    let history = evaluator.stream_at(press_node.unwrap()).unwrap().history();
    assert_eq!(history.len(), 2);
}

#[test]
fn a_configured_button_filters_the_other_edge() {
    let mut press_node = None;
    let mut evaluator = evaluator_for(|arena| {
        let down_only = arena.boolean(true);
        let press = arena.stream("button", vec![down_only]);
        press_node = Some(press);
        let bind = arena.bind(&["pressed"], None, Some(press));
        let reference = arena.reference("pressed");
        arena.program(vec![bind, reference])
    });
    evaluator.start();
    let id = evaluator.stream_at(press_node.unwrap()).unwrap().id;

    // A release does not match the down-only configuration.
    append(&evaluator, id, Value::bool(false));
    evaluator.pump();
    assert_eq!(evaluator.tick(), 1);
    assert_eq!(
        evaluator.stream_at(press_node.unwrap()).unwrap().history().len(),
        1
    );

    // A press does.
    append(&evaluator, id, Value::bool(true));
    evaluator.pump();
    assert_eq!(evaluator.tick(), 2);
    assert_eq!(
        evaluator.stream_at(press_node.unwrap()).unwrap().history().len(),
        2
    );
}

#[test]
fn the_random_stream_samples_fresh_values_at_the_present() {
    let mut random_node = None;
    let mut evaluator = evaluator_for(|arena| {
        let random = arena.stream("random", vec![]);
        random_node = Some(random);
        let bind = arena.bind(&["roll"], None, Some(random));
        let reference = arena.reference("roll");
        arena.program(vec![bind, reference])
    });
    let first = evaluator.evaluate();
    let drawn = first.as_number().expect("a draw is a number");
    assert!((0.0..1.0).contains(&drawn));

    // Each present-moment read records a fresh draw, silently.
    let before = evaluator.stream_at(random_node.unwrap()).unwrap().history().len();
    evaluator.evaluate();
    let after = evaluator.stream_at(random_node.unwrap()).unwrap().history().len();
    assert!(after > before);
}

#[test]
fn ranged_random_draws_are_integers_within_the_range() {
    let mut evaluator = evaluator_for(|arena| {
        let min = arena.number(1.0);
        let max = arena.number(6.0);
        let roll = arena.stream("random", vec![min, max]);
        let bind = arena.bind(&["die"], None, Some(roll));
        let reference = arena.reference("die");
        arena.program(vec![bind, reference])
    });
    for _ in 0..20 {
        let result = evaluator.evaluate();
        let drawn = result.as_number().expect("a draw is a number");
        assert_eq!(drawn, drawn.trunc());
        assert!((1.0..=6.0).contains(&drawn));
    }
}

#[test]
fn a_time_program_tracks_the_latest_tick_value() {
    let mut time_node = None;
    let mut evaluator = evaluator_for(|arena| {
        let time = arena.stream("time", vec![]);
        time_node = Some(time);
        let bind = arena.bind(&["now"], None, Some(time));
        let reference = arena.reference("now");
        arena.program(vec![bind, reference])
    });
    evaluator.start();
    assert_eq!(evaluator.latest(), Some(&Value::number_with_unit(0.0, "ms")));

    let id = evaluator.stream_at(time_node.unwrap()).unwrap().id;
    append(&evaluator, id, Value::number(100.0));
    evaluator.pump();
    assert_eq!(
        evaluator.latest(),
        Some(&Value::number_with_unit(100.0, "ms"))
    );
}

#[test]
fn a_bare_reference_to_a_catalog_stream_activates_it_with_defaults() {
    let mut evaluator = evaluator_for(|arena| {
        let reference = arena.reference("random");
        arena.program(vec![reference])
    });
    let result = evaluator.evaluate();
    assert!(result.as_number().is_some());
}

#[test]
fn coalesced_appends_wake_exactly_one_reevaluation() {
    let mut press_node = None;
    let mut evaluator = evaluator_for(|arena| {
        let press = arena.stream("button", vec![]);
        press_node = Some(press);
        let bind = arena.bind(&["pressed"], None, Some(press));
        let reference = arena.reference("pressed");
        arena.program(vec![bind, reference])
    });
    evaluator.start();
    let id = evaluator.stream_at(press_node.unwrap()).unwrap().id;

    append(&evaluator, id, Value::bool(false));
    append(&evaluator, id, Value::bool(true));
    append(&evaluator, id, Value::bool(false));
    assert_eq!(evaluator.pump(), 3);

    // One wake for the whole batch; the run reads the newest value.
    assert_eq!(evaluator.tick(), 2);
    assert_eq!(evaluator.latest(), Some(&Value::bool(false)));
}
