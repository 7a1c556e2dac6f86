//! Conflict detector rules.

use rill::analysis::{Context, program_conflicts};
use rill::{Conflict, NodeArena, Registry, Type, UnknownReason};

fn conflicts_for(build: impl FnOnce(&mut NodeArena) -> rill::NodeId) -> Vec<Conflict> {
    let mut arena = NodeArena::new();
    let root = build(&mut arena);
    let registry = Registry::with_builtins();
    let context = Context::new(&arena, root, &registry);
    program_conflicts(&context)
}

#[test]
fn binding_the_same_name_twice_yields_exactly_one_conflict() {
    let conflicts = conflicts_for(|arena| {
        let value = arena.number(1.0);
        let bind = arena.bind(&["x", "x"], None, Some(value));
        let reference = arena.reference("x");
        arena.program(vec![bind, reference])
    });
    let duplicates: Vec<_> = conflicts
        .iter()
        .filter_map(|conflict| match conflict {
            Conflict::DuplicateAliases { duplicates, .. } => Some(duplicates),
            _ => None,
        })
        .collect();
    assert_eq!(duplicates.len(), 1);
    // Both occurrences are referenced.
    assert_eq!(duplicates[0].len(), 2);
}

#[test]
fn binding_two_distinct_names_never_conflicts() {
    let conflicts = conflicts_for(|arena| {
        let value = arena.number(1.0);
        let bind = arena.bind(&["x", "y"], None, Some(value));
        let x = arena.reference("x");
        let y = arena.reference("y");
        let uses = arena.list(vec![x, y]);
        arena.program(vec![bind, uses])
    });
    assert!(
        conflicts
            .iter()
            .all(|conflict| !matches!(conflict, Conflict::DuplicateAliases { .. }))
    );
}

#[test]
fn a_redefined_name_lists_every_prior_definition() {
    let mut first = None;
    let mut second = None;
    let conflicts = conflicts_for(|arena| {
        let one = arena.number(1.0);
        let two = arena.number(2.0);
        let first_bind = arena.bind(&["x"], None, Some(one));
        let second_bind = arena.bind(&["x"], None, Some(two));
        first = Some(first_bind);
        second = Some(second_bind);
        let reference = arena.reference("x");
        arena.program(vec![first_bind, second_bind, reference])
    });
    let duplicate = conflicts
        .iter()
        .find_map(|conflict| match conflict {
            Conflict::DuplicateBinds { bind, prior } => Some((bind, prior)),
            _ => None,
        })
        .expect("the second definition should conflict");
    assert_eq!(*duplicate.0, second.unwrap());
    assert_eq!(duplicate.1, &vec![first.unwrap()]);
}

#[test]
fn a_declared_type_must_accept_the_inferred_type() {
    let conflicts = conflicts_for(|arena| {
        let value = arena.number(1.0);
        let bind = arena.bind(&["x"], Some(Type::Text), Some(value));
        let reference = arena.reference("x");
        arena.program(vec![bind, reference])
    });
    assert!(conflicts.iter().any(|conflict| matches!(
        conflict,
        Conflict::IncompatibleBind {
            declared: Type::Text,
            ..
        }
    )));
}

#[test]
fn an_unreferenced_bind_is_reported_unused() {
    let conflicts = conflicts_for(|arena| {
        let value = arena.number(1.0);
        let bind = arena.bind(&["x"], None, Some(value));
        arena.program(vec![bind])
    });
    assert!(
        conflicts
            .iter()
            .any(|conflict| matches!(conflict, Conflict::UnusedBind { .. }))
    );
}

#[test]
fn a_single_reference_anywhere_in_the_enclosure_suppresses_unused() {
    let conflicts = conflicts_for(|arena| {
        let value = arena.number(1.0);
        let bind = arena.bind(&["x"], None, Some(value));
        let reference = arena.reference("x");
        let nested = arena.block(vec![reference]);
        arena.program(vec![bind, nested])
    });
    assert!(
        conflicts
            .iter()
            .all(|conflict| !matches!(conflict, Conflict::UnusedBind { .. }))
    );
}

#[test]
fn table_column_declarations_are_exempt_from_the_unused_rule() {
    let conflicts = conflicts_for(|arena| {
        let default = arena.number(0.0);
        let column = arena.bind(&["count"], None, Some(default));
        let cell = arena.number(1.0);
        let row = arena.row(vec![cell]);
        let table = arena.table(vec![column], vec![row]);
        arena.program(vec![table])
    });
    assert!(
        conflicts
            .iter()
            .all(|conflict| !matches!(conflict, Conflict::UnusedBind { .. }))
    );
}

#[test]
fn cyclic_binds_resolve_to_the_cyclic_type_without_looping() {
    let mut arena = NodeArena::new();
    let reference = arena.reference("x");
    let bind = arena.bind(&["x"], None, Some(reference));
    let root = arena.program(vec![bind]);
    let registry = Registry::with_builtins();
    let context = Context::new(&arena, root, &registry);

    assert_eq!(context.type_of(bind), Type::Unknown(UnknownReason::Cycle));
    // And the detector terminates over the cyclic program.
    let _ = program_conflicts(&context);
}

#[test]
fn shadowing_across_scopes_counts_outer_definitions_as_prior() {
    let mut outer = None;
    let conflicts = conflicts_for(|arena| {
        let one = arena.number(1.0);
        let outer_bind = arena.bind(&["x"], None, Some(one));
        outer = Some(outer_bind);
        let two = arena.number(2.0);
        let inner_bind = arena.bind(&["x"], None, Some(two));
        let reference = arena.reference("x");
        let inner = arena.block(vec![inner_bind, reference]);
        let outer_reference = arena.reference("x");
        arena.program(vec![outer_bind, inner, outer_reference])
    });
    let duplicate = conflicts
        .iter()
        .find_map(|conflict| match conflict {
            Conflict::DuplicateBinds { prior, .. } => Some(prior),
            _ => None,
        })
        .expect("the inner definition should conflict with the outer one");
    assert_eq!(duplicate, &vec![outer.unwrap()]);
}
