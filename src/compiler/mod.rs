//! Lowering of tree nodes into step sequences.
//!
//! Each node kind compiles independently: a start marker, the recursively
//! compiled operand sequences, a finish marker. Jumps are encoded as
//! relative counts only, so sequences splice freely.

pub mod step;

pub use step::Step;

use crate::runtime::value::{Exception, ExceptionKind};
use crate::tree::{NodeArena, NodeId, NodeKind};

/// Compile a node into its step sequence.
pub fn compile(arena: &NodeArena, node: NodeId) -> Vec<Step> {
    let Some(kind) = arena.kind(node) else {
        return vec![Step::Halt {
            exception: Exception {
                kind: ExceptionKind::ExpectedValue,
                node,
            },
            node,
        }];
    };
    match kind {
        NodeKind::Literal { .. } | NodeKind::Reference { .. } | NodeKind::Name { .. } => {
            vec![Step::StartFinish(node)]
        }
        NodeKind::Block { statements, .. } => {
            let mut steps = vec![Step::Start(node)];
            for statement in statements {
                steps.extend(compile(arena, *statement));
            }
            steps.push(Step::Finish(node));
            steps
        }
        NodeKind::Bind { value, .. } => match value {
            // A bind with no supplied value is a defect surfaced only at
            // evaluation time, never as a static conflict.
            None => vec![Step::Halt {
                exception: Exception {
                    kind: ExceptionKind::ExpectedValue,
                    node,
                },
                node,
            }],
            Some(value) => {
                let mut steps = vec![Step::Start(node)];
                steps.extend(compile(arena, *value));
                steps.push(Step::Finish(node));
                steps
            }
        },
        NodeKind::Conditional { condition, yes, no } => {
            let yes = compile(arena, *yes);
            let no = compile(arena, *no);
            // Evaluate the condition, jump past the yes when false,
            // otherwise run the yes then jump past the no. Both paths
            // converge on the finish.
            let mut steps = vec![Step::Start(node)];
            steps.extend(compile(arena, *condition));
            steps.push(Step::JumpIf {
                count: yes.len() + 1,
                peek: false,
                yes: false,
                node,
            });
            steps.extend(yes);
            steps.push(Step::Jump {
                count: no.len(),
                node,
            });
            steps.extend(no);
            steps.push(Step::Finish(node));
            steps
        }
        NodeKind::ListLiteral { items } => {
            let mut steps = vec![Step::Start(node)];
            for item in items {
                steps.extend(compile(arena, *item));
            }
            steps.push(Step::Finish(node));
            steps
        }
        NodeKind::MapLiteral { keys, values } => {
            let mut steps = vec![Step::Start(node)];
            for (key, value) in keys.iter().zip(values) {
                steps.extend(compile(arena, *key));
                steps.extend(compile(arena, *value));
            }
            steps.push(Step::Finish(node));
            steps
        }
        NodeKind::StructureLiteral { field_values, .. } => {
            let mut steps = vec![Step::Start(node)];
            for value in field_values {
                steps.extend(compile(arena, *value));
            }
            steps.push(Step::Finish(node));
            steps
        }
        NodeKind::TableLiteral { rows, .. } => {
            // Columns declare names; only the rows evaluate.
            let mut steps = vec![Step::Start(node)];
            for row in rows {
                steps.extend(compile(arena, *row));
            }
            steps.push(Step::Finish(node));
            steps
        }
        NodeKind::Row { cells } => {
            let mut steps = vec![Step::Start(node)];
            for cell in cells {
                steps.extend(compile(arena, *cell));
            }
            steps.push(Step::Finish(node));
            steps
        }
        NodeKind::PropertyReference { subject, .. } => {
            let mut steps = vec![Step::Start(node)];
            steps.extend(compile(arena, *subject));
            steps.push(Step::Finish(node));
            steps
        }
        NodeKind::ListAccess { list, index } => {
            let mut steps = vec![Step::Start(node)];
            steps.extend(compile(arena, *list));
            steps.extend(compile(arena, *index));
            steps.push(Step::Finish(node));
            steps
        }
        NodeKind::Evaluate { callee, inputs } => {
            // The callee names a catalog function; it is resolved at the
            // finish, never evaluated to a value. A member callee's subject
            // is evaluated first, then the inputs, left to right.
            let mut steps = vec![Step::Start(node)];
            match arena.kind(*callee) {
                Some(NodeKind::PropertyReference { subject, .. }) => {
                    steps.extend(compile(arena, *subject));
                }
                Some(NodeKind::Reference { .. }) => {}
                _ => {
                    return vec![Step::Halt {
                        exception: Exception {
                            kind: ExceptionKind::ExpectedFunction,
                            node,
                        },
                        node,
                    }];
                }
            }
            for input in inputs {
                steps.extend(compile(arena, *input));
            }
            steps.push(Step::Finish(node));
            steps
        }
        NodeKind::StreamExpression { inputs, .. } => {
            let mut steps = vec![Step::Start(node)];
            for input in inputs {
                steps.extend(compile(arena, *input));
            }
            steps.push(Step::Finish(node));
            steps
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conditional_jump_counts_skip_exactly_one_branch() {
        let mut arena = NodeArena::new();
        let condition = arena.boolean(true);
        let yes = arena.number(1.0);
        let no = arena.number(2.0);
        let conditional = arena.conditional(condition, yes, no);

        let steps = compile(&arena, conditional);
        assert_eq!(
            steps,
            vec![
                Step::Start(conditional),
                Step::StartFinish(condition),
                Step::JumpIf {
                    count: 2,
                    peek: false,
                    yes: false,
                    node: conditional,
                },
                Step::StartFinish(yes),
                Step::Jump {
                    count: 1,
                    node: conditional,
                },
                Step::StartFinish(no),
                Step::Finish(conditional),
            ]
        );
    }

    #[test]
    fn valueless_binds_compile_to_a_halt() {
        let mut arena = NodeArena::new();
        let bind = arena.bind(&["x"], None, None);
        let steps = compile(&arena, bind);
        assert!(matches!(
            steps.as_slice(),
            [Step::Halt {
                exception: Exception {
                    kind: ExceptionKind::ExpectedValue,
                    ..
                },
                ..
            }]
        ));
    }

    /// Every start has a reachable matching finish without crossing an
    /// outer start.
    #[test]
    fn start_and_finish_markers_balance_for_every_kind() {
        let mut arena = NodeArena::new();
        let one = arena.number(1.0);
        let two = arena.number(2.0);
        let three = arena.number(3.0);
        let condition = arena.boolean(false);
        let conditional = arena.conditional(condition, one, two);
        let items = vec![three, conditional];
        let list = arena.list(items);
        let key = arena.text("k");
        let value = arena.number(4.0);
        let map = arena.map(vec![(key, value)]);
        let five = arena.number(5.0);
        let structure = arena.structure("point", vec![("x", five)]);
        let subject = arena.reference("s");
        let property = arena.property(subject, "x");
        let column_value = arena.number(0.0);
        let column = arena.bind(&["c"], None, Some(column_value));
        let cell = arena.number(6.0);
        let row = arena.row(vec![cell]);
        let table = arena.table(vec![column], vec![row]);
        let bound = arena.number(7.0);
        let bind = arena.bind(&["x"], None, Some(bound));
        let root = arena.program(vec![bind, list, map, structure, property, table]);

        for node in arena.descendants(root) {
            if matches!(arena.kind(node), Some(NodeKind::Name { .. })) {
                continue;
            }
            let steps = compile(&arena, node);
            let mut open: Vec<NodeId> = Vec::new();
            for step in &steps {
                match step {
                    Step::Start(started) => open.push(*started),
                    Step::Finish(finished) => {
                        assert_eq!(open.pop(), Some(*finished), "unbalanced finish");
                    }
                    _ => {}
                }
            }
            assert!(open.is_empty(), "unmatched start in {steps:?}");
        }
    }
}
