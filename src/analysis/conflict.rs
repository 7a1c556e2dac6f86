//! Static conflict detection.
//!
//! Conflicts are purely advisory diagnostics: they never block compilation
//! or execution and never mutate the tree. Each rule is independent and
//! order-insensitive, producing zero or more conflicts per node.

use std::collections::HashMap;
use std::sync::Arc;

use crate::tree::{NodeId, NodeKind};

use super::context::Context;
use super::types::Type;

/// An immutable diagnostic attached to a node.
#[derive(Debug, Clone, PartialEq)]
pub enum Conflict {
    /// Two names bound in the same binding statement with equal text. Lists
    /// every colliding Name node.
    DuplicateAliases {
        bind: NodeId,
        duplicates: Vec<NodeId>,
    },
    /// A name already defined in the enclosing scope. Lists every prior
    /// definition.
    DuplicateBinds { bind: NodeId, prior: Vec<NodeId> },
    /// The declared type is incompatible with the bound expression's
    /// inferred type.
    IncompatibleBind {
        bind: NodeId,
        declared: Type,
        actual: Type,
    },
    /// A bound name never referenced anywhere in its enclosure.
    UnusedBind { bind: NodeId },
    /// A conditional whose test expression is not boolean-typed.
    ExpectedBooleanCondition { conditional: NodeId, actual: Type },
}

impl Conflict {
    /// The node the conflict is attached to.
    pub fn node(&self) -> NodeId {
        match self {
            Conflict::DuplicateAliases { bind, .. }
            | Conflict::DuplicateBinds { bind, .. }
            | Conflict::IncompatibleBind { bind, .. }
            | Conflict::UnusedBind { bind } => *bind,
            Conflict::ExpectedBooleanCondition { conditional, .. } => *conditional,
        }
    }
}

/// Conflicts for every node reachable from the context's root.
pub fn program_conflicts(context: &Context) -> Vec<Conflict> {
    let order = preorder(context);
    context
        .arena()
        .descendants(context.root())
        .into_iter()
        .flat_map(|node| conflicts_with_order(node, context, &order))
        .collect()
}

/// Conflicts for one node.
pub fn node_conflicts(node: NodeId, context: &Context) -> Vec<Conflict> {
    conflicts_with_order(node, context, &preorder(context))
}

fn preorder(context: &Context) -> HashMap<NodeId, usize> {
    context
        .arena()
        .descendants(context.root())
        .into_iter()
        .enumerate()
        .map(|(position, node)| (node, position))
        .collect()
}

fn conflicts_with_order(
    node: NodeId,
    context: &Context,
    order: &HashMap<NodeId, usize>,
) -> Vec<Conflict> {
    match context.arena().kind(node) {
        Some(NodeKind::Bind { .. }) => bind_conflicts(node, context, order),
        Some(NodeKind::Conditional { condition, .. }) => {
            let actual = context.type_of(*condition);
            if actual == Type::Bool {
                Vec::new()
            } else {
                vec![Conflict::ExpectedBooleanCondition {
                    conditional: node,
                    actual,
                }]
            }
        }
        _ => Vec::new(),
    }
}

fn bind_conflicts(
    bind: NodeId,
    context: &Context,
    order: &HashMap<NodeId, usize>,
) -> Vec<Conflict> {
    let Some(NodeKind::Bind {
        names,
        declared,
        value,
    }) = context.arena().kind(bind)
    else {
        return Vec::new();
    };
    let mut conflicts = Vec::new();

    // Aliases within one bind have to be unique.
    let texts: Vec<(NodeId, Arc<str>)> = names
        .iter()
        .filter_map(|name| match context.arena().kind(*name) {
            Some(NodeKind::Name { text }) => Some((*name, text.clone())),
            _ => None,
        })
        .collect();
    let duplicates: Vec<NodeId> = texts
        .iter()
        .filter(|(_, text)| texts.iter().filter(|(_, other)| other == text).count() > 1)
        .map(|(name, _)| *name)
        .collect();
    if !duplicates.is_empty() {
        conflicts.push(Conflict::DuplicateAliases { bind, duplicates });
    }

    // A name can't already be defined in the enclosing scope.
    let prior = prior_definitions(bind, context, order);
    if !prior.is_empty() {
        conflicts.push(Conflict::DuplicateBinds { bind, prior });
    }

    // If there's a declared type, the value must match it.
    if let (Some(declared), Some(value)) = (declared, value) {
        let actual = context.type_of(*value);
        if !declared.accepts(&actual) {
            conflicts.push(Conflict::IncompatibleBind {
                bind,
                declared: declared.clone(),
                actual,
            });
        }
    }

    // The bind should be used somewhere in its enclosure. Table column
    // declarations are exempt: they exist to shape rows.
    let column = matches!(
        context.parent(bind).and_then(|parent| context.arena().kind(parent)),
        Some(NodeKind::TableLiteral { .. })
    );
    if !column && !is_referenced(bind, context) {
        conflicts.push(Conflict::UnusedBind { bind });
    }

    conflicts
}

/// Definitions of any of the bind's names that appear earlier in an
/// enclosing scope.
fn prior_definitions(
    bind: NodeId,
    context: &Context,
    order: &HashMap<NodeId, usize>,
) -> Vec<NodeId> {
    let names = context.bind_names(bind);
    let position = order.get(&bind).copied().unwrap_or(usize::MAX);
    let mut prior = Vec::new();
    for ancestor in context.ancestors(bind) {
        let candidates: Vec<NodeId> = match context.arena().kind(ancestor) {
            Some(NodeKind::Block { statements, .. }) => statements
                .iter()
                .copied()
                .filter(|statement| {
                    matches!(context.arena().kind(*statement), Some(NodeKind::Bind { .. }))
                })
                .collect(),
            Some(NodeKind::TableLiteral { columns, .. }) => columns.clone(),
            _ => Vec::new(),
        };
        for candidate in candidates {
            if candidate == bind {
                continue;
            }
            if order.get(&candidate).copied().unwrap_or(usize::MAX) >= position {
                continue;
            }
            let candidate_names = context.bind_names(candidate);
            if candidate_names
                .iter()
                .any(|name| names.iter().any(|own| own == name))
                && !prior.contains(&candidate)
            {
                prior.push(candidate);
            }
        }
    }
    prior
}

/// Whether any of the bind's names is referenced inside its nearest
/// enclosing block.
fn is_referenced(bind: NodeId, context: &Context) -> bool {
    let names = context.bind_names(bind);
    let enclosure = context.ancestors(bind).into_iter().find(|ancestor| {
        matches!(
            context.arena().kind(*ancestor),
            Some(NodeKind::Block { .. })
        )
    });
    let Some(enclosure) = enclosure else {
        // A bind outside any block has no enclosure to be used in.
        return true;
    };
    context
        .arena()
        .descendants(enclosure)
        .into_iter()
        .any(|candidate| match context.arena().kind(candidate) {
            Some(NodeKind::Reference { name }) => names.iter().any(|own| own == name),
            _ => false,
        })
}
