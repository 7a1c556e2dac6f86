//! Per-pass analysis context.
//!
//! A Context is created at the start of a type or conflict query and
//! discarded after: it owns the derived parent index, the visitation stack
//! guarding against cyclic bindings, and a type cache keyed by node. A
//! structural edit discards the whole thing; there is no incremental
//! invalidation.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

use crate::registry::{BaseType, NativeFunction, Registry};
use crate::runtime::stream::StreamDefinition;
use crate::runtime::value::Value;
use crate::tree::{NodeArena, NodeId, NodeKind};

use super::types::{Type, UnknownReason};

/// What a name resolved to.
#[derive(Debug)]
pub enum Definition<'a> {
    /// A lexical bind.
    Bind(NodeId),
    /// A catalog function.
    Function(&'a Arc<NativeFunction>),
    /// A catalog stream definition.
    Stream(&'a Arc<StreamDefinition>),
    /// A catalog shared value.
    Share(&'a Value),
}

pub struct Context<'a> {
    arena: &'a NodeArena,
    root: NodeId,
    registry: &'a Registry,
    parents: HashMap<NodeId, NodeId>,
    visiting: RefCell<Vec<NodeId>>,
    cache: RefCell<HashMap<NodeId, Type>>,
}

impl<'a> Context<'a> {
    pub fn new(arena: &'a NodeArena, root: NodeId, registry: &'a Registry) -> Self {
        Self {
            arena,
            root,
            registry,
            parents: arena.parent_index(root),
            visiting: RefCell::new(Vec::new()),
            cache: RefCell::new(HashMap::new()),
        }
    }

    pub fn arena(&self) -> &NodeArena {
        self.arena
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn registry(&self) -> &Registry {
        self.registry
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.parents.get(&node).copied()
    }

    /// Ancestors from the node's parent up to the root.
    pub fn ancestors(&self, node: NodeId) -> Vec<NodeId> {
        let mut chain = Vec::new();
        let mut cursor = node;
        while let Some(parent) = self.parent(cursor) {
            chain.push(parent);
            cursor = parent;
        }
        chain
    }

    /// The name texts a bind declares.
    pub fn bind_names(&self, bind: NodeId) -> Vec<Arc<str>> {
        let Some(NodeKind::Bind { names, .. }) = self.arena.kind(bind) else {
            return Vec::new();
        };
        names
            .iter()
            .filter_map(|name| match self.arena.kind(*name) {
                Some(NodeKind::Name { text }) => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    fn bind_declares(&self, bind: NodeId, name: &str) -> bool {
        self.bind_names(bind).iter().any(|text| text.as_ref() == name)
    }

    /// Resolve a referenced name: walk the lexical enclosure chain outward
    /// from the use site, then fall back to the catalog.
    pub fn resolve(&self, name: &str, from: NodeId) -> Option<Definition<'_>> {
        for ancestor in self.ancestors(from) {
            match self.arena.kind(ancestor) {
                Some(NodeKind::Block { statements, .. }) => {
                    for statement in statements {
                        if matches!(self.arena.kind(*statement), Some(NodeKind::Bind { .. }))
                            && self.bind_declares(*statement, name)
                        {
                            return Some(Definition::Bind(*statement));
                        }
                    }
                }
                Some(NodeKind::TableLiteral { columns, .. }) => {
                    for column in columns {
                        if self.bind_declares(*column, name) {
                            return Some(Definition::Bind(*column));
                        }
                    }
                }
                _ => {}
            }
        }
        if let Some(function) = self.registry.function(name) {
            return Some(Definition::Function(function));
        }
        if let Some(definition) = self.registry.stream_definition(name) {
            return Some(Definition::Stream(definition));
        }
        self.registry.shared(name).map(Definition::Share)
    }

    /// Whether the node is currently on the visitation stack.
    pub fn visited(&self, node: NodeId) -> bool {
        self.visiting.borrow().contains(&node)
    }

    /// The node's type, cached for the context's lifetime. Re-entering a
    /// node while it is still being computed yields the cyclic unknown type
    /// instead of recursing.
    pub fn type_of(&self, node: NodeId) -> Type {
        if let Some(cached) = self.cache.borrow().get(&node) {
            return cached.clone();
        }
        if self.visited(node) {
            return Type::Unknown(UnknownReason::Cycle);
        }
        self.visiting.borrow_mut().push(node);
        let computed = self.compute_type(node);
        self.visiting.borrow_mut().pop();
        self.cache.borrow_mut().insert(node, computed.clone());
        computed
    }

    /// A property subject's effective type: streams are unwrapped to their
    /// value type, since they are evaluated to their values, not themselves.
    pub fn subject_type(&self, subject: NodeId) -> Type {
        match self.type_of(subject) {
            Type::Stream(value) => *value,
            other => other,
        }
    }

    fn compute_type(&self, node: NodeId) -> Type {
        let Some(kind) = self.arena.kind(node) else {
            return Type::Unknown(UnknownReason::Missing);
        };
        match kind {
            NodeKind::Literal { value } => value.type_of(),
            NodeKind::Name { .. } | NodeKind::Row { .. } => Type::Unknown(UnknownReason::Missing),
            NodeKind::Block { statements, .. } => match statements.last() {
                None => Type::None,
                Some(last) => match self.arena.kind(*last) {
                    Some(NodeKind::Bind { .. }) => Type::None,
                    _ => self.type_of(*last),
                },
            },
            NodeKind::Bind {
                declared, value, ..
            } => match declared {
                Some(declared) => declared.clone(),
                None => match value {
                    Some(value) => self.type_of(*value),
                    None => Type::Unknown(UnknownReason::Missing),
                },
            },
            NodeKind::ListLiteral { items } => {
                let item = items
                    .iter()
                    .map(|item| self.type_of(*item))
                    .reduce(Type::union)
                    .unwrap_or(Type::Any);
                Type::list(item)
            }
            NodeKind::MapLiteral { keys, values } => {
                let key = keys
                    .iter()
                    .map(|key| self.type_of(*key))
                    .reduce(Type::union)
                    .unwrap_or(Type::Any);
                let value = values
                    .iter()
                    .map(|value| self.type_of(*value))
                    .reduce(Type::union)
                    .unwrap_or(Type::Any);
                Type::map(key, value)
            }
            NodeKind::StructureLiteral {
                name,
                field_names,
                field_values,
            } => {
                let fields = field_names
                    .iter()
                    .zip(field_values)
                    .filter_map(|(field, value)| match self.arena.kind(*field) {
                        Some(NodeKind::Name { text }) => {
                            Some((text.clone(), self.type_of(*value)))
                        }
                        _ => None,
                    })
                    .collect();
                Type::Structure {
                    name: name.clone(),
                    fields,
                }
            }
            NodeKind::TableLiteral { columns, .. } => {
                let columns = columns
                    .iter()
                    .map(|column| {
                        let name = self
                            .bind_names(*column)
                            .into_iter()
                            .next()
                            .unwrap_or_else(|| Arc::from(""));
                        (name, self.type_of(*column))
                    })
                    .collect();
                Type::Table(columns)
            }
            NodeKind::Reference { name } => match self.resolve(name, node) {
                Some(Definition::Bind(bind)) => match self.type_of(bind) {
                    // References sample streams.
                    Type::Stream(value) => *value,
                    other => other,
                },
                Some(Definition::Function(function)) => function.signature(),
                Some(Definition::Stream(definition)) => {
                    Type::stream(definition.value_type.clone())
                }
                Some(Definition::Share(value)) => value.type_of(),
                None => Type::Unknown(UnknownReason::Unresolved),
            },
            NodeKind::PropertyReference { subject, property } => {
                let subject = self.subject_type(*subject);
                if let Type::Structure { fields, .. } = &subject {
                    if let Some((_, field)) =
                        fields.iter().find(|(name, _)| name.as_ref() == property.as_ref())
                    {
                        return field.clone();
                    }
                }
                BaseType::of_type(&subject)
                    .and_then(|base| self.registry.member(base, property))
                    .map(|member| member.signature())
                    .unwrap_or(Type::Unknown(UnknownReason::Unresolved))
            }
            NodeKind::ListAccess { list, .. } => match self.type_of(*list) {
                Type::List(item) => Type::union(*item, Type::None),
                _ => Type::Unknown(UnknownReason::Missing),
            },
            NodeKind::Conditional { yes, no, .. } => {
                Type::union(self.type_of(*yes), self.type_of(*no))
            }
            NodeKind::Evaluate { callee, .. } => match self.type_of(*callee) {
                Type::Function { output, .. } => *output,
                Type::Unknown(reason) => Type::Unknown(reason),
                _ => Type::Unknown(UnknownReason::Unresolved),
            },
            NodeKind::StreamExpression { definition, .. } => self
                .registry
                .stream_definition(definition)
                .map(|definition| Type::stream(definition.value_type.clone()))
                .unwrap_or(Type::Unknown(UnknownReason::Unresolved)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::types::Unit;

    #[test]
    fn names_resolve_outward_through_enclosing_blocks() {
        let mut arena = NodeArena::new();
        let one = arena.number(1.0);
        let outer_bind = arena.bind(&["x"], None, Some(one));
        let reference = arena.reference("x");
        let inner = arena.block(vec![reference]);
        let root = arena.program(vec![outer_bind, inner]);

        let registry = Registry::new();
        let context = Context::new(&arena, root, &registry);
        assert!(matches!(
            context.resolve("x", reference),
            Some(Definition::Bind(bind)) if bind == outer_bind
        ));
        assert_eq!(context.type_of(reference), Type::number());
    }

    #[test]
    fn unresolved_names_fall_back_to_the_catalog() {
        let mut arena = NodeArena::new();
        let reference = arena.reference("time");
        let root = arena.program(vec![reference]);

        let registry = Registry::with_builtins();
        let context = Context::new(&arena, root, &registry);
        assert!(matches!(
            context.resolve("time", reference),
            Some(Definition::Stream(_))
        ));
        // A catalog stream definition types as a stream of its value type.
        assert_eq!(
            context.type_of(reference),
            Type::stream(Type::Number(Unit::of("ms")))
        );
    }

    #[test]
    fn self_referential_binds_type_as_cyclic_instead_of_recursing() {
        let mut arena = NodeArena::new();
        let reference = arena.reference("x");
        let bind = arena.bind(&["x"], None, Some(reference));
        let root = arena.program(vec![bind]);

        let registry = Registry::new();
        let context = Context::new(&arena, root, &registry);
        assert_eq!(context.type_of(bind), Type::Unknown(UnknownReason::Cycle));
    }
}
