//! Append-only node arena.
//!
//! Handles stay valid for the life of the arena; structural replacement
//! allocates a new spine from the replaced node up to the root and leaves
//! every other subtree shared.

use std::collections::HashMap;
use std::sync::Arc;

use crate::analysis::types::Type;
use crate::error::EngineError;
use crate::runtime::value::Value;

use super::node::{Node, NodeKind};

/// Unique identifier for a node in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Arena that holds every node of a program, current and superseded.
#[derive(Debug, Clone, Default)]
pub struct NodeArena {
    nodes: Vec<Node>,
}

impl NodeArena {
    pub fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    /// Insert a node and return its handle.
    pub fn insert(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node { kind });
        id
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index())
    }

    pub fn kind(&self, id: NodeId) -> Option<&NodeKind> {
        self.get(id).map(|node| &node.kind)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        id.index() < self.nodes.len()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All nodes reachable from `root`, preorder, `root` included.
    pub fn descendants(&self, root: NodeId) -> Vec<NodeId> {
        let mut found = Vec::new();
        let mut pending = vec![root];
        while let Some(id) = pending.pop() {
            if let Some(node) = self.get(id) {
                found.push(id);
                let children = node.children();
                // Reverse so the stack pops in slot order.
                pending.extend(children.into_iter().rev());
            }
        }
        found
    }

    /// Map every reachable node to its parent. Derived per pass; the tree
    /// itself stores no back-references.
    pub fn parent_index(&self, root: NodeId) -> HashMap<NodeId, NodeId> {
        let mut parents = HashMap::new();
        for id in self.descendants(root) {
            if let Some(node) = self.get(id) {
                for child in node.children() {
                    parents.insert(child, id);
                }
            }
        }
        parents
    }

    /// Replace `target` (anywhere under `root`) with `replacement`, returning
    /// the new root. Only the spine from the target to the root is
    /// reallocated; siblings keep their handles.
    pub fn replace(
        &mut self,
        root: NodeId,
        target: NodeId,
        replacement: NodeId,
    ) -> Result<NodeId, EngineError> {
        if !self.contains(target) {
            return Err(EngineError::UnknownNode(target));
        }
        if !self.contains(replacement) {
            return Err(EngineError::UnknownNode(replacement));
        }
        if root == target {
            return Ok(replacement);
        }
        let parents = self.parent_index(root);
        // Walk the spine from the target up to the root.
        let mut spine = Vec::new();
        let mut cursor = target;
        while let Some(&parent) = parents.get(&cursor) {
            spine.push(parent);
            cursor = parent;
        }
        if cursor != root {
            return Err(EngineError::DetachedNode(target));
        }
        let mut old_child = target;
        let mut new_child = replacement;
        for parent in spine {
            let rebuilt = match self.get(parent) {
                Some(node) => node.with_replaced_child(old_child, new_child),
                None => return Err(EngineError::UnknownNode(parent)),
            };
            old_child = parent;
            new_child = self.insert(rebuilt.kind);
        }
        Ok(new_child)
    }
}

/// Construction helpers. This is the surface the structural editor (and the
/// tests) build trees with.
impl NodeArena {
    pub fn boolean(&mut self, value: bool) -> NodeId {
        self.insert(NodeKind::Literal {
            value: Value::bool(value),
        })
    }

    pub fn number(&mut self, value: f64) -> NodeId {
        self.insert(NodeKind::Literal {
            value: Value::number(value),
        })
    }

    pub fn number_with_unit(&mut self, value: f64, unit: &str) -> NodeId {
        self.insert(NodeKind::Literal {
            value: Value::number_with_unit(value, unit),
        })
    }

    pub fn text(&mut self, value: &str) -> NodeId {
        self.insert(NodeKind::Literal {
            value: Value::text(value),
        })
    }

    pub fn none(&mut self) -> NodeId {
        self.insert(NodeKind::Literal { value: Value::None })
    }

    pub fn name(&mut self, text: &str) -> NodeId {
        self.insert(NodeKind::Name { text: text.into() })
    }

    pub fn bind(&mut self, names: &[&str], declared: Option<Type>, value: Option<NodeId>) -> NodeId {
        let names = names.iter().map(|name| self.name(name)).collect();
        self.insert(NodeKind::Bind {
            names,
            declared,
            value,
        })
    }

    pub fn reference(&mut self, name: &str) -> NodeId {
        self.insert(NodeKind::Reference { name: name.into() })
    }

    pub fn block(&mut self, statements: Vec<NodeId>) -> NodeId {
        self.insert(NodeKind::Block {
            statements,
            root: false,
        })
    }

    pub fn program(&mut self, statements: Vec<NodeId>) -> NodeId {
        self.insert(NodeKind::Block {
            statements,
            root: true,
        })
    }

    pub fn conditional(&mut self, condition: NodeId, yes: NodeId, no: NodeId) -> NodeId {
        self.insert(NodeKind::Conditional { condition, yes, no })
    }

    pub fn list(&mut self, items: Vec<NodeId>) -> NodeId {
        self.insert(NodeKind::ListLiteral { items })
    }

    pub fn map(&mut self, entries: Vec<(NodeId, NodeId)>) -> NodeId {
        let (keys, values) = entries.into_iter().unzip();
        self.insert(NodeKind::MapLiteral { keys, values })
    }

    pub fn structure(&mut self, name: &str, fields: Vec<(&str, NodeId)>) -> NodeId {
        let mut field_names = Vec::with_capacity(fields.len());
        let mut field_values = Vec::with_capacity(fields.len());
        for (field, value) in fields {
            field_names.push(self.name(field));
            field_values.push(value);
        }
        self.insert(NodeKind::StructureLiteral {
            name: name.into(),
            field_names,
            field_values,
        })
    }

    pub fn table(&mut self, columns: Vec<NodeId>, rows: Vec<NodeId>) -> NodeId {
        self.insert(NodeKind::TableLiteral { columns, rows })
    }

    pub fn row(&mut self, cells: Vec<NodeId>) -> NodeId {
        self.insert(NodeKind::Row { cells })
    }

    pub fn property(&mut self, subject: NodeId, property: &str) -> NodeId {
        self.insert(NodeKind::PropertyReference {
            subject,
            property: property.into(),
        })
    }

    pub fn list_access(&mut self, list: NodeId, index: NodeId) -> NodeId {
        self.insert(NodeKind::ListAccess { list, index })
    }

    pub fn evaluate(&mut self, callee: NodeId, inputs: Vec<NodeId>) -> NodeId {
        self.insert(NodeKind::Evaluate { callee, inputs })
    }

    pub fn stream(&mut self, definition: &str, inputs: Vec<NodeId>) -> NodeId {
        self.insert(NodeKind::StreamExpression {
            definition: Arc::from(definition),
            inputs,
        })
    }
}
