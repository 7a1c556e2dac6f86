//! Node kinds and their child slots.
//!
//! The node set is closed: every kind is a variant here, dispatched by
//! exhaustive match in the analyzer, compiler and evaluator. Each kind
//! declares an ordered list of named child slots; traversal and structural
//! replacement go through those slots and nothing else.

use std::sync::Arc;

use smallvec::SmallVec;

use crate::analysis::types::Type;
use crate::runtime::value::Value;

use super::arena::NodeId;

/// One immutable element of the program tree.
#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
}

/// A named, ordered group of children.
#[derive(Debug, Clone)]
pub struct ChildSlot {
    pub name: &'static str,
    pub children: SmallVec<[NodeId; 4]>,
}

impl ChildSlot {
    fn new(name: &'static str, children: impl IntoIterator<Item = NodeId>) -> Self {
        Self {
            name,
            children: children.into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum NodeKind {
    /// Scope and sequencing; evaluates to its last statement's value.
    Block { statements: Vec<NodeId>, root: bool },
    /// Associates one or more names with a value and/or declared type.
    Bind {
        names: Vec<NodeId>,
        declared: Option<Type>,
        value: Option<NodeId>,
    },
    /// An alias inside a bind.
    Name { text: Arc<str> },
    Literal { value: Value },
    ListLiteral { items: Vec<NodeId> },
    /// Parallel key/value slots; keys are unique at runtime, insertion order kept.
    MapLiteral { keys: Vec<NodeId>, values: Vec<NodeId> },
    /// A record literal: field names are Name nodes, values expressions.
    StructureLiteral {
        name: Arc<str>,
        field_names: Vec<NodeId>,
        field_values: Vec<NodeId>,
    },
    /// Columns are Bind nodes (the unused-bind exemption site); rows are Row
    /// nodes. Evaluates to an ordered list of structures keyed by column names.
    TableLiteral { columns: Vec<NodeId>, rows: Vec<NodeId> },
    Row { cells: Vec<NodeId> },
    /// A name use. Stream-valued bindings are sampled, not handed out raw.
    Reference { name: Arc<str> },
    /// Structure field access; stream-typed subjects unwrap to their value type.
    PropertyReference { subject: NodeId, property: Arc<str> },
    /// 1-based; negative wraps, out-of-range clamps, zero is absence.
    ListAccess { list: NodeId, index: NodeId },
    Conditional {
        condition: NodeId,
        yes: NodeId,
        no: NodeId,
    },
    /// Invocation of a catalog function, free (Reference callee) or member
    /// (PropertyReference callee). Functions are not first-class values.
    Evaluate { callee: NodeId, inputs: Vec<NodeId> },
    /// Instantiates or reconfigures a stream from the catalog's definition.
    StreamExpression {
        definition: Arc<str>,
        inputs: Vec<NodeId>,
    },
}

impl Node {
    /// The node's child slots, in declaration order.
    pub fn slots(&self) -> Vec<ChildSlot> {
        match &self.kind {
            NodeKind::Block { statements, .. } => {
                vec![ChildSlot::new("statements", statements.iter().copied())]
            }
            NodeKind::Bind { names, value, .. } => vec![
                ChildSlot::new("names", names.iter().copied()),
                ChildSlot::new("value", value.iter().copied()),
            ],
            NodeKind::Name { .. } | NodeKind::Literal { .. } | NodeKind::Reference { .. } => {
                Vec::new()
            }
            NodeKind::ListLiteral { items } => {
                vec![ChildSlot::new("items", items.iter().copied())]
            }
            NodeKind::MapLiteral { keys, values } => vec![
                ChildSlot::new("keys", keys.iter().copied()),
                ChildSlot::new("values", values.iter().copied()),
            ],
            NodeKind::StructureLiteral {
                field_names,
                field_values,
                ..
            } => vec![
                ChildSlot::new("field_names", field_names.iter().copied()),
                ChildSlot::new("field_values", field_values.iter().copied()),
            ],
            NodeKind::TableLiteral { columns, rows } => vec![
                ChildSlot::new("columns", columns.iter().copied()),
                ChildSlot::new("rows", rows.iter().copied()),
            ],
            NodeKind::Row { cells } => vec![ChildSlot::new("cells", cells.iter().copied())],
            NodeKind::PropertyReference { subject, .. } => {
                vec![ChildSlot::new("subject", [*subject])]
            }
            NodeKind::ListAccess { list, index } => vec![
                ChildSlot::new("list", [*list]),
                ChildSlot::new("index", [*index]),
            ],
            NodeKind::Conditional { condition, yes, no } => vec![
                ChildSlot::new("condition", [*condition]),
                ChildSlot::new("yes", [*yes]),
                ChildSlot::new("no", [*no]),
            ],
            NodeKind::Evaluate { callee, inputs } => vec![
                ChildSlot::new("callee", [*callee]),
                ChildSlot::new("inputs", inputs.iter().copied()),
            ],
            NodeKind::StreamExpression { inputs, .. } => {
                vec![ChildSlot::new("inputs", inputs.iter().copied())]
            }
        }
    }

    /// All children, flattened in slot order.
    pub fn children(&self) -> SmallVec<[NodeId; 8]> {
        self.slots()
            .into_iter()
            .flat_map(|slot| slot.children)
            .collect()
    }

    /// A copy of this node with one child handle swapped. Unknown children
    /// are left alone; the caller validates reachability.
    pub fn with_replaced_child(&self, old: NodeId, new: NodeId) -> Node {
        let swap = |id: NodeId| if id == old { new } else { id };
        let swap_all = |ids: &[NodeId]| ids.iter().map(|id| swap(*id)).collect::<Vec<_>>();
        let kind = match &self.kind {
            NodeKind::Block { statements, root } => NodeKind::Block {
                statements: swap_all(statements),
                root: *root,
            },
            NodeKind::Bind {
                names,
                declared,
                value,
            } => NodeKind::Bind {
                names: swap_all(names),
                declared: declared.clone(),
                value: value.map(swap),
            },
            NodeKind::Name { text } => NodeKind::Name { text: text.clone() },
            NodeKind::Literal { value } => NodeKind::Literal {
                value: value.clone(),
            },
            NodeKind::ListLiteral { items } => NodeKind::ListLiteral {
                items: swap_all(items),
            },
            NodeKind::MapLiteral { keys, values } => NodeKind::MapLiteral {
                keys: swap_all(keys),
                values: swap_all(values),
            },
            NodeKind::StructureLiteral {
                name,
                field_names,
                field_values,
            } => NodeKind::StructureLiteral {
                name: name.clone(),
                field_names: swap_all(field_names),
                field_values: swap_all(field_values),
            },
            NodeKind::TableLiteral { columns, rows } => NodeKind::TableLiteral {
                columns: swap_all(columns),
                rows: swap_all(rows),
            },
            NodeKind::Row { cells } => NodeKind::Row {
                cells: swap_all(cells),
            },
            NodeKind::Reference { name } => NodeKind::Reference { name: name.clone() },
            NodeKind::PropertyReference { subject, property } => NodeKind::PropertyReference {
                subject: swap(*subject),
                property: property.clone(),
            },
            NodeKind::ListAccess { list, index } => NodeKind::ListAccess {
                list: swap(*list),
                index: swap(*index),
            },
            NodeKind::Conditional { condition, yes, no } => NodeKind::Conditional {
                condition: swap(*condition),
                yes: swap(*yes),
                no: swap(*no),
            },
            NodeKind::Evaluate { callee, inputs } => NodeKind::Evaluate {
                callee: swap(*callee),
                inputs: swap_all(inputs),
            },
            NodeKind::StreamExpression { definition, inputs } => NodeKind::StreamExpression {
                definition: definition.clone(),
                inputs: swap_all(inputs),
            },
        };
        Node { kind }
    }
}
