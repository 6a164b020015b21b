//! Query IR node definitions.
//!
//! The IR is a closed sum type: every operation a query can perform is one
//! of the variants below, and passes dispatch exhaustively over the tag.
//! Nodes are immutable and shared through [`Node`] handles, so rewrites
//! produce new trees while unchanged subtrees stay shared.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::Value;

use crate::schema::RelationSide;

/// Shared handle to an IR node.
///
/// Transformation passes never mutate in place. They build replacement
/// nodes and reuse untouched children, which keeps repeated rewrites cheap
/// even on wide trees.
pub type Node = Arc<QueryNode>;

static NEXT_BINDING_ID: AtomicU64 = AtomicU64::new(1);

/// A variable introduced by exactly one binding node.
///
/// Identity is the numeric id, not the label. Two bindings created from the
/// same label are still distinct variables, so builders can reuse friendly
/// labels like `item` without capture accidents.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VarBinding {
    id: u64,
    label: String,
}

impl VarBinding {
    /// Creates a fresh binding with a process-unique id.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            id: NEXT_BINDING_ID.fetch_add(1, Ordering::Relaxed),
            label: label.into(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl fmt::Display for VarBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}_{}", self.label, self.id)
    }
}

/// One named property of an [`QueryNode::Object`] constructor.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertySpec {
    pub name: String,
    pub value: Node,
}

impl PropertySpec {
    pub fn new(name: impl Into<String>, value: Node) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// Sort direction for one ordering key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderDirection {
    Asc,
    Desc,
}

impl OrderDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderDirection::Asc => "asc",
            OrderDirection::Desc => "desc",
        }
    }

    pub fn is_descending(&self) -> bool {
        matches!(self, OrderDirection::Desc)
    }
}

/// One ordering key of a [`QueryNode::TransformList`].
///
/// Keys are applied left to right with a stable sort, so earlier clauses
/// dominate and ties preserve source order.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderClause {
    pub key: Node,
    pub direction: OrderDirection,
}

impl OrderClause {
    pub fn asc(key: Node) -> Self {
        Self {
            key,
            direction: OrderDirection::Asc,
        }
    }

    pub fn desc(key: Node) -> Self {
        Self {
            key,
            direction: OrderDirection::Desc,
        }
    }
}

/// Reference to a declared relation, carried by edge nodes.
///
/// The IR stores the declared endpoint types alongside the relation name so
/// later passes can resolve the traversal target without consulting the
/// schema again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeRef {
    pub relation: String,
    pub from_type: String,
    pub to_type: String,
}

impl EdgeRef {
    pub fn new(
        relation: impl Into<String>,
        from_type: impl Into<String>,
        to_type: impl Into<String>,
    ) -> Self {
        Self {
            relation: relation.into(),
            from_type: from_type.into(),
            to_type: to_type.into(),
        }
    }

    /// The entity type reached when traversing away from `side`.
    pub fn target_type(&self, side: RelationSide) -> &str {
        match side {
            RelationSide::From => &self.to_type,
            RelationSide::To => &self.from_type,
        }
    }
}

/// One from/to pair of an [`QueryNode::AddEdges`] node.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeSpec {
    pub from: Node,
    pub to: Node,
}

impl EdgeSpec {
    pub fn new(from: Node, to: Node) -> Self {
        Self { from, to }
    }
}

/// Post-condition attached to a pre-execution step.
///
/// A failing validator aborts the whole operation with the carried message
/// before any later step runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultValidator {
    /// The step result must be truthy.
    Truthy { message: String },
    /// The step result must be a non-empty list.
    NonEmpty { message: String },
}

impl ResultValidator {
    pub fn truthy(message: impl Into<String>) -> Self {
        ResultValidator::Truthy {
            message: message.into(),
        }
    }

    pub fn non_empty(message: impl Into<String>) -> Self {
        ResultValidator::NonEmpty {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ResultValidator::Truthy { message } => message,
            ResultValidator::NonEmpty { message } => message,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ResultValidator::Truthy { .. } => "truthy",
            ResultValidator::NonEmpty { .. } => "non_empty",
        }
    }
}

/// One step of a [`QueryNode::WithPreExecution`] node.
///
/// The step query runs before the result subtree, and its value becomes
/// visible through `binding` to later steps and to the result.
#[derive(Debug, Clone, PartialEq)]
pub struct PreExecStep {
    pub binding: VarBinding,
    pub query: Node,
    pub validator: Option<ResultValidator>,
}

impl PreExecStep {
    pub fn new(binding: VarBinding, query: Node) -> Self {
        Self {
            binding,
            query,
            validator: None,
        }
    }

    pub fn with_validator(mut self, validator: ResultValidator) -> Self {
        self.validator = Some(validator);
        self
    }
}

/// Value classes distinguished by [`QueryNode::TypeCheck`].
///
/// The classes are mutually exclusive: `Null` is neither a scalar nor an
/// object, and a list is not an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Object,
    List,
    Scalar,
    Null,
}

impl ValueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueKind::Object => "object",
            ValueKind::List => "list",
            ValueKind::Scalar => "scalar",
            ValueKind::Null => "null",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    /// Logical negation of the operand's truthiness.
    Not,
    /// Conversion to the canonical text form.
    ToText,
}

impl UnaryOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnaryOperator::Not => "not",
            UnaryOperator::ToText => "to_text",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    And,
    Or,
    Equal,
    Unequal,
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    Contains,
    In,
    StartsWith,
    EndsWith,
}

impl BinaryOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            BinaryOperator::And => "and",
            BinaryOperator::Or => "or",
            BinaryOperator::Equal => "eq",
            BinaryOperator::Unequal => "ne",
            BinaryOperator::Add => "add",
            BinaryOperator::Subtract => "sub",
            BinaryOperator::Multiply => "mul",
            BinaryOperator::Divide => "div",
            BinaryOperator::Modulo => "mod",
            BinaryOperator::LessThan => "lt",
            BinaryOperator::LessThanOrEqual => "lte",
            BinaryOperator::GreaterThan => "gt",
            BinaryOperator::GreaterThanOrEqual => "gte",
            BinaryOperator::Contains => "contains",
            BinaryOperator::In => "in",
            BinaryOperator::StartsWith => "starts_with",
            BinaryOperator::EndsWith => "ends_with",
        }
    }

    /// Operators that rank their operands with the total-order comparator.
    pub fn is_ordering(&self) -> bool {
        matches!(
            self,
            BinaryOperator::LessThan
                | BinaryOperator::LessThanOrEqual
                | BinaryOperator::GreaterThan
                | BinaryOperator::GreaterThanOrEqual
        )
    }
}

/// A query IR node.
///
/// Trees built from these variants are the single exchange format between
/// the builder layer, the rewrite passes and the backends. The enum is
/// deliberately closed; adding a variant means teaching every pass about
/// it, which the exhaustive matches enforce at compile time.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryNode {
    /// An embedded constant value.
    Literal(Value),
    Null,
    ConstBool(bool),
    ConstInt(i64),

    /// The ambient context value of the nearest enclosing assignment.
    Context,
    /// Evaluates `value`, then `body` with the context bound to it.
    ContextAssignment { value: Node, body: Node },
    /// Reads the variable introduced for `binding`.
    Variable(VarBinding),
    /// Evaluates `value`, then `body` with `binding` bound to it.
    VariableAssignment {
        binding: VarBinding,
        value: Node,
        body: Node,
    },

    /// Constructs an object from named property subtrees.
    Object(Vec<PropertySpec>),
    /// Constructs a list from element subtrees.
    List(Vec<Node>),
    /// Concatenates list-valued subtrees in order.
    ConcatLists(Vec<Node>),

    /// Reads a named field off an object-valued subtree.
    ///
    /// `entity_type` is present when the field is a declared entity field
    /// and absent for anonymous object access. Only declared reads are
    /// subject to field-level authorization.
    Field {
        object: Node,
        name: String,
        entity_type: Option<String>,
    },
    /// All stored entities of a declared type, as a list.
    Entities { type_name: String },
    /// The single entity of a declared type with the given id, or null.
    EntityFromId { type_name: String, id: Node },

    /// The list pipeline: filter, then order, then cap, then map.
    ///
    /// `binding` is in scope inside `filter`, each ordering key and `map`,
    /// bound to the current element. Stages always apply in the fixed
    /// order above regardless of construction order.
    TransformList {
        source: Node,
        binding: VarBinding,
        filter: Node,
        ordering: Vec<OrderClause>,
        cap: Option<u64>,
        map: Node,
    },
    /// The length of a list-valued subtree.
    Count { list: Node },
    /// The first element of a list-valued subtree, or null when empty.
    FirstOfList { list: Node },
    /// Shallow right-biased merge of object-valued subtrees.
    MergeObjects(Vec<Node>),

    /// Entities related to `source` over a declared relation.
    ///
    /// `side` names the side the source occupies, so the result is the
    /// related entities on the opposite side, in edge insertion order.
    FollowEdge {
        source: Node,
        edge: EdgeRef,
        side: RelationSide,
    },

    /// Stores a new entity built from `object`; yields the new id.
    CreateEntity { type_name: String, object: Node },
    /// Patches all entities matching `filter`; yields the updated entities.
    ///
    /// `binding` is bound to the stored entity inside `filter` and each
    /// update value, so patches can read pre-update state.
    UpdateEntities {
        type_name: String,
        binding: VarBinding,
        filter: Node,
        updates: Vec<PropertySpec>,
        cap: Option<u64>,
    },
    /// Removes all entities matching `filter`; yields their last state.
    DeleteEntities {
        type_name: String,
        binding: VarBinding,
        filter: Node,
        cap: Option<u64>,
    },
    /// Adds edges to a relation. Endpoints evaluate to entity ids.
    AddEdges {
        relation: String,
        edges: Vec<EdgeSpec>,
    },
    /// Removes the edges matching the endpoint filters.
    ///
    /// A missing filter matches any endpoint. Filters evaluate to one id
    /// or a list of ids.
    RemoveEdges {
        relation: String,
        from: Option<Node>,
        to: Option<Node>,
    },
    /// Replaces at most one matching edge with a new one, atomically.
    SetEdge {
        relation: String,
        existing_from: Option<Node>,
        existing_to: Option<Node>,
        new_from: Node,
        new_to: Node,
    },

    /// Evaluates exactly one branch, chosen by the condition's truthiness.
    Conditional {
        condition: Node,
        then_branch: Node,
        else_branch: Node,
    },
    /// Tests whether a value falls in the given value class.
    TypeCheck { value: Node, kind: ValueKind },
    UnaryOperation {
        operator: UnaryOperator,
        operand: Node,
    },
    BinaryOperation {
        operator: BinaryOperator,
        lhs: Node,
        rhs: Node,
    },

    /// A compile-time-known failure embedded as a value.
    ///
    /// Reaching this node at runtime aborts the operation with `message`.
    /// Rewrite passes insert these for denied access; the propagation pass
    /// hoists them outward.
    RuntimeError { message: String },

    /// Runs `steps` in order before `result`, as one transaction.
    WithPreExecution {
        steps: Vec<PreExecStep>,
        result: Node,
    },
}

impl QueryNode {
    pub fn literal(value: Value) -> Node {
        Arc::new(QueryNode::Literal(value))
    }

    pub fn null() -> Node {
        Arc::new(QueryNode::Null)
    }

    pub fn boolean(value: bool) -> Node {
        Arc::new(QueryNode::ConstBool(value))
    }

    pub fn integer(value: i64) -> Node {
        Arc::new(QueryNode::ConstInt(value))
    }

    pub fn context() -> Node {
        Arc::new(QueryNode::Context)
    }

    pub fn assign_context(value: Node, body: Node) -> Node {
        Arc::new(QueryNode::ContextAssignment { value, body })
    }

    pub fn variable(binding: &VarBinding) -> Node {
        Arc::new(QueryNode::Variable(binding.clone()))
    }

    pub fn assign_variable(binding: &VarBinding, value: Node, body: Node) -> Node {
        Arc::new(QueryNode::VariableAssignment {
            binding: binding.clone(),
            value,
            body,
        })
    }

    pub fn object(properties: Vec<PropertySpec>) -> Node {
        Arc::new(QueryNode::Object(properties))
    }

    pub fn list(items: Vec<Node>) -> Node {
        Arc::new(QueryNode::List(items))
    }

    pub fn concat_lists(lists: Vec<Node>) -> Node {
        Arc::new(QueryNode::ConcatLists(lists))
    }

    /// Anonymous field access, exempt from field-level authorization.
    pub fn field(object: Node, name: impl Into<String>) -> Node {
        Arc::new(QueryNode::Field {
            object,
            name: name.into(),
            entity_type: None,
        })
    }

    /// Declared entity field access, subject to field-level authorization.
    pub fn entity_field(
        object: Node,
        entity_type: impl Into<String>,
        name: impl Into<String>,
    ) -> Node {
        Arc::new(QueryNode::Field {
            object,
            name: name.into(),
            entity_type: Some(entity_type.into()),
        })
    }

    pub fn entities(type_name: impl Into<String>) -> Node {
        Arc::new(QueryNode::Entities {
            type_name: type_name.into(),
        })
    }

    pub fn entity_from_id(type_name: impl Into<String>, id: Node) -> Node {
        Arc::new(QueryNode::EntityFromId {
            type_name: type_name.into(),
            id,
        })
    }

    pub fn count(list: Node) -> Node {
        Arc::new(QueryNode::Count { list })
    }

    pub fn first_of_list(list: Node) -> Node {
        Arc::new(QueryNode::FirstOfList { list })
    }

    pub fn merge_objects(objects: Vec<Node>) -> Node {
        Arc::new(QueryNode::MergeObjects(objects))
    }

    pub fn follow_edge(source: Node, edge: EdgeRef, side: RelationSide) -> Node {
        Arc::new(QueryNode::FollowEdge { source, edge, side })
    }

    pub fn create_entity(type_name: impl Into<String>, object: Node) -> Node {
        Arc::new(QueryNode::CreateEntity {
            type_name: type_name.into(),
            object,
        })
    }

    pub fn update_entities(
        type_name: impl Into<String>,
        binding: &VarBinding,
        filter: Node,
        updates: Vec<PropertySpec>,
        cap: Option<u64>,
    ) -> Node {
        Arc::new(QueryNode::UpdateEntities {
            type_name: type_name.into(),
            binding: binding.clone(),
            filter,
            updates,
            cap,
        })
    }

    pub fn delete_entities(
        type_name: impl Into<String>,
        binding: &VarBinding,
        filter: Node,
        cap: Option<u64>,
    ) -> Node {
        Arc::new(QueryNode::DeleteEntities {
            type_name: type_name.into(),
            binding: binding.clone(),
            filter,
            cap,
        })
    }

    pub fn add_edges(relation: impl Into<String>, edges: Vec<EdgeSpec>) -> Node {
        Arc::new(QueryNode::AddEdges {
            relation: relation.into(),
            edges,
        })
    }

    pub fn remove_edges(
        relation: impl Into<String>,
        from: Option<Node>,
        to: Option<Node>,
    ) -> Node {
        Arc::new(QueryNode::RemoveEdges {
            relation: relation.into(),
            from,
            to,
        })
    }

    pub fn set_edge(
        relation: impl Into<String>,
        existing_from: Option<Node>,
        existing_to: Option<Node>,
        new_from: Node,
        new_to: Node,
    ) -> Node {
        Arc::new(QueryNode::SetEdge {
            relation: relation.into(),
            existing_from,
            existing_to,
            new_from,
            new_to,
        })
    }

    pub fn conditional(condition: Node, then_branch: Node, else_branch: Node) -> Node {
        Arc::new(QueryNode::Conditional {
            condition,
            then_branch,
            else_branch,
        })
    }

    pub fn type_check(value: Node, kind: ValueKind) -> Node {
        Arc::new(QueryNode::TypeCheck { value, kind })
    }

    pub fn unary(operator: UnaryOperator, operand: Node) -> Node {
        Arc::new(QueryNode::UnaryOperation { operator, operand })
    }

    pub fn not(operand: Node) -> Node {
        Self::unary(UnaryOperator::Not, operand)
    }

    pub fn binary(lhs: Node, operator: BinaryOperator, rhs: Node) -> Node {
        Arc::new(QueryNode::BinaryOperation { operator, lhs, rhs })
    }

    pub fn and(lhs: Node, rhs: Node) -> Node {
        Self::binary(lhs, BinaryOperator::And, rhs)
    }

    pub fn runtime_error(message: impl Into<String>) -> Node {
        Arc::new(QueryNode::RuntimeError {
            message: message.into(),
        })
    }

    pub fn with_pre_execution(steps: Vec<PreExecStep>, result: Node) -> Node {
        Arc::new(QueryNode::WithPreExecution { steps, result })
    }

    /// Whether this node is an embedded runtime error.
    pub fn is_runtime_error(&self) -> bool {
        matches!(self, QueryNode::RuntimeError { .. })
    }
}

/// Builds a [`QueryNode::TransformList`] with the defaults filled in.
///
/// Omitted stages default to the identity of the pipeline: filter keeps
/// everything, no ordering keys, no cap, and the map returns the element
/// unchanged.
pub struct TransformListBuilder {
    source: Node,
    binding: VarBinding,
    filter: Option<Node>,
    ordering: Vec<OrderClause>,
    cap: Option<u64>,
    map: Option<Node>,
}

impl TransformListBuilder {
    pub fn new(source: Node, binding: VarBinding) -> Self {
        Self {
            source,
            binding,
            filter: None,
            ordering: Vec::new(),
            cap: None,
            map: None,
        }
    }

    pub fn with_filter(mut self, filter: Node) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_ordering(mut self, ordering: Vec<OrderClause>) -> Self {
        self.ordering = ordering;
        self
    }

    pub fn with_cap(mut self, cap: u64) -> Self {
        self.cap = Some(cap);
        self
    }

    pub fn with_map(mut self, map: Node) -> Self {
        self.map = Some(map);
        self
    }

    pub fn build(self) -> Node {
        let filter = self.filter.unwrap_or_else(|| QueryNode::boolean(true));
        let map = self
            .map
            .unwrap_or_else(|| QueryNode::variable(&self.binding));
        Arc::new(QueryNode::TransformList {
            source: self.source,
            binding: self.binding,
            filter,
            ordering: self.ordering,
            cap: self.cap,
            map,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_bindings_with_equal_labels_stay_distinct() {
        let a = VarBinding::new("item");
        let b = VarBinding::new("item");
        assert_ne!(a, b);
        assert_ne!(a.id(), b.id());
        assert_eq!(a.label(), b.label());
    }

    #[test]
    fn test_transform_builder_fills_identity_defaults() {
        let binding = VarBinding::new("item");
        let node = TransformListBuilder::new(QueryNode::entities("User"), binding.clone()).build();
        match node.as_ref() {
            QueryNode::TransformList {
                filter,
                ordering,
                cap,
                map,
                ..
            } => {
                assert_eq!(filter.as_ref(), &QueryNode::ConstBool(true));
                assert!(ordering.is_empty());
                assert_eq!(*cap, None);
                assert_eq!(map.as_ref(), &QueryNode::Variable(binding));
            }
            other => panic!("expected TransformList, got {other:?}"),
        }
    }

    #[test]
    fn test_edge_ref_targets_the_opposite_side() {
        let edge = EdgeRef::new("user_orders", "User", "Order");
        assert_eq!(edge.target_type(RelationSide::From), "Order");
        assert_eq!(edge.target_type(RelationSide::To), "User");
    }

    #[test]
    fn test_shared_subtrees_compare_structurally() {
        let shared = QueryNode::literal(json!({"a": 1}));
        let left = QueryNode::list(vec![shared.clone(), shared.clone()]);
        let right = QueryNode::list(vec![
            QueryNode::literal(json!({"a": 1})),
            QueryNode::literal(json!({"a": 1})),
        ]);
        assert_eq!(left, right);
    }

    #[test]
    fn test_anonymous_and_declared_field_reads_differ() {
        let anon = QueryNode::field(QueryNode::context(), "name");
        let declared = QueryNode::entity_field(QueryNode::context(), "User", "name");
        assert_ne!(anon, declared);
    }
}
