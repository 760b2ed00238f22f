//! Plan explanation without execution.
//!
//! Compiles a provider tree and reports the physical operators the
//! compiler chose, including the join algorithms and any index range
//! restrictions. The result carries both a serializable operator tree
//! and a rendered text form.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::cache::{PlanCache, PlanFingerprint};
use crate::compile;
use crate::error::Result;
use crate::exec::ExecNode;
use crate::provider::{Provider, ProviderKind};

/// Service for explaining plans without enumerating them.
#[derive(Default)]
pub struct ExplainService<'a> {
    cache: Option<&'a PlanCache>,
}

impl<'a> ExplainService<'a> {
    pub fn new() -> Self {
        ExplainService { cache: None }
    }

    /// Report cache status against the given cache.
    pub fn with_cache(mut self, cache: &'a PlanCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Compile the tree and describe the resulting operators.
    pub fn explain(&self, provider: &Arc<Provider>) -> Result<PlanExplanation> {
        let cached = self
            .cache
            .map(|cache| cache.contains(&PlanFingerprint::from_provider(provider)))
            .unwrap_or(false);
        let plan = compile::compile(provider)?;
        let root = describe(plan.root());
        let rendered = render(&root, cached);
        Ok(PlanExplanation {
            root,
            cached,
            rendered,
        })
    }
}

/// Explanation of one compiled plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanExplanation {
    /// The physical operator tree.
    pub root: ExplainNode,
    /// Whether the plan was already cached.
    pub cached: bool,
    /// Human-readable rendering.
    pub rendered: String,
}

/// One operator in an explained plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplainNode {
    /// Operator name, algorithm included for joins.
    pub operator: String,
    /// Operator-specific description.
    pub detail: Option<String>,
    /// Output column names.
    pub columns: Vec<String>,
    /// Guaranteed output ordering, outermost key first.
    pub order: Vec<OrderSummary>,
    pub children: Vec<ExplainNode>,
}

/// One key of an output ordering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderSummary {
    pub column: String,
    pub direction: String,
}

fn describe(node: &ExecNode) -> ExplainNode {
    let header = node.header();
    let (operator, detail) = identify(node);
    let columns: Vec<String> = header
        .columns()
        .iter()
        .map(|column| column.name.clone())
        .collect();
    let order = header
        .order()
        .keys()
        .iter()
        .map(|&(column, direction)| OrderSummary {
            column: columns
                .get(column)
                .cloned()
                .unwrap_or_else(|| column.to_string()),
            direction: format!("{direction:?}"),
        })
        .collect();
    ExplainNode {
        operator,
        detail,
        columns,
        order,
        children: node.children().into_iter().map(describe).collect(),
    }
}

fn identify(node: &ExecNode) -> (String, Option<String>) {
    match node {
        ExecNode::Scan { origin, .. } => ("Scan".into(), source_name(origin)),
        ExecNode::IndexScan { origin, .. } => ("IndexScan".into(), source_name(origin)),
        ExecNode::RangeSeek { origin, ranges, .. } => (
            "RangeSeek".into(),
            Some(match source_name(origin) {
                Some(name) => format!("{name}, {ranges:?}"),
                None => format!("{ranges:?}"),
            }),
        ),
        ExecNode::Filter { predicate, .. } => ("Filter".into(), Some(format!("{predicate:?}"))),
        ExecNode::Select { transform, .. } => (
            "Select".into(),
            Some(format!("columns {:?}", transform.columns())),
        ),
        ExecNode::Sort { .. } => ("Sort".into(), None),
        ExecNode::Distinct { .. } => ("Distinct".into(), None),
        ExecNode::Concat { .. } => ("Concat".into(), None),
        ExecNode::Union { .. } => ("Union".into(), None),
        ExecNode::Intersect { .. } => ("Intersect".into(), None),
        ExecNode::Except { .. } => ("Except".into(), None),
        ExecNode::Join {
            spec, algorithm, ..
        } => (
            format!("{algorithm:?}Join"),
            Some(format!("{:?}, pairs {:?}", spec.kind, spec.pairs)),
        ),
        ExecNode::Apply { kind, .. } => ("Apply".into(), Some(format!("{kind:?}"))),
        ExecNode::Aggregate { origin, .. } => ("Aggregate".into(), group_detail(origin)),
        ExecNode::RowNumber { origin, .. } => ("RowNumber".into(), {
            match origin.kind() {
                ProviderKind::RowNumber { name, .. } => Some(name.clone()),
                _ => None,
            }
        }),
    }
}

fn source_name(origin: &Provider) -> Option<String> {
    match origin.kind() {
        ProviderKind::Scan { name, .. } | ProviderKind::IndexScan { name, .. } => {
            Some(name.clone())
        }
        _ => None,
    }
}

fn group_detail(origin: &Provider) -> Option<String> {
    match origin.kind() {
        ProviderKind::Aggregate {
            group_by, columns, ..
        } => {
            let names: Vec<&str> = columns.iter().map(|column| column.name.as_str()).collect();
            Some(format!("group by {group_by:?}, computes {names:?}"))
        }
        _ => None,
    }
}

fn render(root: &ExplainNode, cached: bool) -> String {
    let mut lines = Vec::new();
    lines.push("Execution Plan".to_string());
    lines.push("=".repeat(40));
    if cached {
        lines.push("Plan Status: CACHED".to_string());
    } else {
        lines.push("Plan Status: COMPILED".to_string());
    }
    lines.push(String::new());
    render_node(root, 0, &mut lines);
    lines.join("\n")
}

fn render_node(node: &ExplainNode, depth: usize, lines: &mut Vec<String>) {
    let mut line = format!("{}{}", "  ".repeat(depth), node.operator);
    if let Some(detail) = &node.detail {
        line.push_str(&format!(" ({detail})"));
    }
    line.push_str(&format!(" -> [{}]", node.columns.join(", ")));
    if !node.order.is_empty() {
        let keys: Vec<String> = node
            .order
            .iter()
            .map(|key| format!("{} {}", key.column, key.direction))
            .collect();
        line.push_str(&format!(" ordered by {}", keys.join(", ")));
    }
    lines.push(line);
    for child in &node.children {
        render_node(child, depth + 1, lines);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Expr;
    use crate::header::{Column, Header};
    use crate::provider::{JoinHint, JoinKind};
    use crate::source::MemoryIndex;
    use recset_tuple::{FieldType, PackedTuple, Tuple, Value, ValueType};

    fn index_scan(name: &str, ids: &[i32]) -> Arc<Provider> {
        let header = Header::new(vec![
            Column::new("id", FieldType::scalar(ValueType::Int32)),
            Column::new("label", FieldType::scalar(ValueType::Str)),
        ]);
        let rows = ids
            .iter()
            .map(|&id| {
                let mut row = PackedTuple::new(header.descriptor().clone());
                row.set(0, Some(Value::Int32(id))).unwrap();
                row.set(1, Some(Value::Str(format!("r{id}").into()))).unwrap();
                row
            })
            .collect();
        let index = MemoryIndex::new(header, 0, rows).unwrap();
        Arc::new(Provider::index_scan(name, index.into_source()))
    }

    #[test]
    fn test_explain_shows_range_seek() {
        let plan = Arc::new(
            Provider::filter(
                index_scan("users", &[1, 2, 3]),
                Expr::gt(Expr::column(0), Expr::literal(Value::Int32(1))),
            )
            .unwrap(),
        );
        let explanation = ExplainService::new().explain(&plan).unwrap();

        assert_eq!(explanation.root.operator, "Filter");
        assert_eq!(explanation.root.children[0].operator, "RangeSeek");
        assert!(!explanation.cached);
        assert!(explanation.rendered.contains("Plan Status: COMPILED"));
        assert!(explanation.rendered.contains("RangeSeek (users"));
        assert!(explanation.rendered.contains("[id, label]"));
    }

    #[test]
    fn test_explain_names_join_algorithm() {
        let plan = Arc::new(
            Provider::join(
                index_scan("left", &[1, 2]),
                index_scan("right", &[2, 3]),
                JoinKind::Inner,
                JoinHint::Auto,
                vec![(0, 0)],
            )
            .unwrap(),
        );
        let explanation = ExplainService::new().explain(&plan).unwrap();

        assert_eq!(explanation.root.operator, "MergeJoin");
        assert_eq!(explanation.root.children.len(), 2);
        assert_eq!(explanation.root.children[0].order[0].column, "id");
        assert_eq!(explanation.root.children[0].order[0].direction, "Asc");
    }

    #[test]
    fn test_explain_reports_cache_status() {
        let cache = crate::cache::PlanCache::new(8);
        let plan = index_scan("users", &[1]);

        let before = ExplainService::new()
            .with_cache(&cache)
            .explain(&plan)
            .unwrap();
        assert!(!before.cached);

        cache.get_or_compile(&plan).unwrap();
        let after = ExplainService::new()
            .with_cache(&cache)
            .explain(&plan)
            .unwrap();
        assert!(after.cached);
        assert!(after.rendered.contains("Plan Status: CACHED"));
    }

    #[test]
    fn test_explanation_serializes() {
        let plan = index_scan("users", &[1]);
        let explanation = ExplainService::new().explain(&plan).unwrap();
        let json = serde_json::to_string(&explanation).unwrap();
        assert!(json.contains("\"operator\":\"IndexScan\""));
        let parsed: PlanExplanation = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, explanation);
    }
}
