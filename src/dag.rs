//! Merge lineage graph
//!
//! Describes a merge plan as nodes and edges for the results view: one
//! `source` node per table, one `merge_{n}` node per step and a single
//! `result` node fed by the last merge.

use crate::plan::MergePlan;
use crate::relation::{Relation, TableSet};
use serde::{Deserialize, Serialize};

pub const RESULT_NODE: &str = "result";
pub const OUTPUT_EDGE: &str = "output";

/// Display metadata for one input table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableMeta {
    pub id: String,
    pub name: String,
    pub columns: Vec<String>,
}

impl TableMeta {
    pub fn from_relation(id: &str, name: &str, relation: &Relation) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            columns: relation.columns().to_vec(),
        }
    }

    /// One entry per table, ordered by id, named after the id
    pub fn from_table_set(tables: &TableSet) -> Vec<Self> {
        let mut metas: Vec<Self> = tables
            .iter()
            .map(|(id, rel)| Self::from_relation(id, id, rel))
            .collect();
        metas.sort_by(|a, b| a.id.cmp(&b.id));
        metas
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DagMode {
    /// Each merge consumes the previous merge, matching execution
    Chain,
    /// Each merge consumes the two tables it names
    Pairwise,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DagNodeType {
    Source,
    Merge,
    Result,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DagNode {
    pub id: String,
    pub label: String,
    #[serde(rename = "type")]
    pub node_type: DagNodeType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DagEdge {
    pub from: String,
    pub to: String,
    pub join_type: String,
    pub left_keys: Vec<String>,
    pub right_keys: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeDag {
    pub mode: DagMode,
    pub nodes: Vec<DagNode>,
    pub edges: Vec<DagEdge>,
}

impl MergeDag {
    pub fn build(tables: &[TableMeta], plan: &MergePlan, mode: DagMode) -> Self {
        let mut nodes: Vec<DagNode> = tables
            .iter()
            .map(|t| DagNode {
                id: t.id.clone(),
                label: t.name.clone(),
                node_type: DagNodeType::Source,
            })
            .collect();
        let mut edges = Vec::new();
        let mut previous: Option<String> = None;

        for (idx, step) in plan.steps.iter().enumerate() {
            let merge_id = merge_node_id(idx + 1);
            nodes.push(DagNode {
                id: merge_id.clone(),
                label: format!("Merge {}", idx + 1),
                node_type: DagNodeType::Merge,
            });

            let join_type = step.join_type.as_str().to_string();
            let keyed = |from: &str| DagEdge {
                from: from.to_string(),
                to: merge_id.clone(),
                join_type: join_type.clone(),
                left_keys: step.left_keys.clone(),
                right_keys: step.right_keys.clone(),
            };

            match (mode, previous.as_deref()) {
                (DagMode::Chain, Some(prev)) => edges.push(DagEdge {
                    from: prev.to_string(),
                    to: merge_id.clone(),
                    join_type: join_type.clone(),
                    left_keys: Vec::new(),
                    right_keys: Vec::new(),
                }),
                _ => edges.push(keyed(&step.left_table_id)),
            }
            edges.push(keyed(&step.right_table_id));

            previous = Some(merge_id);
        }

        if let Some(last) = previous {
            nodes.push(DagNode {
                id: RESULT_NODE.to_string(),
                label: "Result".to_string(),
                node_type: DagNodeType::Result,
            });
            edges.push(DagEdge {
                from: last,
                to: RESULT_NODE.to_string(),
                join_type: OUTPUT_EDGE.to_string(),
                left_keys: Vec::new(),
                right_keys: Vec::new(),
            });
        }

        Self { mode, nodes, edges }
    }

    pub fn to_json(&self) -> crate::error::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

fn merge_node_id(step_index: usize) -> String {
    format!("merge_{}", step_index)
}
