//! Merge Plan Executor
//!
//! Runs a merge plan as a left-deep chain: step 1 joins the two tables it
//! names, every later step joins the previous step's output with the table
//! named by its `right_table_id`.
//!
//! The whole plan is validated before the first join runs. Validation threads
//! the output schema through the chain, so the keys of step `n` are checked
//! against the columns step `n - 1` will produce. A rejected plan never starts
//! a join and no partial result is returned.

use crate::error::{MergeError, Result};
use crate::join::{hash_join, JoinLayout, JoinOptions};
use crate::plan::{JoinStep, MergePlan, SaveMode};
use crate::relation::{Relation, TableSet};
use serde::Serialize;
use std::time::Instant;
use tracing::{debug, info, warn};

pub const NULL_KEYS_MATCH_ENV: &str = "TABLE_MERGE_NULL_KEYS_MATCH";
pub const MAX_RESULT_ROWS_ENV: &str = "TABLE_MERGE_MAX_RESULT_ROWS";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Missing key cells join to missing key cells
    pub null_keys_match: bool,
    /// Per-step ceiling on produced rows
    pub max_result_rows: Option<usize>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            null_keys_match: true,
            max_result_rows: None,
        }
    }
}

impl ExecutorConfig {
    /// Defaults overridden by `TABLE_MERGE_*` environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(raw) = std::env::var(NULL_KEYS_MATCH_ENV) {
            match raw.trim().parse::<bool>() {
                Ok(value) => config.null_keys_match = value,
                Err(_) => warn!("Ignoring {}={:?}: expected true or false", NULL_KEYS_MATCH_ENV, raw),
            }
        }

        if let Ok(raw) = std::env::var(MAX_RESULT_ROWS_ENV) {
            match raw.trim().parse::<usize>() {
                Ok(value) => config.max_result_rows = Some(value),
                Err(_) => warn!("Ignoring {}={:?}: expected a row count", MAX_RESULT_ROWS_ENV, raw),
            }
        }

        config
    }

    fn join_options(&self) -> JoinOptions {
        JoinOptions {
            null_keys_match: self.null_keys_match,
            max_rows: self.max_result_rows,
        }
    }
}

/// Per-step statistics, recorded for every step regardless of save mode.
///
/// `left_table_id` is the id declared in the plan, even for steps whose left
/// operand was the previous step's output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepStat {
    #[serde(rename = "step")]
    pub step_index: usize,
    #[serde(rename = "rows")]
    pub row_count: usize,
    #[serde(rename = "left")]
    pub left_table_id: String,
    #[serde(rename = "right")]
    pub right_table_id: String,
}

/// A retained intermediate relation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepRelation {
    pub label: String,
    pub step_index: usize,
    pub relation: Relation,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub final_relation: Relation,
    /// Retained step outputs in step order; empty for `final` and for previews
    pub step_relations: Vec<StepRelation>,
    pub stats: Vec<StepStat>,
    pub elapsed_ms: u64,
}

impl ExecutionResult {
    pub fn step_relation(&self, label: &str) -> Option<&Relation> {
        self.step_relations
            .iter()
            .find(|s| s.label == label)
            .map(|s| &s.relation)
    }

    pub fn total_rows(&self) -> usize {
        self.final_relation.row_count()
    }
}

/// Label under which a step's output is retained
pub fn step_label(save_mode: SaveMode, step_index: usize, step: &JoinStep) -> String {
    match save_mode {
        SaveMode::EachTable => format!(
            "step_{}_{}_{}",
            step_index, step.left_table_id, step.right_table_id
        ),
        SaveMode::Final | SaveMode::EachStep => format!("step_{}", step_index),
    }
}

#[derive(Debug, Clone, Default)]
pub struct MergeExecutor {
    config: ExecutorConfig,
}

impl MergeExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    /// Check every precondition of `plan` against `tables` without joining.
    ///
    /// Returns the output layout of each step, in step order.
    pub fn validate(&self, tables: &TableSet, plan: &MergePlan) -> Result<Vec<JoinLayout>> {
        let first = plan
            .steps
            .first()
            .ok_or_else(|| MergeError::InvalidPlan("plan has no steps".to_string()))?;

        let mut left_columns = lookup(tables, &first.left_table_id)?.columns().to_vec();
        let mut layouts = Vec::with_capacity(plan.steps.len());

        for (idx, step) in plan.steps.iter().enumerate() {
            let right = lookup(tables, &step.right_table_id)?;
            let layout = JoinLayout::plan(
                idx + 1,
                &left_columns,
                right.columns(),
                &step.left_keys,
                &step.right_keys,
                &step.right_table_id,
            )?;
            left_columns = layout.columns().to_vec();
            layouts.push(layout);
        }

        Ok(layouts)
    }

    /// Run `plan` over `tables`.
    ///
    /// With `preview` set no step relation is retained, whatever the save
    /// mode; stats and the final relation are still produced.
    pub fn execute(&self, tables: &TableSet, plan: &MergePlan, preview: bool) -> Result<ExecutionResult> {
        let started = Instant::now();
        info!(
            steps = plan.steps.len(),
            save_mode = %plan.save_mode,
            preview,
            "Executing merge plan"
        );

        let layouts = self.validate(tables, plan).map_err(|e| {
            warn!("Merge plan rejected: {}", e);
            e
        })?;

        let options = self.config.join_options();
        let retain = plan.save_mode.retains_steps() && !preview;

        let mut stats = Vec::with_capacity(plan.steps.len());
        let mut step_relations = Vec::new();
        let mut current: Option<Relation> = None;

        for (idx, (step, layout)) in plan.steps.iter().zip(&layouts).enumerate() {
            let step_index = idx + 1;
            let left = match current.as_ref() {
                Some(previous) => previous,
                None => lookup(tables, &step.left_table_id)?,
            };
            let right = lookup(tables, &step.right_table_id)?;

            debug!(
                step = step_index,
                join_type = %step.join_type,
                on = %step.describe_keys(),
                left_rows = left.row_count(),
                right_rows = right.row_count(),
                "Executing join step"
            );

            let merged = hash_join(left, right, layout, step.join_type, &options)?;

            debug!(step = step_index, rows = merged.row_count(), "Join step complete");

            stats.push(StepStat {
                step_index,
                row_count: merged.row_count(),
                left_table_id: step.left_table_id.clone(),
                right_table_id: step.right_table_id.clone(),
            });

            if retain {
                step_relations.push(StepRelation {
                    label: step_label(plan.save_mode, step_index, step),
                    step_index,
                    relation: merged.clone(),
                });
            }

            current = Some(merged);
        }

        let final_relation =
            current.ok_or_else(|| MergeError::InvalidPlan("plan has no steps".to_string()))?;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        info!(
            rows = final_relation.row_count(),
            columns = final_relation.column_count(),
            retained = step_relations.len(),
            elapsed_ms,
            "Merge plan complete"
        );

        Ok(ExecutionResult {
            final_relation,
            step_relations,
            stats,
            elapsed_ms,
        })
    }
}

/// Run `plan` with the default configuration
pub fn execute(tables: &TableSet, plan: &MergePlan, preview: bool) -> Result<ExecutionResult> {
    MergeExecutor::default().execute(tables, plan, preview)
}

fn lookup<'a>(tables: &'a TableSet, id: &str) -> Result<&'a Relation> {
    tables
        .get(id)
        .ok_or_else(|| MergeError::UnknownTable(id.to_string()))
}
