//! Merge plans
//!
//! A merge plan is an ordered list of binary join steps plus a save mode. Plans
//! arrive from the plan-authoring UI as a loosely shaped JSON document; they are
//! turned into the typed [`MergePlan`] once, here, so the executor only ever
//! sees well-formed records.

use crate::error::{MergeError, Result};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinType {
    Inner,
    Left,
    Right,
    Outer,
}

impl JoinType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JoinType::Inner => "inner",
            JoinType::Left => "left",
            JoinType::Right => "right",
            JoinType::Outer => "outer",
        }
    }

    /// Unmatched left rows are kept
    pub fn keeps_left(&self) -> bool {
        matches!(self, JoinType::Left | JoinType::Outer)
    }

    /// Unmatched right rows are kept
    pub fn keeps_right(&self) -> bool {
        matches!(self, JoinType::Right | JoinType::Outer)
    }
}

impl FromStr for JoinType {
    type Err = MergeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "inner" => Ok(JoinType::Inner),
            "left" => Ok(JoinType::Left),
            "right" => Ok(JoinType::Right),
            "outer" => Ok(JoinType::Outer),
            _ => Err(MergeError::UnsupportedJoinType(s.to_string())),
        }
    }
}

impl fmt::Display for JoinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which intermediate relations the executor keeps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveMode {
    /// Only the final relation
    #[default]
    Final,
    /// Every step's output, labelled `step_{n}`
    EachStep,
    /// Every step's output, labelled `step_{n}_{left}_{right}`
    EachTable,
}

impl SaveMode {
    pub fn retains_steps(&self) -> bool {
        !matches!(self, SaveMode::Final)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SaveMode::Final => "final",
            SaveMode::EachStep => "each_step",
            SaveMode::EachTable => "each_table",
        }
    }
}

impl FromStr for SaveMode {
    type Err = MergeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "final" => Ok(SaveMode::Final),
            "each_step" => Ok(SaveMode::EachStep),
            "each_table" => Ok(SaveMode::EachTable),
            other => Err(MergeError::InvalidPlan(format!(
                "unknown save mode '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for SaveMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One binary join. Position `i` of `left_keys` pairs with position `i` of
/// `right_keys`; a row pair matches when every pair is equal.
///
/// Only the first step's `left_table_id` is resolved; later steps join
/// against the previous step's output and keep the id for traceability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinStep {
    pub left_table_id: String,
    pub right_table_id: String,
    pub left_keys: Vec<String>,
    pub right_keys: Vec<String>,
    pub join_type: JoinType,
}

impl JoinStep {
    pub fn new(
        left_table_id: impl Into<String>,
        right_table_id: impl Into<String>,
        left_keys: &[&str],
        right_keys: &[&str],
        join_type: JoinType,
    ) -> Self {
        Self {
            left_table_id: left_table_id.into(),
            right_table_id: right_table_id.into(),
            left_keys: left_keys.iter().map(|k| k.to_string()).collect(),
            right_keys: right_keys.iter().map(|k| k.to_string()).collect(),
            join_type,
        }
    }

    /// Human readable `left.a = right.b AND ...` form for logs
    pub fn describe_keys(&self) -> String {
        self.left_keys
            .iter()
            .zip(&self.right_keys)
            .map(|(l, r)| format!("{}.{} = {}.{}", self.left_table_id, l, self.right_table_id, r))
            .join(" AND ")
    }
}

/// Deserializing always goes through the plan document checks, so a
/// `MergePlan` read with serde obeys the same rules as [`MergePlan::from_json`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RawMergePlan")]
pub struct MergePlan {
    pub steps: Vec<JoinStep>,
    pub save_mode: SaveMode,
}

impl MergePlan {
    pub fn new(steps: Vec<JoinStep>, save_mode: SaveMode) -> Result<Self> {
        if steps.is_empty() {
            return Err(MergeError::InvalidPlan("plan has no steps".to_string()));
        }
        Ok(Self { steps, save_mode })
    }

    /// Parse a plan document such as
    /// `{"steps": [{"leftTableId": "A", ...}], "saveMode": "final"}`
    pub fn from_json(json: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(json)
            .map_err(|e| MergeError::InvalidPlan(format!("malformed plan document: {}", e)))?;
        Self::from_value(value)
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        if value.is_null() {
            return Err(MergeError::InvalidPlan("plan is missing".to_string()));
        }

        let raw: RawMergePlan = serde_json::from_value(value)
            .map_err(|e| MergeError::InvalidPlan(e.to_string()))?;
        Self::try_from(raw)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl TryFrom<RawMergePlan> for MergePlan {
    type Error = MergeError;

    fn try_from(raw: RawMergePlan) -> Result<Self> {
        let raw_steps = raw
            .steps
            .ok_or_else(|| MergeError::InvalidPlan("plan has no 'steps' field".to_string()))?;

        let steps = raw_steps
            .into_iter()
            .map(|step| -> Result<JoinStep> {
                Ok(JoinStep {
                    join_type: step.join_type.parse()?,
                    left_table_id: step.left_table_id,
                    right_table_id: step.right_table_id,
                    left_keys: step.left_keys,
                    right_keys: step.right_keys,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let save_mode = match raw.save_mode {
            Some(mode) => mode.parse()?,
            None => SaveMode::default(),
        };

        Self::new(steps, save_mode)
    }
}

/// Plan document as authored, before join types and save mode are checked
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMergePlan {
    steps: Option<Vec<RawJoinStep>>,
    save_mode: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawJoinStep {
    left_table_id: String,
    right_table_id: String,
    left_keys: Vec<String>,
    right_keys: Vec<String>,
    join_type: String,
}
