//! Binary hash join over in-memory relations
//!
//! ## Output columns
//!
//! - every left column, in left order;
//! - then every right column in right order, except a right key column that
//!   has the same name as the left key it is paired with. That column is
//!   merged into the left one: it carries the left value, or the right value
//!   for right rows that found no left partner;
//! - a right column whose name is already taken is renamed
//!   `{name}_{right table id}` (then `_2`, `_3`, ... if still taken). Left
//!   columns are never renamed.
//!
//! ## Row order
//!
//! Left rows in order, each followed by its matching right rows in right
//! order; then, for `right`/`outer`, the unmatched right rows in right order.

use crate::error::{MergeError, Result};
use crate::plan::JoinType;
use crate::relation::Relation;
use crate::value::{KeyValue, Value};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnSource {
    Left(usize),
    Right(usize),
    /// Same-named key pair collapsed into one output column
    MergedKey { left: usize, right: usize },
}

/// Output schema of one join step, computed from the operand schemas alone.
///
/// Building the layout is also where key lists are checked, so a whole plan
/// can be validated by chaining layouts without touching any rows.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinLayout {
    step: usize,
    columns: Vec<String>,
    sources: Vec<ColumnSource>,
    left_key_idx: Vec<usize>,
    right_key_idx: Vec<usize>,
}

impl JoinLayout {
    pub fn plan(
        step: usize,
        left_columns: &[String],
        right_columns: &[String],
        left_keys: &[String],
        right_keys: &[String],
        right_label: &str,
    ) -> Result<Self> {
        if left_keys.is_empty() || right_keys.is_empty() {
            return Err(MergeError::InvalidJoinKeys {
                step,
                reason: "key lists must not be empty".to_string(),
            });
        }
        if left_keys.len() != right_keys.len() {
            return Err(MergeError::InvalidJoinKeys {
                step,
                reason: format!(
                    "{} left keys but {} right keys",
                    left_keys.len(),
                    right_keys.len()
                ),
            });
        }

        let left_key_idx = resolve_keys(step, "left", left_columns, left_keys)?;
        let right_key_idx = resolve_keys(step, "right", right_columns, right_keys)?;

        let mut sources: Vec<ColumnSource> = (0..left_columns.len()).map(ColumnSource::Left).collect();
        let mut merged_right = HashSet::new();
        for (pos, (&li, &rj)) in left_key_idx.iter().zip(&right_key_idx).enumerate() {
            if left_keys[pos] != right_keys[pos] || merged_right.contains(&rj) {
                continue;
            }
            if let ColumnSource::Left(_) = sources[li] {
                sources[li] = ColumnSource::MergedKey { left: li, right: rj };
                merged_right.insert(rj);
            }
        }

        let mut columns = left_columns.to_vec();
        let mut taken: HashSet<String> = columns.iter().cloned().collect();
        for (j, name) in right_columns.iter().enumerate() {
            if merged_right.contains(&j) {
                continue;
            }
            let out = if taken.contains(name) {
                qualify(name, right_label, &taken)
            } else {
                name.clone()
            };
            taken.insert(out.clone());
            columns.push(out);
            sources.push(ColumnSource::Right(j));
        }

        Ok(Self {
            step,
            columns,
            sources,
            left_key_idx,
            right_key_idx,
        })
    }

    pub fn step(&self) -> usize {
        self.step
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    fn left_key(&self, row: &[Value]) -> Vec<KeyValue> {
        self.left_key_idx.iter().map(|&i| row[i].to_key()).collect()
    }

    fn right_key(&self, row: &[Value]) -> Vec<KeyValue> {
        self.right_key_idx.iter().map(|&j| row[j].to_key()).collect()
    }

    fn assemble(&self, left: Option<&[Value]>, right: Option<&[Value]>) -> Vec<Value> {
        self.sources
            .iter()
            .map(|source| match *source {
                ColumnSource::Left(i) => left.map(|row| row[i].clone()).unwrap_or_default(),
                ColumnSource::Right(j) => right.map(|row| row[j].clone()).unwrap_or_default(),
                ColumnSource::MergedKey { left: i, right: j } => match (left, right) {
                    (Some(row), _) => row[i].clone(),
                    (None, Some(row)) => row[j].clone(),
                    (None, None) => Value::Null,
                },
            })
            .collect()
    }
}

fn resolve_keys(step: usize, side: &str, columns: &[String], keys: &[String]) -> Result<Vec<usize>> {
    keys.iter()
        .map(|key| {
            columns
                .iter()
                .position(|c| c == key)
                .ok_or_else(|| MergeError::InvalidJoinKeys {
                    step,
                    reason: format!("{} key '{}' not found in {} operand", side, key, side),
                })
        })
        .collect()
}

fn qualify(name: &str, label: &str, taken: &HashSet<String>) -> String {
    let base = format!("{}_{}", name, label);
    if !taken.contains(&base) {
        return base;
    }
    let mut k = 2;
    loop {
        let candidate = format!("{}_{}", base, k);
        if !taken.contains(&candidate) {
            return candidate;
        }
        k += 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinOptions {
    /// Missing key cells match each other
    pub null_keys_match: bool,
    /// Abort once the output would grow past this many rows
    pub max_rows: Option<usize>,
}

impl Default for JoinOptions {
    fn default() -> Self {
        Self {
            null_keys_match: true,
            max_rows: None,
        }
    }
}

/// Join `left` and `right` according to `layout`.
///
/// The right side is hashed on its key tuple; left rows probe it in order.
pub fn hash_join(
    left: &Relation,
    right: &Relation,
    layout: &JoinLayout,
    join_type: JoinType,
    options: &JoinOptions,
) -> Result<Relation> {
    let skip_key = |key: &[KeyValue]| !options.null_keys_match && key.contains(&KeyValue::Null);

    let mut index: HashMap<Vec<KeyValue>, Vec<usize>> = HashMap::new();
    for (j, row) in right.rows().iter().enumerate() {
        let key = layout.right_key(row);
        if skip_key(&key[..]) {
            continue;
        }
        index.entry(key).or_default().push(j);
    }

    let mut out = OutputRows::new(layout.step, options.max_rows);
    let mut right_matched = vec![false; right.row_count()];

    for left_row in left.rows() {
        let key = layout.left_key(left_row);
        let partners = if skip_key(&key[..]) { None } else { index.get(&key) };

        match partners {
            Some(partners) => {
                for &j in partners {
                    right_matched[j] = true;
                    out.push(layout.assemble(Some(left_row.as_slice()), Some(right.rows()[j].as_slice())))?;
                }
            }
            None if join_type.keeps_left() => {
                out.push(layout.assemble(Some(left_row.as_slice()), None))?;
            }
            None => {}
        }
    }

    if join_type.keeps_right() {
        for (j, right_row) in right.rows().iter().enumerate() {
            if !right_matched[j] {
                out.push(layout.assemble(None, Some(right_row.as_slice())))?;
            }
        }
    }

    Ok(Relation::from_parts(layout.columns.clone(), out.rows))
}

struct OutputRows {
    step: usize,
    limit: Option<usize>,
    rows: Vec<Vec<Value>>,
}

impl OutputRows {
    fn new(step: usize, limit: Option<usize>) -> Self {
        Self {
            step,
            limit,
            rows: Vec::new(),
        }
    }

    fn push(&mut self, row: Vec<Value>) -> Result<()> {
        if let Some(limit) = self.limit {
            if self.rows.len() >= limit {
                return Err(MergeError::RowLimitExceeded {
                    step: self.step,
                    limit,
                });
            }
        }
        self.rows.push(row);
        Ok(())
    }
}
