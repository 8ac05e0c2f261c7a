//! Polars interop
//!
//! Tables usually arrive as polars `DataFrame`s loaded from CSV or Parquet.
//! The executor works on [`Relation`]s, so frames are converted at the edge
//! and converted back for export.

use crate::error::{MergeError, Result};
use crate::relation::Relation;
use crate::value::Value;
use polars::prelude::*;
use std::path::Path;

impl Relation {
    pub fn from_dataframe(df: &DataFrame) -> Result<Self> {
        let columns: Vec<String> = df.get_column_names().iter().map(|s| s.to_string()).collect();
        let series = df.get_columns();

        let mut rows = Vec::with_capacity(df.height());
        for idx in 0..df.height() {
            let row = series
                .iter()
                .map(|s| {
                    s.get(idx)
                        .map(any_value_to_value)
                        .map_err(|e| MergeError::Polars(format!("Failed to read column {}: {}", s.name(), e)))
                })
                .collect::<Result<Vec<_>>>()?;
            rows.push(row);
        }

        Relation::new(columns, rows)
    }

    /// Column types are inferred from the values: all-bool, all-int, numeric
    /// (int and float mixed) or, for anything else, strings.
    pub fn to_dataframe(&self) -> Result<DataFrame> {
        let series: Vec<Series> = self
            .columns()
            .iter()
            .enumerate()
            .map(|(idx, name)| {
                let values: Vec<&Value> = self.rows().iter().map(|row| &row[idx]).collect();
                column_to_series(name, &values)
            })
            .collect();

        DataFrame::new(series).map_err(|e| MergeError::Polars(format!("Failed to build DataFrame: {}", e)))
    }
}

fn any_value_to_value(av: AnyValue) -> Value {
    match av {
        AnyValue::Null => Value::Null,
        AnyValue::Boolean(b) => Value::Bool(b),
        AnyValue::String(s) => Value::Str(s.to_string()),
        AnyValue::Int32(v) => Value::Int(v as i64),
        AnyValue::Int64(v) => Value::Int(v),
        AnyValue::UInt32(v) => Value::Int(v as i64),
        AnyValue::UInt64(v) => i64::try_from(v)
            .map(Value::Int)
            .unwrap_or(Value::Float(v as f64)),
        AnyValue::Float32(v) => Value::Float(v as f64),
        AnyValue::Float64(v) => Value::Float(v),
        other if other.dtype().is_integer() => other.extract::<i64>().map(Value::Int).unwrap_or_default(),
        // Dates, times and nested values are carried as their display form
        other => Value::Str(other.to_string()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Empty,
    Bool,
    Int,
    Float,
    Str,
}

impl ColumnKind {
    fn widen(self, value: &Value) -> Self {
        use ColumnKind::*;
        match (self, value) {
            (kind, Value::Null) => kind,
            (Empty | Bool, Value::Bool(_)) => Bool,
            (Empty | Int, Value::Int(_)) => Int,
            (Empty | Int | Float, Value::Float(_)) | (Float, Value::Int(_)) => Float,
            _ => Str,
        }
    }
}

fn column_to_series(name: &str, values: &[&Value]) -> Series {
    let kind = values.iter().fold(ColumnKind::Empty, |kind, v| kind.widen(v));
    match kind {
        ColumnKind::Bool => {
            let data: Vec<Option<bool>> = values
                .iter()
                .map(|v| match v {
                    Value::Bool(b) => Some(*b),
                    _ => None,
                })
                .collect();
            Series::new(name, data)
        }
        ColumnKind::Int => {
            let data: Vec<Option<i64>> = values
                .iter()
                .map(|v| match v {
                    Value::Int(i) => Some(*i),
                    _ => None,
                })
                .collect();
            Series::new(name, data)
        }
        ColumnKind::Float => {
            let data: Vec<Option<f64>> = values
                .iter()
                .map(|v| match v {
                    Value::Int(i) => Some(*i as f64),
                    Value::Float(f) => Some(*f),
                    _ => None,
                })
                .collect();
            Series::new(name, data)
        }
        ColumnKind::Str | ColumnKind::Empty => {
            let data: Vec<Option<String>> = values
                .iter()
                .map(|v| if v.is_null() { None } else { Some(v.to_string()) })
                .collect();
            Series::new(name, data)
        }
    }
}

/// Load a CSV or Parquet file, chosen by extension
pub fn load_table(path: &Path) -> Result<DataFrame> {
    let extension = path
        .extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_lowercase());

    match extension.as_deref() {
        Some("csv") => LazyCsvReader::new(path)
            .with_try_parse_dates(true)
            .with_infer_schema_length(Some(1000))
            .finish()
            .map_err(|e| MergeError::Polars(format!("Failed to scan CSV {}: {}", path.display(), e)))?
            .collect()
            .map_err(|e| MergeError::Polars(format!("Failed to collect CSV {}: {}", path.display(), e))),
        Some("parquet") => LazyFrame::scan_parquet(path, ScanArgsParquet::default())
            .map_err(|e| MergeError::Polars(format!("Failed to scan {}: {}", path.display(), e)))?
            .collect()
            .map_err(|e| MergeError::Polars(format!("Failed to collect {}: {}", path.display(), e))),
        _ => Err(MergeError::InvalidRelation(format!(
            "unsupported table file {} (expected .csv or .parquet)",
            path.display()
        ))),
    }
}

pub fn load_relation(path: &Path) -> Result<Relation> {
    Relation::from_dataframe(&load_table(path)?)
}

pub fn write_csv(relation: &Relation, path: &Path) -> Result<()> {
    let mut df = relation.to_dataframe()?;
    let mut file = std::fs::File::create(path)?;
    CsvWriter::new(&mut file)
        .finish(&mut df)
        .map_err(|e| MergeError::Polars(format!("Failed to write {}: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_dataframe() {
        let df = df![
            "id" => [1i64, 2],
            "name" => ["x", "y"],
            "score" => [Some(1.5), None]
        ]
        .unwrap();

        let rel = Relation::from_dataframe(&df).unwrap();
        assert_eq!(rel.columns(), &["id", "name", "score"]);
        assert_eq!(
            rel.rows(),
            &[
                vec![Value::Int(1), Value::from("x"), Value::Float(1.5)],
                vec![Value::Int(2), Value::from("y"), Value::Null],
            ]
        );
    }

    #[test]
    fn test_to_dataframe_types() {
        let rel = Relation::from_rows(
            &["i", "f", "b", "s", "n"],
            vec![
                vec![Value::Int(1), Value::Int(1), Value::Bool(true), Value::from("a"), Value::Null],
                vec![Value::Null, Value::Float(2.5), Value::Null, Value::Int(3), Value::Null],
            ],
        )
        .unwrap();

        let df = rel.to_dataframe().unwrap();
        assert_eq!(df.height(), 2);
        assert_eq!(df.column("i").unwrap().dtype(), &DataType::Int64);
        assert_eq!(df.column("f").unwrap().dtype(), &DataType::Float64);
        assert_eq!(df.column("b").unwrap().dtype(), &DataType::Boolean);
        assert_eq!(df.column("s").unwrap().dtype(), &DataType::String);
        assert_eq!(df.column("n").unwrap().null_count(), 2);
    }

    #[test]
    fn test_unsupported_extension() {
        let result = load_table(Path::new("tables/orders.xlsx"));
        assert!(matches!(result, Err(MergeError::InvalidRelation(_))));
    }
}
