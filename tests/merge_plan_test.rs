use polars::prelude::*;
use std::fs;
use std::path::PathBuf;
use table_merge::frame::{load_relation, write_csv};
use table_merge::{
    execute, ExecutorConfig, JoinStep, JoinType, MergeError, MergeExecutor, MergePlan, Relation,
    SaveMode, TableSet, Value,
};

/// Write the A/B/C sample tables as CSV files
fn create_test_data_files(name: &str) -> Result<PathBuf, Box<dyn std::error::Error>> {
    let data_dir = std::env::temp_dir().join(format!("table_merge_test_{}", name));
    fs::create_dir_all(&data_dir)?;

    fs::write(data_dir.join("a.csv"), "id,name\n1,x\n2,y\n")?;
    fs::write(data_dir.join("b.csv"), "id,val\n1,10\n3,30\n")?;
    fs::write(data_dir.join("c.csv"), "id,flag\n1,true\n")?;

    Ok(data_dir)
}

fn load_tables(data_dir: &PathBuf) -> Result<TableSet, Box<dyn std::error::Error>> {
    let mut tables = TableSet::new();
    for id in ["A", "B", "C"] {
        let path = data_dir.join(format!("{}.csv", id.to_lowercase()));
        tables.insert(id.to_string(), load_relation(&path)?);
    }
    Ok(tables)
}

const CHAIN_PLAN: &str = r#"{
    "steps": [
        {"leftTableId": "A", "rightTableId": "B", "leftKeys": ["id"], "rightKeys": ["id"], "joinType": "left"},
        {"leftTableId": "ignored", "rightTableId": "C", "leftKeys": ["id"], "rightKeys": ["id"], "joinType": "inner"}
    ],
    "saveMode": "each_step"
}"#;

#[test]
fn test_end_to_end_from_csv() -> Result<(), Box<dyn std::error::Error>> {
    let data_dir = create_test_data_files("end_to_end")?;
    let tables = load_tables(&data_dir)?;
    let plan = MergePlan::from_json(CHAIN_PLAN)?;

    let result = execute(&tables, &plan, false)?;

    let step_1 = result.step_relation("step_1").expect("step 1 retained");
    assert_eq!(step_1.columns(), &["id", "name", "val"]);
    assert_eq!(
        step_1.rows(),
        &[
            vec![Value::Int(1), Value::from("x"), Value::Int(10)],
            vec![Value::Int(2), Value::from("y"), Value::Null],
        ]
    );

    assert_eq!(
        result.final_relation.rows(),
        &[vec![Value::Int(1), Value::from("x"), Value::Int(10), Value::Bool(true)]]
    );

    let stats = serde_json::to_value(&result.stats)?;
    assert_eq!(
        stats,
        serde_json::json!([
            {"step": 1, "rows": 2, "left": "A", "right": "B"},
            {"step": 2, "rows": 1, "left": "ignored", "right": "C"}
        ])
    );

    fs::remove_dir_all(&data_dir).ok();
    Ok(())
}

#[test]
fn test_results_export_to_csv() -> Result<(), Box<dyn std::error::Error>> {
    let data_dir = create_test_data_files("export")?;
    let tables = load_tables(&data_dir)?;
    let plan = MergePlan::from_json(CHAIN_PLAN)?;
    let result = execute(&tables, &plan, false)?;

    let out = data_dir.join("step_1.csv");
    write_csv(result.step_relation("step_1").unwrap(), &out)?;
    let reloaded = load_relation(&out)?;

    assert_eq!(reloaded.columns(), &["id", "name", "val"]);
    assert_eq!(reloaded.row_count(), 2);
    assert_eq!(reloaded.value(1, "val"), Some(&Value::Null));

    fs::remove_dir_all(&data_dir).ok();
    Ok(())
}

#[test]
fn test_dataframe_tables() -> Result<(), Box<dyn std::error::Error>> {
    let loans = df![
        "loan_id" => ["1001", "1002", "1003"],
        "principal_amount" => [100000.0, 50000.0, 75000.0]
    ]?;
    let emis = df![
        "loan_id" => ["1001", "1001", "1002"],
        "emi_number" => [1i64, 2, 1],
        "emi_amount" => [5000.0, 5000.0, 3000.0]
    ]?;

    let mut tables = TableSet::new();
    tables.insert("loans".to_string(), Relation::from_dataframe(&loans)?);
    tables.insert("emis".to_string(), Relation::from_dataframe(&emis)?);

    let plan = MergePlan::new(
        vec![JoinStep::new("loans", "emis", &["loan_id"], &["loan_id"], JoinType::Outer)],
        SaveMode::Final,
    )?;
    let result = execute(&tables, &plan, true)?;

    let df = result.final_relation.to_dataframe()?;
    assert_eq!(df.height(), 4);
    assert_eq!(df.get_column_names(), vec!["loan_id", "principal_amount", "emi_number", "emi_amount"]);
    assert_eq!(df.column("emi_number")?.null_count(), 1);
    Ok(())
}

/// Small deterministic table: `rows` rows with keys cycling through `modulo`
fn generated(prefix: &str, rows: i64, modulo: i64) -> Relation {
    let columns = ["k".to_string(), format!("{}_v", prefix)];
    Relation::from_rows(
        &columns,
        (0..rows).map(|i| vec![Value::Int((i * 7 + 3) % modulo), Value::Int(i)]),
    )
    .unwrap()
}

fn one_step(join_type: JoinType) -> MergePlan {
    MergePlan::new(vec![JoinStep::new("L", "R", &["k"], &["k"], join_type)], SaveMode::Final).unwrap()
}

#[test]
fn test_row_count_laws() {
    let mut tables = TableSet::new();
    tables.insert("L".to_string(), generated("l", 25, 9));
    tables.insert("R".to_string(), generated("r", 14, 13));

    let left_rows = tables["L"].row_count();
    let right_rows = tables["R"].row_count();

    let count = |join_type| execute(&tables, &one_step(join_type), true).unwrap().total_rows();
    let inner = count(JoinType::Inner);
    let left = count(JoinType::Left);
    let right = count(JoinType::Right);
    let outer = count(JoinType::Outer);

    assert!(left >= left_rows);
    assert!(right >= right_rows);
    assert!(outer >= left_rows.max(right_rows));
    assert!(inner <= left && inner <= right);
    // outer = inner + unmatched left + unmatched right
    assert_eq!(outer, left + right - inner);
}

#[test]
fn test_execution_is_deterministic_and_leaves_inputs_alone() {
    let mut tables = TableSet::new();
    tables.insert("L".to_string(), generated("l", 40, 11));
    tables.insert("R".to_string(), generated("r", 30, 7));
    let before = tables.clone();

    let first = execute(&tables, &one_step(JoinType::Outer), false).unwrap();
    let second = execute(&tables, &one_step(JoinType::Outer), false).unwrap();

    assert_eq!(first.final_relation, second.final_relation);
    assert_eq!(first.stats, second.stats);
    assert_eq!(tables, before);
}

/// Fails on the first row any join produces, so an executor that joined
/// step 1 before checking step 2 would report `RowLimitExceeded { step: 1 }`
fn no_rows_executor() -> MergeExecutor {
    MergeExecutor::new(ExecutorConfig {
        max_result_rows: Some(0),
        ..ExecutorConfig::default()
    })
}

fn valid_first_step() -> JoinStep {
    JoinStep::new("L", "R", &["k"], &["k"], JoinType::Left)
}

#[test]
fn test_unknown_table_in_later_step_fails_before_any_join() {
    let mut tables = TableSet::new();
    tables.insert("L".to_string(), generated("l", 5, 3));
    tables.insert("R".to_string(), generated("r", 5, 3));

    let plan = MergePlan::new(
        vec![
            valid_first_step(),
            JoinStep::new("L", "missing", &["k"], &["k"], JoinType::Inner),
        ],
        SaveMode::EachStep,
    )
    .unwrap();

    match no_rows_executor().execute(&tables, &plan, false) {
        Err(MergeError::UnknownTable(id)) => assert_eq!(id, "missing"),
        other => panic!("expected UnknownTable, got {:?}", other),
    }
}

#[test]
fn test_bad_keys_in_later_step_fail_before_any_join() {
    let mut tables = TableSet::new();
    tables.insert("L".to_string(), generated("l", 5, 3));
    tables.insert("R".to_string(), generated("r", 5, 3));

    let plan = MergePlan::new(
        vec![
            valid_first_step(),
            JoinStep::new("L", "R", &["k"], &["k", "r_v"], JoinType::Inner),
        ],
        SaveMode::EachStep,
    )
    .unwrap();

    match no_rows_executor().execute(&tables, &plan, false) {
        Err(MergeError::InvalidJoinKeys { step, .. }) => assert_eq!(step, 2),
        other => panic!("expected InvalidJoinKeys for step 2, got {:?}", other),
    }
}

#[test]
fn test_valid_first_step_hits_row_ceiling() {
    let mut tables = TableSet::new();
    tables.insert("L".to_string(), generated("l", 5, 3));
    tables.insert("R".to_string(), generated("r", 5, 3));

    let plan = MergePlan::new(vec![valid_first_step()], SaveMode::Final).unwrap();

    assert!(matches!(
        no_rows_executor().execute(&tables, &plan, false),
        Err(MergeError::RowLimitExceeded { step: 1, limit: 0 })
    ));
}

#[test]
fn test_preview_keeps_stats_for_every_step() {
    let mut tables = TableSet::new();
    tables.insert("L".to_string(), generated("l", 10, 5));
    tables.insert("R".to_string(), generated("r", 10, 5));

    let plan = MergePlan::new(
        vec![
            JoinStep::new("L", "R", &["k"], &["k"], JoinType::Left),
            JoinStep::new("L", "R", &["k"], &["k"], JoinType::Left),
            JoinStep::new("L", "R", &["k"], &["k"], JoinType::Inner),
        ],
        SaveMode::EachTable,
    )
    .unwrap();

    let preview = execute(&tables, &plan, true).unwrap();
    let full = execute(&tables, &plan, false).unwrap();

    assert!(preview.step_relations.is_empty());
    assert_eq!(preview.stats, full.stats);
    assert_eq!(full.step_relations.len(), 3);
    assert_eq!(
        preview.stats.iter().map(|s| s.step_index).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    for (stat, step) in full.stats.iter().zip(&full.step_relations) {
        assert_eq!(stat.row_count, step.relation.row_count());
    }
    // repeated joins against R qualify the colliding value column each time
    assert_eq!(full.final_relation.columns(), &["k", "l_v", "r_v", "r_v_R", "r_v_R_2"]);
}
