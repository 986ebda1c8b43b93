#![cfg(feature = "test-utils")]

use std::collections::HashMap;
use std::sync::Arc;

use sql_helper::prelude::*;
use sql_helper::test_utils::{
    ExecutionKind, MEMORY_CONNECTION_STRING as CS, MemoryDriver, Response, int_inputs,
};

fn scripted() -> (MemoryDriver, SqlHelper) {
    let driver = MemoryDriver::new();
    driver.define_procedure("usp_add", int_inputs(&["@a", "@b"]), |call| {
        let a = call.value("@a").and_then(DbValue::as_int).copied().unwrap_or(0);
        let b = call.value("@b").and_then(DbValue::as_int).copied().unwrap_or(0);
        Ok(Response::scalar(a + b).with_rows_affected(1))
    });
    driver.define_procedure(
        "usp_count",
        vec![
            SqlParameter::new("@min", ParameterDirection::Input).with_sql_type("int"),
            SqlParameter::new("@total", ParameterDirection::InputOutput).with_sql_type("int"),
        ],
        |call| {
            call.set_output("@total", 12);
            Ok(Response::rows_affected(3).with_return_value(5))
        },
    );
    driver.define_procedure("usp_orders", Vec::new(), |_| {
        Ok(Response::table(&["id"], vec![vec![DbValue::Int(1)], vec![DbValue::Int(2)]])
            .with_table(&["id", "sku"], vec![vec![DbValue::Int(1), DbValue::Text("a-1".into())]]))
    });
    driver.on_text("SELECT nothing", |_| Ok(Response::empty()));
    driver.on_text("SELECT empty", |_| Ok(Response::table(&["v"], Vec::new())));
    driver.on_text("DELETE FROM t", |_| Ok(Response::rows_affected(4)));
    let helper = SqlHelper::new(Arc::new(driver.clone()));
    (driver, helper)
}

#[tokio::test]
async fn non_query_reports_rows_affected() -> Result<(), SqlHelperError> {
    let (driver, helper) = scripted();
    let rows = helper
        .execute_non_query(CS, CommandType::Text, "DELETE FROM t", &mut [])
        .await?;
    assert_eq!(rows, 4);
    assert_eq!(driver.executed()[0].kind, ExecutionKind::NonQuery);
    Ok(())
}

#[tokio::test]
async fn output_and_return_values_are_written_back() -> Result<(), SqlHelperError> {
    let (_driver, helper) = scripted();
    let mut params = helper
        .parameter_cache()
        .get_parameter_template(CS, "usp_count", true)
        .await?;
    params[1].value = Some(DbValue::Int(10));

    let rows = helper
        .execute_non_query(CS, CommandType::StoredProcedure, "usp_count", &mut params)
        .await?;
    assert_eq!(rows, 3);
    assert_eq!(params[0].value, Some(DbValue::Int(5)));
    assert_eq!(params[2].value, Some(DbValue::Int(12)));
    Ok(())
}

#[tokio::test]
async fn positional_values_bind_in_declared_order() -> Result<(), SqlHelperError> {
    let (driver, helper) = scripted();
    let value = helper
        .execute_scalar_sp(CS, "usp_add", &param_args![2, 40])
        .await?;
    assert_eq!(value, DbValue::Int(42));

    let sent = &driver.executed()[0].parameters;
    assert_eq!(sent[0].name, "@a");
    assert_eq!(sent[0].value, Some(DbValue::Int(2)));
    assert_eq!(sent[1].value, Some(DbValue::Int(40)));
    Ok(())
}

#[tokio::test]
async fn value_count_mismatch_is_rejected_before_execution() {
    let (driver, helper) = scripted();
    let err = helper
        .execute_non_query_sp(CS, "usp_add", &param_args![1])
        .await
        .unwrap_err();
    assert!(matches!(err, SqlHelperError::InvalidArgument(_)), "{err:?}");
    assert!(driver.executed().is_empty());
}

#[tokio::test]
async fn no_values_means_no_discovery() -> Result<(), SqlHelperError> {
    let (driver, helper) = scripted();
    let data_set = helper.execute_dataset_sp(CS, "usp_orders", &[]).await?;
    assert_eq!(data_set.len(), 2);
    assert_eq!(driver.stats().derive_calls, 0);
    Ok(())
}

#[tokio::test]
async fn unassigned_values_are_sent_as_null() -> Result<(), SqlHelperError> {
    let (driver, helper) = scripted();
    let mut params = vec![
        SqlParameter::input("@a", None::<i64>),
        SqlParameter::input("@b", Some(1)),
    ];
    let value = helper
        .execute_scalar(CS, CommandType::StoredProcedure, "usp_add", &mut params)
        .await?;
    assert_eq!(value, DbValue::Int(1));
    assert_eq!(params[0].value, Some(DbValue::Null));
    assert_eq!(driver.executed()[0].parameters[0].value, Some(DbValue::Null));
    Ok(())
}

#[tokio::test]
async fn record_fields_bind_by_name() -> Result<(), SqlHelperError> {
    let (driver, helper) = scripted();
    let mut record = HashMap::new();
    record.insert("b".to_string(), DbValue::Int(9));
    record.insert("unrelated".to_string(), DbValue::Int(1));

    let value = helper
        .execute_scalar_typed_params(CS, "usp_add", &record)
        .await?;
    assert_eq!(value, DbValue::Int(9));

    let sent = &driver.executed()[0].parameters;
    assert_eq!(sent[0].value, Some(DbValue::Null));
    assert_eq!(sent[1].value, Some(DbValue::Int(9)));
    Ok(())
}

#[tokio::test]
async fn scalar_without_rows_is_null() -> Result<(), SqlHelperError> {
    let (_driver, helper) = scripted();
    let none = helper
        .execute_scalar(CS, CommandType::Text, "SELECT nothing", &mut [])
        .await?;
    assert_eq!(none, DbValue::Null);

    let empty = helper
        .execute_scalar(CS, CommandType::Text, "SELECT empty", &mut [])
        .await?;
    assert_eq!(empty, DbValue::Null);
    Ok(())
}

#[tokio::test]
async fn dataset_tables_take_caller_names_in_order() -> Result<(), SqlHelperError> {
    let (_driver, helper) = scripted();
    let mut data_set = DataSet::new();
    helper
        .fill_dataset_sp(CS, "usp_orders", &mut data_set, &["Orders"], &[])
        .await?;

    let names = data_set
        .tables()
        .iter()
        .map(|t| t.name.as_str())
        .collect::<Vec<_>>();
    assert_eq!(names, ["Orders", "Table1"]);
    assert_eq!(data_set.table("Orders").map(DataTable::row_count), Some(2));

    helper
        .fill_dataset_sp(CS, "usp_orders", &mut data_set, &["Orders", "Lines"], &[])
        .await?;
    assert_eq!(data_set.len(), 3);
    assert_eq!(data_set.table("Orders").map(DataTable::row_count), Some(4));
    Ok(())
}

#[tokio::test]
async fn empty_table_name_is_rejected_before_io() {
    let (driver, helper) = scripted();
    let mut data_set = DataSet::new();
    let err = helper
        .fill_dataset_sp(CS, "usp_orders", &mut data_set, &["Orders", ""], &[])
        .await
        .unwrap_err();
    assert!(matches!(err, SqlHelperError::InvalidArgument(_)), "{err:?}");
    assert_eq!(driver.stats().opens, 0);
    assert!(data_set.is_empty());
}

#[tokio::test]
async fn empty_command_text_is_rejected_before_io() {
    let (driver, helper) = scripted();
    let err = helper
        .execute_non_query(CS, CommandType::Text, "", &mut [])
        .await
        .unwrap_err();
    assert!(matches!(err, SqlHelperError::InvalidArgument(_)));

    let err = helper
        .execute_non_query("", CommandType::Text, "DELETE FROM t", &mut [])
        .await
        .unwrap_err();
    assert!(matches!(err, SqlHelperError::InvalidArgument(_)));
    assert_eq!(driver.stats().opens, 0);
}

#[tokio::test]
async fn helper_closes_only_what_it_opened() -> Result<(), SqlHelperError> {
    let (driver, helper) = scripted();

    helper
        .execute_non_query(CS, CommandType::Text, "DELETE FROM t", &mut [])
        .await?;
    assert_eq!(driver.stats().open_connections, 0);

    let open = helper.connection(CS)?;
    open.open().await?;
    helper
        .execute_non_query(&open, CommandType::Text, "DELETE FROM t", &mut [])
        .await?;
    assert!(open.is_open().await);

    let closed = helper.connection(CS)?;
    helper
        .execute_non_query(&closed, CommandType::Text, "DELETE FROM t", &mut [])
        .await?;
    assert!(!closed.is_open().await);

    assert_eq!(driver.stats().open_connections, 1);
    Ok(())
}

#[tokio::test]
async fn failed_command_still_closes_owned_connection() {
    let (driver, helper) = scripted();
    let err = helper
        .execute_non_query(CS, CommandType::StoredProcedure, "usp_missing", &mut [])
        .await
        .unwrap_err();
    assert!(err.is_dependency_failure(), "{err:?}");
    assert_eq!(driver.stats().opens, 1);
    assert_eq!(driver.stats().open_connections, 0);
}

#[tokio::test]
async fn unreachable_server_is_a_dependency_failure() {
    let (driver, helper) = scripted();
    driver.set_unreachable(true);
    let err = helper
        .execute_scalar(CS, CommandType::Text, "SELECT nothing", &mut [])
        .await
        .unwrap_err();
    assert!(err.is_dependency_failure(), "{err:?}");
}

#[tokio::test]
async fn commands_join_a_live_transaction() -> Result<(), SqlHelperError> {
    let (driver, helper) = scripted();
    let conn = helper.connection(CS)?;
    conn.open().await?;
    let tx = conn.begin_transaction().await?;

    helper
        .execute_non_query(&tx, CommandType::Text, "DELETE FROM t", &mut [])
        .await?;
    assert!(driver.executed()[0].in_transaction);
    assert!(conn.is_open().await);

    tx.commit().await?;
    assert_eq!(driver.stats().commits, 1);
    Ok(())
}

#[tokio::test]
async fn finished_transaction_is_invalid_state() -> Result<(), SqlHelperError> {
    let (driver, helper) = scripted();
    let conn = helper.connection(CS)?;
    conn.open().await?;
    let tx = conn.begin_transaction().await?;
    tx.commit().await?;
    assert!(tx.is_finished());
    assert!(tx.connection().is_none());

    let err = helper
        .execute_non_query(&tx, CommandType::Text, "DELETE FROM t", &mut [])
        .await
        .unwrap_err();
    assert!(matches!(err, SqlHelperError::InvalidState(_)), "{err:?}");
    assert!(matches!(
        tx.rollback().await,
        Err(SqlHelperError::InvalidState(_))
    ));
    assert!(driver.executed().is_empty());
    Ok(())
}
