#![cfg(feature = "test-utils")]

use std::sync::Arc;
use std::time::Duration;

use sql_helper::prelude::*;
use sql_helper::test_utils::{
    ExecutionKind, MEMORY_CONNECTION_STRING as CS, MemoryDriver, Response,
};

const PEOPLE: &str = "SELECT id, name FROM people";

fn scripted(options: HelperOptions) -> (MemoryDriver, SqlHelper) {
    let driver = MemoryDriver::new();
    driver.on_text(PEOPLE, |_| {
        Ok(Response::table(
            &["id", "name"],
            vec![
                vec![DbValue::Int(1), DbValue::Text("alice".into())],
                vec![DbValue::Int(2), DbValue::Text("bob".into())],
            ],
        ))
    });
    driver.define_procedure(
        "usp_people_page",
        vec![
            SqlParameter::new("@page", ParameterDirection::Input).with_sql_type("int"),
            SqlParameter::new("@total", ParameterDirection::InputOutput).with_sql_type("int"),
        ],
        |call| {
            call.set_output("@total", 42);
            Ok(Response::table(&["id"], vec![vec![DbValue::Int(7)]]))
        },
    );
    driver.define_procedure("usp_people_xml", Vec::new(), |_| {
        Ok(Response::xml(&[
            r#"<person id="1" name="alice"/><person id="2" "#,
            r#"name="b &amp; c"/>"#,
        ]))
    });
    let helper = SqlHelper::with_options(Arc::new(driver.clone()), options);
    (driver, helper)
}

fn quick_retries(limit: u32) -> HelperOptions {
    HelperOptions::builder()
        .cursor_retry_limit(limit)
        .cursor_retry_pause(Duration::from_millis(10))
        .finish()
}

#[tokio::test]
async fn rows_stream_in_order() -> Result<(), SqlHelperError> {
    let (_driver, helper) = scripted(HelperOptions::default());
    let mut reader = helper
        .execute_reader(CS, CommandType::Text, PEOPLE, &mut Vec::new())
        .await?;
    assert_eq!(reader.column_names(), ["id", "name"]);

    assert!(reader.read().await?);
    let first = reader.current().expect("current row");
    assert_eq!(first.get("name"), Some(&DbValue::Text("alice".into())));

    let second = reader.next_row().await?.expect("second row");
    assert_eq!(second.get("id"), Some(&DbValue::Int(2)));

    assert!(!reader.read().await?);
    assert!(reader.is_closed());
    Ok(())
}

#[tokio::test]
async fn owned_connection_closes_when_rows_run_out() -> Result<(), SqlHelperError> {
    let (driver, helper) = scripted(HelperOptions::default());
    let mut reader = helper
        .execute_reader(CS, CommandType::Text, PEOPLE, &mut Vec::new())
        .await?;
    assert_eq!(driver.stats().open_connections, 1);

    let table = reader.read_table("People").await?;
    assert_eq!(table.row_count(), 2);
    assert_eq!(driver.stats().open_connections, 0);
    Ok(())
}

#[tokio::test]
async fn caller_connection_stays_open_after_reader() -> Result<(), SqlHelperError> {
    let (_driver, helper) = scripted(HelperOptions::default());
    let conn = helper.connection(CS)?;
    conn.open().await?;

    let reader = helper
        .execute_reader(&conn, CommandType::Text, PEOPLE, &mut Vec::new())
        .await?;
    assert!(conn.has_open_cursor());
    reader.close().await?;

    assert!(!conn.has_open_cursor());
    assert!(conn.is_open().await);
    Ok(())
}

#[tokio::test]
async fn outputs_arrive_once_the_reader_completes() -> Result<(), SqlHelperError> {
    let (_driver, helper) = scripted(HelperOptions::default());
    let mut params = vec![
        SqlParameter::input("@page", Some(1)),
        SqlParameter::output("@total", "int"),
    ];
    let mut reader = helper
        .execute_reader(CS, CommandType::StoredProcedure, "usp_people_page", &mut params)
        .await?;
    assert!(params.is_empty(), "parameters move into the reader");
    assert_eq!(reader.parameter("@total").and_then(|p| p.value.clone()), None);

    while reader.read().await? {}
    assert_eq!(
        reader.parameter("@total").and_then(|p| p.value.clone()),
        Some(DbValue::Int(42))
    );

    let params = reader.close().await?;
    assert_eq!(params.len(), 2);
    Ok(())
}

#[tokio::test]
async fn input_only_parameters_stay_with_the_caller() -> Result<(), SqlHelperError> {
    let (_driver, helper) = scripted(HelperOptions::default());
    let mut params = vec![SqlParameter::input("@page", Some(1))];
    let reader = helper
        .execute_reader(CS, CommandType::Text, PEOPLE, &mut params)
        .await?;
    assert_eq!(params.len(), 1);
    assert!(reader.parameters().is_empty());
    Ok(())
}

#[tokio::test]
async fn other_commands_are_busy_while_a_reader_is_open() -> Result<(), SqlHelperError> {
    let (_driver, helper) = scripted(HelperOptions::default());
    let conn = helper.connection(CS)?;
    conn.open().await?;
    let reader = helper
        .execute_reader(&conn, CommandType::Text, PEOPLE, &mut Vec::new())
        .await?;

    let err = helper
        .execute_scalar(&conn, CommandType::Text, PEOPLE, &mut [])
        .await
        .unwrap_err();
    assert!(err.is_resource_busy(), "{err:?}");

    drop(reader);
    assert!(!conn.has_open_cursor());
    helper
        .execute_scalar(&conn, CommandType::Text, PEOPLE, &mut [])
        .await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn second_reader_waits_for_the_first() -> Result<(), SqlHelperError> {
    let (driver, helper) = scripted(quick_retries(5));
    let conn = helper.connection(CS)?;
    conn.open().await?;
    let first = helper
        .execute_reader(&conn, CommandType::Text, PEOPLE, &mut Vec::new())
        .await?;

    let release = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(25)).await;
        first.close().await
    });

    let mut second = helper
        .execute_reader(&conn, CommandType::Text, PEOPLE, &mut Vec::new())
        .await?;
    assert_eq!(second.read_table("People").await?.row_count(), 2);
    release.await.expect("release task")?;

    let readers = driver
        .executed()
        .iter()
        .filter(|c| c.kind == ExecutionKind::Reader)
        .count();
    assert_eq!(readers, 2);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn reader_gives_up_after_the_retry_limit() -> Result<(), SqlHelperError> {
    let (driver, helper) = scripted(quick_retries(2));
    let conn = helper.connection(CS)?;
    conn.open().await?;
    let _first = helper
        .execute_reader(&conn, CommandType::Text, PEOPLE, &mut Vec::new())
        .await?;

    let started = tokio::time::Instant::now();
    let err = helper
        .execute_reader(&conn, CommandType::Text, PEOPLE, &mut Vec::new())
        .await
        .unwrap_err();
    assert!(err.is_resource_busy(), "{err:?}");
    assert!(started.elapsed() >= Duration::from_millis(20));
    assert_eq!(driver.executed().len(), 1);
    assert!(conn.is_open().await);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn default_retry_limit_waits_ten_pauses() -> Result<(), SqlHelperError> {
    let (driver, helper) = scripted(HelperOptions::default());
    let conn = helper.connection(CS)?;
    conn.open().await?;
    let _first = helper
        .execute_reader(&conn, CommandType::Text, PEOPLE, &mut Vec::new())
        .await?;

    let started = tokio::time::Instant::now();
    let err = helper
        .execute_reader(&conn, CommandType::Text, PEOPLE, &mut Vec::new())
        .await
        .unwrap_err();
    assert!(err.is_resource_busy(), "{err:?}");
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(5), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(5500), "{elapsed:?}");
    assert_eq!(driver.executed().len(), 1);
    Ok(())
}

#[tokio::test]
async fn reader_from_before_a_reopen_cannot_free_the_new_cursor() -> Result<(), SqlHelperError> {
    let (driver, helper) = scripted(HelperOptions::default());
    let conn = helper.connection(CS)?;
    conn.open().await?;
    let stale = helper
        .execute_reader(&conn, CommandType::Text, PEOPLE, &mut Vec::new())
        .await?;

    conn.close().await?;
    assert!(!conn.has_open_cursor());
    conn.open().await?;
    let current = helper
        .execute_reader(&conn, CommandType::Text, PEOPLE, &mut Vec::new())
        .await?;

    drop(stale);
    assert!(conn.has_open_cursor());
    let err = helper
        .execute_non_query(&conn, CommandType::Text, PEOPLE, &mut [])
        .await
        .unwrap_err();
    assert!(err.is_resource_busy(), "{err:?}");

    current.close().await?;
    assert!(!conn.has_open_cursor());
    assert_eq!(driver.executed().len(), 2);
    Ok(())
}

#[tokio::test]
async fn xml_fragments_join_into_one_document() -> Result<(), SqlHelperError> {
    let (driver, helper) = scripted(HelperOptions::default());
    let mut reader = helper
        .execute_xml_reader_sp(CS, "usp_people_xml", &[])
        .await?;
    let elements = reader.read_elements().await?;

    assert_eq!(elements.len(), 2);
    assert_eq!(elements[0].name, "person");
    assert_eq!(
        elements[1].attributes,
        vec![
            ("id".to_string(), "2".to_string()),
            ("name".to_string(), "b & c".to_string()),
        ]
    );
    assert!(reader.is_closed());
    assert_eq!(driver.executed()[0].kind, ExecutionKind::XmlReader);
    assert_eq!(driver.stats().open_connections, 0);
    Ok(())
}

#[tokio::test]
async fn xml_reader_runs_inside_a_transaction() -> Result<(), SqlHelperError> {
    let (driver, helper) = scripted(HelperOptions::default());
    let conn = helper.connection(CS)?;
    conn.open().await?;
    let tx = conn.begin_transaction().await?;

    let mut reader = helper
        .execute_xml_reader(&tx, CommandType::StoredProcedure, "usp_people_xml", &mut Vec::new())
        .await?;
    let xml = reader.read_to_string().await?;
    assert!(xml.starts_with("<person id=\"1\""));
    assert!(driver.executed()[0].in_transaction);

    tx.rollback().await?;
    assert!(conn.is_open().await);
    Ok(())
}
