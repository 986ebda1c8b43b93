#![cfg(feature = "test-utils")]

use std::collections::HashSet;
use std::sync::Arc;

use sql_helper::prelude::*;
use sql_helper::test_utils::{MEMORY_CONNECTION_STRING as CS, MemoryDriver, Response};

fn scripted() -> (MemoryDriver, SqlHelper, TransactionRegistry) {
    let driver = MemoryDriver::new();
    driver.on_text("INSERT INTO audit DEFAULT VALUES", |call| {
        assert!(call.in_transaction);
        Ok(Response::rows_affected(1))
    });
    let helper = SqlHelper::new(Arc::new(driver.clone()));
    let registry = helper.transaction_registry(&RegistryOptions::default());
    (driver, helper, registry)
}

#[tokio::test]
async fn begin_then_commit_releases_everything() -> Result<(), SqlHelperError> {
    let (driver, helper, registry) = scripted();
    let id = registry.begin(CS).await?;
    assert_eq!(registry.len(), 1);

    let info = registry.connect_info(id, CS);
    assert!(matches!(info, ConnectInfo::Transaction(_)));
    helper
        .execute_non_query(
            info.target(),
            CommandType::Text,
            "INSERT INTO audit DEFAULT VALUES",
            &mut [],
        )
        .await?;

    assert!(registry.commit(id).await);
    assert!(registry.is_empty());
    let stats = driver.stats();
    assert_eq!(stats.commits, 1);
    assert_eq!(stats.open_connections, 0);
    Ok(())
}

#[tokio::test]
async fn begin_then_rollback_releases_everything() -> Result<(), SqlHelperError> {
    let (driver, _helper, registry) = scripted();
    let id = registry.begin(CS).await?;
    let tx = registry.get(id).expect("registered transaction");

    assert!(registry.rollback(id).await);
    assert!(tx.is_finished());
    assert!(registry.get(id).is_none());
    assert_eq!(driver.stats().rollbacks, 1);
    assert_eq!(driver.stats().open_connections, 0);
    Ok(())
}

#[tokio::test]
async fn unknown_ids_fall_back_to_the_default_connection() {
    let (_driver, _helper, registry) = scripted();
    let id = TransactionId(12345);

    assert!(!registry.commit(id).await);
    assert!(!registry.rollback(id).await);
    match registry.connect_info(id, CS) {
        ConnectInfo::ConnectionString(cs) => assert_eq!(cs, CS),
        other => panic!("expected a connection string, got {other:?}"),
    }
}

#[tokio::test]
async fn failed_commit_keeps_the_transaction_registered() -> Result<(), SqlHelperError> {
    let (driver, _helper, registry) = scripted();
    let id = registry.begin(CS).await?;

    driver.set_fail_commits(true);
    assert!(!registry.commit(id).await);
    assert_eq!(registry.len(), 1);
    assert_eq!(driver.stats().open_connections, 1);

    assert!(registry.rollback(id).await);
    assert!(registry.is_empty());
    assert_eq!(driver.stats().open_connections, 0);
    Ok(())
}

#[tokio::test]
async fn ids_are_distinct_and_seeded() -> Result<(), SqlHelperError> {
    let (driver, helper, registry) = scripted();
    let a = registry.begin(CS).await?;
    let b = registry.begin(CS).await?;
    assert_ne!(a, b);
    assert!(a.0 >= 0 && b.0 >= 0);

    let replay = helper.transaction_registry(&RegistryOptions::default());
    assert_eq!(replay.begin(CS).await?, a);

    for id in [a, b] {
        assert!(registry.rollback(id).await);
    }
    assert!(replay.rollback(a).await);
    assert_eq!(driver.stats().open_connections, 0);
    Ok(())
}

#[tokio::test]
async fn begin_fails_cleanly_when_the_server_is_down() {
    let (driver, _helper, registry) = scripted();
    driver.set_unreachable(true);

    let err = registry.begin(CS).await.unwrap_err();
    assert!(err.is_dependency_failure(), "{err:?}");
    assert!(registry.is_empty());

    let err = registry.begin("").await.unwrap_err();
    assert!(matches!(err, SqlHelperError::InvalidArgument(_)));
}

#[tokio::test]
async fn failed_close_after_commit_still_forgets_the_id() -> Result<(), SqlHelperError> {
    let (driver, _helper, registry) = scripted();
    let id = registry.begin(CS).await?;

    driver.set_fail_closes(true);
    assert!(!registry.commit(id).await);
    assert!(registry.is_empty());
    assert!(registry.get(id).is_none());
    assert!(!registry.rollback(id).await);

    let stats = driver.stats();
    assert_eq!(stats.commits, 1);
    assert_eq!(stats.rollbacks, 0);
    assert_eq!(stats.open_connections, 0);
    Ok(())
}

#[tokio::test]
async fn concurrent_finishes_remove_each_id_once() -> Result<(), SqlHelperError> {
    let (driver, _helper, registry) = scripted();
    let (a, b, c) = tokio::try_join!(registry.begin(CS), registry.begin(CS), registry.begin(CS))?;
    let ids = [a, b, c];
    assert_eq!(ids.iter().collect::<HashSet<_>>().len(), 3);
    assert_eq!(registry.len(), 3);

    for id in ids {
        let (committed, rolled_back) = tokio::join!(registry.commit(id), registry.rollback(id));
        assert!(committed ^ rolled_back, "{id}: commit={committed} rollback={rolled_back}");
    }

    assert!(registry.is_empty());
    let stats = driver.stats();
    assert_eq!(stats.commits + stats.rollbacks, 3);
    assert_eq!(stats.open_connections, 0);
    Ok(())
}
