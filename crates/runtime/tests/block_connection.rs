mod common;

use common::{calls, context_with, relational, relational_mut, request, RecordingProvisioner};
use conflux_error::{ConfluxError, ErrorCode};
use conflux_runtime::{AcquiredConnection, BlockConnectionLease, BlockConnectionState};
use std::sync::Arc;
use std::time::Duration;

fn lease(acquired: AcquiredConnection) -> BlockConnectionLease {
    match acquired {
        AcquiredConnection::Block(lease) => lease,
        AcquiredConnection::OneShot(_) => panic!("expected a block connection"),
    }
}

#[tokio::test]
async fn test_rollback_runs_rollback_epilogues_in_order_then_closes() {
    let provisioner = Arc::new(RecordingProvisioner::default());
    let mut ctx = context_with(provisioner.clone());
    relational_mut(&mut ctx).set_retain_connection(true);
    let state = relational(&ctx);

    let first = lease(
        state
            .acquire_connection(
                &request("sales")
                    .with_rollback_query("DROP TABLE tmp_1")
                    .with_commit_query("INSERT INTO audit VALUES (1)"),
            )
            .await
            .unwrap(),
    );
    let connection = first.connection().clone();
    first.release();
    state.block_connections().unlock_all();

    let second = lease(
        state
            .acquire_connection(&request("sales").with_rollback_query("DROP TABLE tmp_2"))
            .await
            .unwrap(),
    );
    second.add_rollback_query("DROP TABLE tmp_3");
    drop(second);
    assert_eq!(provisioner.provisions(), 1);

    state.block_connections().rollback_all().await.unwrap();

    assert!(connection.is_closed());
    assert_eq!(
        calls(&provisioner.log),
        vec![
            "provision: alice@sales ()",
            "execute: DROP TABLE tmp_1",
            "execute: DROP TABLE tmp_2",
            "execute: DROP TABLE tmp_3",
            "statement.close",
            "connection.close",
        ]
    );

    // Already closed: a later close runs nothing.
    connection.close().await.unwrap();
    assert_eq!(calls(&provisioner.log).len(), 6);
}

#[tokio::test]
async fn test_close_refused_while_result_set_open() {
    let provisioner = Arc::new(RecordingProvisioner::default());
    let mut ctx = context_with(provisioner.clone());
    relational_mut(&mut ctx).set_retain_connection(true);
    let state = relational(&ctx);

    let held = lease(
        state
            .acquire_connection(&request("sales").with_commit_query("COMMIT WORK"))
            .await
            .unwrap(),
    );
    let connection = held.connection().clone();
    state.block_connections().unlock_all();
    assert_eq!(
        connection.state(),
        BlockConnectionState::AvailableWithOpenResultSet
    );

    let err = connection.close().await.unwrap_err();
    assert_eq!(err.code, ErrorCode::ContractViolation);
    assert!(!connection.is_closed());
    assert_eq!(connection.pending_commit_queries(), vec!["COMMIT WORK"]);

    drop(held);
    assert_eq!(connection.state(), BlockConnectionState::Available);
    connection.close().await.unwrap();
    assert!(connection.is_closed());
    assert!(calls(&provisioner.log).contains(&"execute: COMMIT WORK".to_string()));
}

#[tokio::test]
async fn test_close_is_noop_while_locked() {
    let provisioner = Arc::new(RecordingProvisioner::default());
    let mut ctx = context_with(provisioner.clone());
    relational_mut(&mut ctx).set_retain_connection(true);

    let held = lease(
        relational(&ctx)
            .acquire_connection(&request("sales"))
            .await
            .unwrap(),
    );
    let connection = held.connection().clone();
    held.release();
    assert_eq!(connection.state(), BlockConnectionState::Locked);

    connection.close().await.unwrap();
    assert!(!connection.is_closed());
}

#[tokio::test]
async fn test_acquire_refused_while_previous_result_set_open() {
    let provisioner = Arc::new(RecordingProvisioner::default());
    let mut ctx = context_with(provisioner.clone());
    relational_mut(&mut ctx).set_retain_connection(true);
    let state = relational(&ctx);

    let first = lease(state.acquire_connection(&request("sales")).await.unwrap());
    let connection = first.connection().clone();
    state.block_connections().unlock_all();
    assert_eq!(
        connection.state(),
        BlockConnectionState::AvailableWithOpenResultSet
    );

    let err = state
        .acquire_connection(&request("sales"))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::ContractViolation);
    assert!(err.message.contains("open result set"));
    assert_eq!(
        connection.state(),
        BlockConnectionState::AvailableWithOpenResultSet
    );

    drop(first);
    assert_eq!(connection.state(), BlockConnectionState::Available);

    let second = lease(state.acquire_connection(&request("sales")).await.unwrap());
    assert!(Arc::ptr_eq(&connection, second.connection()));
    assert_eq!(provisioner.provisions(), 1);

    // The second lease still holds its result set, so close is refused.
    let err = connection.close().await.unwrap_err();
    assert_eq!(err.code, ErrorCode::ContractViolation);
    assert!(!connection.is_closed());
}

#[tokio::test]
async fn test_copy_aliases_block_connections() {
    let provisioner = Arc::new(RecordingProvisioner::default());
    let mut ctx = context_with(provisioner.clone());
    relational_mut(&mut ctx).set_retain_connection(true);

    let held = lease(
        relational(&ctx)
            .acquire_connection(&request("sales"))
            .await
            .unwrap(),
    );
    let key = held.key().clone();

    let copy = ctx.copy();
    let copied = relational(&copy).block_connections();
    assert!(Arc::ptr_eq(
        &copied.block_connection(&key).unwrap(),
        held.connection()
    ));

    // Still locked by the original's node.
    let err = relational(&copy)
        .acquire_connection(&request("sales"))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::ContractViolation);

    drop(held);
    relational(&ctx).block_connections().unlock_all();
    let reused = lease(
        relational(&copy)
            .acquire_connection(&request("sales"))
            .await
            .unwrap(),
    );
    assert_eq!(provisioner.provisions(), 1);
    drop(reused);

    // New keys in the copy stay out of the original's map.
    let other = lease(
        relational(&copy)
            .acquire_connection(&request("hr"))
            .await
            .unwrap(),
    );
    assert_eq!(copied.len(), 2);
    assert_eq!(relational(&ctx).block_connections().len(), 1);
    drop(other);
}

#[tokio::test]
async fn test_one_shot_connection_without_retain() {
    let provisioner = Arc::new(RecordingProvisioner::default());
    let ctx = context_with(provisioner.clone());

    let acquired = relational(&ctx)
        .acquire_connection(&request("sales").with_commit_query("ignored"))
        .await
        .unwrap();
    assert!(matches!(acquired, AcquiredConnection::OneShot(_)));
    assert!(relational(&ctx).block_connections().is_empty());
}

#[tokio::test]
async fn test_failing_epilogue_still_closes_connection() {
    let provisioner = Arc::new(RecordingProvisioner::failing_on("INSERT INTO audit VALUES (1)"));
    let mut ctx = context_with(provisioner.clone());
    relational_mut(&mut ctx).set_retain_connection(true);
    let state = relational(&ctx);

    let held = lease(
        state
            .acquire_connection(
                &request("sales")
                    .with_commit_query("INSERT INTO audit VALUES (1)")
                    .with_rollback_query("DROP TABLE tmp_1"),
            )
            .await
            .unwrap(),
    );
    held.add_commit_query("UPDATE runs SET done = true");
    let connection = held.connection().clone();
    drop(held);
    state.block_connections().unlock_all();

    let err = connection.close().await.unwrap_err();
    assert_eq!(err.code, ErrorCode::EpilogueFailed);
    assert!(connection.is_closed());
    assert_eq!(
        calls(&provisioner.log)[1..],
        [
            "execute: INSERT INTO audit VALUES (1)",
            "statement.close",
            "connection.close",
        ]
    );
}

#[tokio::test]
async fn test_close_failure_is_swallowed() {
    let provisioner = Arc::new(RecordingProvisioner {
        fail_close: true,
        ..Default::default()
    });
    let mut ctx = context_with(provisioner.clone());
    relational_mut(&mut ctx).set_retain_connection(true);
    let state = relational(&ctx);

    drop(state.acquire_connection(&request("sales")).await.unwrap());
    state.block_connections().unlock_all();

    state.block_connections().close_all().await.unwrap();
    assert_eq!(calls(&provisioner.log).last().unwrap(), "connection.close");
}

#[tokio::test]
async fn test_closed_connection_is_reprovisioned() {
    let provisioner = Arc::new(RecordingProvisioner::default());
    let mut ctx = context_with(provisioner.clone());
    relational_mut(&mut ctx).set_retain_connection(true);
    let state = relational(&ctx);

    let first = lease(state.acquire_connection(&request("sales")).await.unwrap());
    let old = first.connection().clone();
    drop(first);
    state.block_connections().unlock_all();
    state.block_connections().close_all().await.unwrap();

    let second = lease(state.acquire_connection(&request("sales")).await.unwrap());
    assert!(!Arc::ptr_eq(&old, second.connection()));
    assert_eq!(provisioner.provisions(), 2);
}

#[tokio::test]
async fn test_provisioning_failure() {
    let provisioner = Arc::new(RecordingProvisioner {
        refuse: true,
        ..Default::default()
    });
    let mut ctx = context_with(provisioner.clone());
    relational_mut(&mut ctx).set_retain_connection(true);

    let err = relational(&ctx)
        .acquire_connection(&request("sales"))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::ProvisioningFailed);
    assert!(err.message.contains("connection refused"));
}

#[tokio::test]
async fn test_relational_block_closes_connections_on_failure() {
    let provisioner = Arc::new(RecordingProvisioner::default());
    let ctx = context_with(provisioner.clone());

    let result: conflux_error::Result<()> = ctx
        .relational_block(|block| async move {
            let held = lease(
                relational(&block)
                    .acquire_connection(&request("sales").with_rollback_query("DROP TABLE tmp_1"))
                    .await?,
            );
            drop(held);
            Err(ConfluxError::new(ErrorCode::StatementFailed, "node failed"))
        })
        .await;

    assert_eq!(result.unwrap_err().code, ErrorCode::StatementFailed);
    let log = calls(&provisioner.log);
    assert_eq!(log.last().unwrap(), "connection.close");
    assert!(!log.contains(&"execute: DROP TABLE tmp_1".to_string()));
    assert!(!relational(&ctx).retain_connection());
}

#[tokio::test]
async fn test_relational_block_unlocks_on_success() {
    let provisioner = Arc::new(RecordingProvisioner::default());
    let ctx = context_with(provisioner.clone());

    let connection = ctx
        .relational_block(|block| async move {
            let held = lease(relational(&block).acquire_connection(&request("sales")).await?);
            Ok(held.connection().clone())
        })
        .await
        .unwrap();

    assert_eq!(connection.state(), BlockConnectionState::Available);
    assert!(!connection.is_closed());
}

#[tokio::test]
async fn test_isolated_block_connections_restore_previous_context() {
    let provisioner = Arc::new(RecordingProvisioner::default());
    let mut ctx = context_with(provisioner.clone());
    relational_mut(&mut ctx).set_retain_connection(false);
    let outer = relational(&ctx).block_connections().clone();

    let inner_connection = ctx
        .isolated_block_connections(|c| {
            Box::pin(async move {
                assert!(relational(c).retain_connection());
                let held = lease(relational(c).acquire_connection(&request("sales")).await?);
                Ok(held.connection().clone())
            })
        })
        .await
        .unwrap();

    let state = relational(&ctx);
    assert!(Arc::ptr_eq(state.block_connections(), &outer));
    assert!(!state.retain_connection());
    assert!(outer.is_empty());

    for _ in 0..100 {
        if inner_connection.is_closed() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(inner_connection.is_closed());
    assert_eq!(calls(&provisioner.log).last().unwrap(), "connection.close");
}
