//! Connection supervisor retry policy, driven on a paused clock.
//!
//! Run with: `cargo test --test supervisor_tests`
#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use common::{Call, MockChannel, MockConnector};
use weather_relay::broker::{ConnectionSupervisor, Connector, SupervisorState, Topology};
use weather_relay::AppError;

const MAX_RETRIES: u32 = 5;
const RETRY_DELAY: Duration = Duration::from_secs(5);
const STABLE_AFTER: Duration = Duration::from_secs(30);

fn supervisor(connector: Arc<MockConnector>) -> ConnectionSupervisor {
    ConnectionSupervisor::new(
        connector as Arc<dyn Connector>,
        Topology::default(),
        MAX_RETRIES,
        RETRY_DELAY,
    )
}

#[tokio::test(start_paused = true)]
async fn test_exhausting_retries_is_fatal() {
    let connector = MockConnector::always_failing();
    let supervisor = supervisor(Arc::clone(&connector));
    let sessions = AtomicU32::new(0);

    let started = Instant::now();
    let err = supervisor
        .run(|_channel| {
            sessions.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        })
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::RetriesExhausted(MAX_RETRIES)));
    assert_eq!(connector.dials(), MAX_RETRIES);
    assert_eq!(sessions.load(Ordering::SeqCst), 0);
    // No sleep after the final failure.
    assert_eq!(started.elapsed(), RETRY_DELAY * (MAX_RETRIES - 1));
    assert_eq!(supervisor.state(), SupervisorState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_recovers_after_transient_dial_failures() {
    let channel = MockChannel::idle();
    let connector = MockConnector::new(vec![None, None, Some(Arc::clone(&channel))]);
    let supervisor = supervisor(Arc::clone(&connector));

    let result = supervisor.run(|_channel| async { Ok(()) }).await;

    assert!(result.is_ok());
    assert_eq!(connector.dials(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_topology_is_declared_on_every_session() {
    let first = MockChannel::idle();
    let second = MockChannel::idle();
    let connector = MockConnector::new(vec![Some(Arc::clone(&first)), Some(Arc::clone(&second))]);
    let supervisor = supervisor(connector);
    let sessions = AtomicU32::new(0);

    let result = supervisor
        .run(|_channel| {
            let n = sessions.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(AppError::Disconnected("channel closed".to_string()))
                } else {
                    Ok(())
                }
            }
        })
        .await;

    assert!(result.is_ok());
    for channel in [first, second] {
        assert!(
            channel
                .calls()
                .contains(&Call::DeclareQueue(
                    "logs_queue".to_string(),
                    Some("weather.dlx".to_string())
                ))
        );
    }
}

#[tokio::test(start_paused = true)]
async fn test_sessions_lost_right_after_ready_exhaust_retries() {
    let script = (0..MAX_RETRIES * 2).map(|_| Some(MockChannel::idle())).collect();
    let connector = MockConnector::new(script);
    let supervisor = supervisor(Arc::clone(&connector));
    let sessions = AtomicU32::new(0);

    let err = supervisor
        .run(|_channel| {
            sessions.fetch_add(1, Ordering::SeqCst);
            async { Err(AppError::Disconnected("channel closed".to_string())) }
        })
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::RetriesExhausted(MAX_RETRIES)));
    assert_eq!(connector.dials(), MAX_RETRIES);
    assert_eq!(sessions.load(Ordering::SeqCst), MAX_RETRIES);
}

#[tokio::test(start_paused = true)]
async fn test_short_lived_sessions_keep_counting() {
    let script = (0..MAX_RETRIES * 2).map(|_| Some(MockChannel::idle())).collect();
    let connector = MockConnector::new(script);
    let supervisor = supervisor(Arc::clone(&connector)).with_stable_after(STABLE_AFTER);

    let err = supervisor
        .run(|_channel| async {
            tokio::time::sleep(STABLE_AFTER / 2).await;
            Err(AppError::Disconnected("channel closed".to_string()))
        })
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::RetriesExhausted(MAX_RETRIES)));
    assert_eq!(connector.dials(), MAX_RETRIES);
}

#[tokio::test(start_paused = true)]
async fn test_stable_session_resets_the_failure_count() {
    let total_sessions = MAX_RETRIES * 2;
    let script = (0..=total_sessions)
        .map(|_| Some(MockChannel::idle()))
        .collect();
    let connector = MockConnector::new(script);
    let supervisor = supervisor(Arc::clone(&connector)).with_stable_after(STABLE_AFTER);
    let sessions = AtomicU32::new(0);

    let result = supervisor
        .run(|_channel| {
            let n = sessions.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < total_sessions {
                    tokio::time::sleep(STABLE_AFTER).await;
                    Err(AppError::Disconnected("channel closed".to_string()))
                } else {
                    Ok(())
                }
            }
        })
        .await;

    assert!(result.is_ok());
    assert_eq!(connector.dials(), total_sessions + 1);
    assert_eq!(supervisor.connection_state().retries(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_topology_failure_counts_as_connection_failure() {
    let channels: Vec<_> = (0..MAX_RETRIES).map(|_| MockChannel::idle()).collect();
    for channel in &channels {
        channel.fail_declare.store(true, Ordering::SeqCst);
    }
    let connector = MockConnector::new(channels.into_iter().map(Some).collect());
    let supervisor = supervisor(Arc::clone(&connector));

    let err = supervisor
        .run(|_channel| async { Ok(()) })
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::RetriesExhausted(_)));
    assert_eq!(connector.dials(), MAX_RETRIES);
}

#[tokio::test(start_paused = true)]
async fn test_non_connection_error_is_not_retried() {
    let connector = MockConnector::new(vec![Some(MockChannel::idle()), Some(MockChannel::idle())]);
    let supervisor = supervisor(Arc::clone(&connector));

    let err = supervisor
        .run(|_channel| async { Err(AppError::Internal("bug".to_string())) })
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Internal(_)));
    assert_eq!(connector.dials(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_interrupts_the_retry_delay() {
    let connector = MockConnector::always_failing();
    let shutdown = CancellationToken::new();
    let supervisor = supervisor(Arc::clone(&connector)).with_shutdown(shutdown.clone());

    let canceller = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(7)).await;
        canceller.cancel();
    });

    let result = supervisor.run(|_channel| async { Ok(()) }).await;

    assert!(result.is_ok());
    assert_eq!(connector.dials(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_session_receives_a_ready_channel() {
    let channel = MockChannel::idle();
    let connector = MockConnector::new(vec![Some(Arc::clone(&channel))]);
    let supervisor = supervisor(connector);
    let state = supervisor.connection_state();

    let result = supervisor
        .run(|_channel| {
            let ready = state.is_ready();
            async move {
                assert!(ready);
                Ok(())
            }
        })
        .await;

    assert!(result.is_ok());
    assert_eq!(supervisor.state(), SupervisorState::Disconnected);
}
