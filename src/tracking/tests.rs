use std::sync::Arc;
use std::time::Duration;

use geo::Point;
use serde_json::Value;
use time::OffsetDateTime;
use tokio::sync::{mpsc, watch};

use super::testing::{CountingBackground, RecordingGateway};
use super::*;
use crate::config::TrackingConfig;
use crate::connection::testing::{Open, Peer, ScriptedConnector};
use crate::connection::{ConnectionManager, ConnectionState};
use crate::gateway::StaticCredentials;
use crate::sources::{AcquisitionError, AuthorizationState, ManualPositionSource, PositionFeed};

/// 0.00044966 degrees of latitude is ~50 m
const STEP_50M: f64 = 0.00044966;

struct Rig {
    session: TrackingSession<ManualPositionSource, RecordingGateway>,
    feed: PositionFeed,
    gateway: Arc<RecordingGateway>,
    background: Arc<CountingBackground>,
    connector: ScriptedConnector,
    peers: mpsc::UnboundedReceiver<Peer>,
}

fn rig(authorization: AuthorizationState, outcomes: Vec<Open>) -> Rig {
    let (source, feed) = ManualPositionSource::new(authorization);
    let (connector, peers) = ScriptedConnector::new(outcomes);
    let mut config = TrackingConfig::default();
    config.publisher.agent_id = "rider-7".to_string();

    let connection = ConnectionManager::spawn(
        connector.clone(),
        Arc::new(StaticCredentials::new("t0k3n")),
        config.connection.clone(),
    );
    let gateway = Arc::new(RecordingGateway::default());
    let background = Arc::new(CountingBackground::default());

    let mut session = TrackingSession::new(source, connection, gateway.clone(), &config);
    session.background(background.clone());

    Rig {
        session,
        feed,
        gateway,
        background,
        connector,
        peers,
    }
}

fn sample(lat_offset: f64) -> PositionSample {
    PositionSample::basic(
        Point::new(126.9780, 37.5665 + lat_offset),
        OffsetDateTime::now_utc(),
        10.0,
    )
}

async fn wait_for(
    rx: &mut watch::Receiver<SessionSnapshot>,
    f: impl FnMut(&SessionSnapshot) -> bool,
) -> SessionSnapshot {
    rx.wait_for(f).await.expect("session alive").clone()
}

#[tokio::test(start_paused = true)]
async fn first_sample_starts_at_zero_distance() {
    let mut rig = rig(AuthorizationState::WhenInUse, vec![]);
    let mut snapshots = rig.session.subscribe();

    rig.session.start().expect("started");
    assert!(rig.session.is_active());
    assert!(rig.feed.push(sample(0.0)));

    let snapshot = wait_for(&mut snapshots, |s| s.accepted_samples == 1).await;
    assert!(snapshot.is_active);
    assert_eq!(0.0, snapshot.total_distance_m);
    assert_eq!(0.0, snapshot.current_speed_kmh);
    assert_eq!(
        Some(37.5665),
        snapshot.current_position.map(|p| p.latitude())
    );
    assert!(snapshot.started_at.is_some());
}

#[tokio::test(start_paused = true)]
async fn second_sample_adds_distance_and_speed() {
    let mut rig = rig(AuthorizationState::Always, vec![]);
    let mut snapshots = rig.session.subscribe();
    rig.session.start().expect("started");

    rig.feed.push(sample(0.0));
    wait_for(&mut snapshots, |s| s.accepted_samples == 1).await;
    rig.feed.push(sample(STEP_50M).speed(5.0));

    let snapshot = wait_for(&mut snapshots, |s| s.accepted_samples == 2).await;
    assert!(
        (snapshot.total_distance_m - 50.0).abs() < 0.5,
        "{}",
        snapshot.total_distance_m
    );
    assert!((snapshot.current_speed_kmh - 18.0).abs() < 1e-9);
    assert!((snapshot.average_speed_kmh - 18.0).abs() < 1e-9);
    assert!((snapshot.max_speed_kmh - 18.0).abs() < 1e-9);
}

#[tokio::test(start_paused = true)]
async fn rejected_samples_do_not_move_the_session() {
    let mut rig = rig(AuthorizationState::WhenInUse, vec![]);
    let mut snapshots = rig.session.subscribe();
    rig.session.start().expect("started");

    rig.feed.push(sample(0.0));
    let mut inaccurate = sample(STEP_50M);
    inaccurate.accuracy = 80.0;
    rig.feed.push(inaccurate);
    // ~111 m away
    rig.feed.push(sample(0.001));

    let snapshot = wait_for(&mut snapshots, |s| s.rejected_samples == 2).await;
    assert_eq!(1, snapshot.accepted_samples);
    assert_eq!(0.0, snapshot.total_distance_m);
}

#[tokio::test(start_paused = true)]
async fn stop_is_idempotent() {
    let mut rig = rig(AuthorizationState::WhenInUse, vec![]);
    let mut snapshots = rig.session.subscribe();
    rig.session.start().expect("started");
    rig.feed.push(sample(0.0));
    wait_for(&mut snapshots, |s| s.accepted_samples == 1).await;

    rig.session.stop().await;

    let sent = rig.gateway.calls();
    assert!(!sent.is_empty());
    assert_eq!("rider-7", sent[sent.len() - 1].agent_id);
    assert!(!rig.session.is_active());
    assert!(!rig.feed.is_running());
    assert_eq!(ConnectionState::Disconnected, rig.session.connection().status().state);
    assert_eq!(1, rig.background.begun());
    assert_eq!(1, rig.background.ended());

    let snapshot = rig.session.snapshot();
    assert!(!snapshot.is_active);
    assert!(snapshot.ended_at.is_some());
    assert_eq!(1, snapshot.accepted_samples);

    rig.session.stop().await;
    tokio::time::sleep(Duration::from_secs(60)).await;

    assert_eq!(sent.len(), rig.gateway.calls().len());
    assert_eq!(1, rig.background.ended());
}

#[tokio::test(start_paused = true)]
async fn start_twice_is_a_no_op() {
    let mut rig = rig(AuthorizationState::WhenInUse, vec![]);

    rig.session.start().expect("started");
    rig.session.start().expect("still started");

    assert_eq!(1, rig.background.begun());
    assert!(rig.session.is_active());
}

#[tokio::test(start_paused = true)]
async fn reset_keeps_tracking() {
    let mut rig = rig(AuthorizationState::WhenInUse, vec![]);
    let mut snapshots = rig.session.subscribe();
    rig.session.start().expect("started");

    rig.feed.push(sample(0.0));
    rig.feed.push(sample(STEP_50M).speed(5.0));
    wait_for(&mut snapshots, |s| s.accepted_samples == 2).await;

    rig.session.reset();
    let snapshot = wait_for(&mut snapshots, |s| s.accepted_samples == 0).await;
    assert!(snapshot.is_active);
    assert_eq!(0.0, snapshot.total_distance_m);
    assert_eq!(0.0, snapshot.max_speed_kmh);
    assert!(snapshot.started_at.is_some());
    assert!(rig.session.is_active());

    // history is gone, so the next fix is a first fix again
    rig.feed.push(sample(2.0 * STEP_50M));
    let snapshot = wait_for(&mut snapshots, |s| s.accepted_samples == 1).await;
    assert_eq!(0.0, snapshot.total_distance_m);
}

#[tokio::test(start_paused = true)]
async fn denied_source_does_not_start() {
    let mut rig = rig(AuthorizationState::Denied, vec![]);

    let result = rig.session.start();

    assert_eq!(
        Err(SessionError::Acquisition(AcquisitionError::PermissionDenied)),
        result
    );
    assert!(!rig.session.is_active());
    assert_eq!(0, rig.background.begun());
    assert_eq!(0, rig.connector.opens());
    assert_eq!(
        Some(SessionError::Acquisition(AcquisitionError::PermissionDenied)),
        rig.session.snapshot().last_error
    );
}

#[tokio::test(start_paused = true)]
async fn revoked_authorization_surfaces_once() {
    let mut rig = rig(AuthorizationState::WhenInUse, vec![]);
    let mut snapshots = rig.session.subscribe();
    rig.session.start().expect("started");

    rig.feed.set_authorization(AuthorizationState::Denied);
    let snapshot = wait_for(&mut snapshots, |s| s.last_error.is_some()).await;
    assert_eq!(
        Some(SessionError::Acquisition(AcquisitionError::PermissionDenied)),
        snapshot.last_error
    );
    assert!(snapshot.is_active);
    assert!(!rig.feed.push(sample(0.0)));

    rig.feed.set_authorization(AuthorizationState::WhenInUse);
    wait_for(&mut snapshots, |s| s.last_error.is_none()).await;
    assert!(rig.feed.push(sample(0.0)));
}

#[tokio::test(start_paused = true)]
async fn source_errors_are_reported() {
    let mut rig = rig(AuthorizationState::Always, vec![]);
    let mut snapshots = rig.session.subscribe();
    rig.session.start().expect("started");

    rig.feed.fail(AcquisitionError::PositionUnavailable);

    let snapshot = wait_for(&mut snapshots, |s| s.last_error.is_some()).await;
    assert_eq!(
        Some(SessionError::Acquisition(AcquisitionError::PositionUnavailable)),
        snapshot.last_error
    );
    assert!(rig.session.is_active());
}

#[tokio::test(start_paused = true)]
async fn exhausted_reconnects_surface_as_transport_error() {
    let mut rig = rig(AuthorizationState::Always, vec![]);
    let mut snapshots = rig.session.subscribe();
    rig.session.start().expect("started");

    let snapshot = wait_for(&mut snapshots, |s| s.last_error.is_some()).await;

    assert!(matches!(
        snapshot.last_error,
        Some(SessionError::Transport(_))
    ));
    assert!(snapshot.is_active);
    assert_eq!(6, rig.connector.opens());
}

#[tokio::test(start_paused = true)]
async fn accepted_samples_reach_the_socket_in_order() {
    let mut rig = rig(AuthorizationState::WhenInUse, vec![Open::Accept]);
    let mut snapshots = rig.session.subscribe();
    rig.session.start().expect("started");

    let mut peer = rig.peers.recv().await.expect("socket opened");
    rig.session
        .connection()
        .watch()
        .wait_for(|s| s.state.is_connected())
        .await
        .expect("connected");

    rig.feed.push(sample(0.0));
    rig.feed.push(sample(STEP_50M).speed(4.0));
    wait_for(&mut snapshots, |s| s.accepted_samples == 2).await;

    let mut latitudes = vec![];
    for _ in 0..2 {
        let text = peer.outbound.recv().await.expect("frame");
        let frame: Value = serde_json::from_str(&text).expect("json");
        assert_eq!("LOCATION_UPDATE", frame["type"]);
        assert_eq!("rider-7", frame["data"]["agentId"]);
        latitudes.push(frame["data"]["latitude"].as_f64().expect("latitude"));
    }
    assert_eq!(vec![37.5665, 37.5665 + STEP_50M], latitudes);
    assert_eq!(
        Some("t0k3n".to_string()),
        rig.connector.requests()[0].token
    );

    rig.session.stop().await;
    assert_eq!(ConnectionState::Disconnected, rig.session.connection().status().state);
}

#[tokio::test(start_paused = true)]
async fn fallback_runs_during_the_session() {
    let mut rig = rig(AuthorizationState::WhenInUse, vec![]);
    let mut snapshots = rig.session.subscribe();
    rig.session.start().expect("started");

    rig.feed.push(sample(0.0));
    wait_for(&mut snapshots, |s| s.accepted_samples == 1).await;
    // just past the first tick, so the timer task has run
    tokio::time::sleep(Duration::from_millis(10_001)).await;

    let calls = rig.gateway.calls();
    assert_eq!(1, calls.len());
    assert_eq!(37.5665, calls[0].latitude);
}

#[tokio::test(start_paused = true)]
async fn restart_begins_a_fresh_run() {
    let mut rig = rig(AuthorizationState::WhenInUse, vec![]);
    let mut snapshots = rig.session.subscribe();

    rig.session.start().expect("started");
    rig.feed.push(sample(0.0));
    rig.feed.push(sample(STEP_50M));
    wait_for(&mut snapshots, |s| s.accepted_samples == 2).await;
    rig.session.stop().await;

    rig.session.start().expect("restarted");
    let snapshot = rig.session.snapshot();
    assert!(snapshot.is_active);
    assert_eq!(0, snapshot.accepted_samples);
    assert_eq!(0.0, snapshot.total_distance_m);
    assert_eq!(None, snapshot.ended_at);
    assert_eq!(None, rig.session.publisher().last_update());
    assert_eq!(2, rig.background.begun());
}
