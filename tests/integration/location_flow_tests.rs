// ========================================
// tests/integration/location_flow_tests.rs
// ========================================
//! End-to-end tests for `/ws/vehicle-location`.

use crate::test_utils::{
    assert_silent, connect_location, eventually, next_json, send_json, spawn_server,
    test_settings,
};
use futures_util::SinkExt;
use ridelink_common::{LocationRequest, LocationUpdate};
use serde_json::json;
use std::time::Duration;

#[tokio::test]
async fn test_viewer_sees_producer_updates_and_removal() {
    let (addr, state) = spawn_server(test_settings()).await;
    let mut viewer = connect_location(addr).await;
    let mut driver = connect_location(addr).await;
    let locations = state.locations.clone();
    eventually(|| locations.peer_count() == 2, "both peers connected").await;

    send_json(
        &mut driver,
        &json!({"event": "update_location",
            "data": {"vehicleId": "taxi-7", "lat": 36.8065, "lng": 10.1815, "speed": 42.0, "bearing": 90.0}}),
    )
    .await;

    let ack = next_json(&mut driver, "location ack").await;
    assert_eq!(ack["event"], "location_ack");
    assert_eq!(ack["vehicleId"], "taxi-7");

    let seen = next_json(&mut viewer, "vehicle position").await;
    assert_eq!(seen["event"], "vehicle_position");
    assert_eq!(seen["data"]["vehicleId"], "taxi-7");
    assert_eq!(seen["data"]["type"], "CAR");
    assert_eq!(seen["data"]["speed"], 42.0);
    assert_eq!(seen["data"]["timestamp"], ack["timestamp"]);

    driver.close(None).await.unwrap();
    let removed = next_json(&mut viewer, "vehicle removed").await;
    assert_eq!(removed, json!({"event": "vehicle_removed", "data": {"vehicleId": "taxi-7"}}));
    assert_eq!(state.locations.vehicle_count(), 0);
}

#[tokio::test]
async fn test_late_viewer_gets_snapshot() {
    let (addr, state) = spawn_server(test_settings()).await;
    let mut driver = connect_location(addr).await;

    let request = LocationRequest::UpdateLocation(LocationUpdate::new("bus-1", 1.0, 2.0));
    send_json(&mut driver, &serde_json::to_value(&request).unwrap()).await;
    next_json(&mut driver, "location ack").await;
    assert_eq!(state.locations.vehicle_count(), 1);

    let mut late = connect_location(addr).await;
    let snapshot = next_json(&mut late, "snapshot").await;
    assert_eq!(snapshot["event"], "vehicle_position");
    assert_eq!(snapshot["data"]["vehicleId"], "bus-1");
    assert_eq!(snapshot["data"]["lat"], 1.0);
    assert_eq!(snapshot["data"]["lng"], 2.0);
    assert_silent(&mut late, 200).await;
}

#[tokio::test]
async fn test_bad_frames_get_error_events() {
    let (addr, state) = spawn_server(test_settings()).await;
    let mut ws = connect_location(addr).await;

    send_json(&mut ws, &json!("just a string")).await;
    assert_eq!(
        next_json(&mut ws, "malformed").await,
        json!({"event": "error", "message": "Invalid message format"})
    );

    send_json(&mut ws, &json!({"event": "update_location", "data": {"lat": 1.0, "lng": 2.0}})).await;
    assert_eq!(
        next_json(&mut ws, "missing fields").await,
        json!({"event": "error", "message": "Missing required fields: vehicleId, lat, lng"})
    );

    // Unknown events are ignored and the socket stays usable
    send_json(&mut ws, &json!({"event": "horn"})).await;
    send_json(&mut ws, &json!({"event": "subscribe"})).await;
    assert_silent(&mut ws, 200).await;
    assert_eq!(state.locations.vehicle_count(), 0);
    assert_eq!(state.locations.peer_count(), 1);
}

#[tokio::test]
async fn test_takeover_then_old_producer_leaves() {
    let (addr, state) = spawn_server(test_settings()).await;
    let mut viewer = connect_location(addr).await;
    let mut first = connect_location(addr).await;
    let mut second = connect_location(addr).await;
    let locations = state.locations.clone();
    eventually(|| locations.peer_count() == 3, "all peers connected").await;

    let update = |lat: f64| json!({"event": "update_location", "data": {"vehicleId": "v1", "lat": lat, "lng": 10.0}});
    send_json(&mut first, &update(1.0)).await;
    next_json(&mut first, "first ack").await;
    send_json(&mut second, &update(2.0)).await;
    next_json(&mut second, "second ack").await;

    assert_eq!(next_json(&mut viewer, "first position").await["data"]["lat"], 1.0);
    assert_eq!(next_json(&mut viewer, "second position").await["data"]["lat"], 2.0);

    first.close(None).await.unwrap();
    eventually(|| locations.peer_count() == 2, "first producer gone").await;
    assert_silent(&mut viewer, 200).await;
    assert_eq!(state.locations.position("v1").unwrap().lat, 2.0);
}

#[tokio::test]
async fn test_stale_sweep_evicts_silent_vehicle() {
    let mut settings = test_settings();
    settings.location.stale_after_secs = 1;
    settings.location.stale_sweep_secs = 1;
    let (addr, state) = spawn_server(settings).await;
    let mut viewer = connect_location(addr).await;
    let mut driver = connect_location(addr).await;
    let locations = state.locations.clone();
    eventually(|| locations.peer_count() == 2, "both peers connected").await;

    send_json(
        &mut driver,
        &json!({"event": "update_location", "data": {"vehicleId": "v1", "lat": 1.0, "lng": 1.0}}),
    )
    .await;
    next_json(&mut driver, "ack").await;
    next_json(&mut viewer, "position").await;
    assert!(state.locations.sweep_stale().is_empty());

    tokio::time::sleep(Duration::from_millis(1200)).await;
    assert_eq!(state.locations.sweep_stale(), vec!["v1".to_string()]);
    assert_eq!(
        next_json(&mut viewer, "removed").await,
        json!({"event": "vehicle_removed", "data": {"vehicleId": "v1"}})
    );
    // The producer is still connected but no longer owns the vehicle
    assert!(state.locations.producer_of("v1").is_none());
}
