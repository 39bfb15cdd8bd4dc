//! Tests for the position acquisition flow
//!
//! These drive a `Geolocator` through a `MockLocationService` and cover:
//! - One-shot requests: success, timeout, cancellation, teardown
//! - Listening sessions: start/stop rules, cached fixes, partial updates
//! - Error propagation to pending requests and subscribers

use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;

use geolocator::config::GeolocatorConfig;
use geolocator::geocode::create_geocoding_service;
use geolocator::mock::{MockLocationService, ServiceCall};
use geolocator::{
    AuthorizationStatus, CancelToken, GeolocationError, Geolocator, ListenerSettings,
    PositionEvent, RawFix, ServiceFailure,
};

fn setup() -> (MockLocationService, Geolocator) {
    let service = MockLocationService::new();
    let geolocator = Geolocator::new(Arc::new(service.clone()));
    (service, geolocator)
}

/// Lets spawned tasks run until they block
async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

async fn wait_for_session(service: &MockLocationService) {
    for _ in 0..100 {
        if service.active_sessions() > 0 {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("single update session never started");
}

fn single_update_starts(service: &MockLocationService) -> usize {
    service.call_count(|call| matches!(call, ServiceCall::StartSingleUpdate(_)))
}

fn single_update_stops(service: &MockLocationService) -> usize {
    service.call_count(|call| matches!(call, ServiceCall::StopSingleUpdate(_)))
}

#[tokio::test]
async fn test_one_shot_resolves_with_accurate_fix() {
    let (service, geolocator) = setup();

    let request = {
        let geolocator = geolocator.clone();
        tokio::spawn(async move {
            geolocator
                .get_position(Some(Duration::from_secs(30)), None, false)
                .await
        })
    };
    wait_for_session(&service).await;

    service.push_fix(RawFix::new(41.0, -87.0, 500.0));
    service.push_fix(
        RawFix::new(41.8781, -87.6298, 15.0)
            .with_altitude(181.0, 4.0)
            .with_speed(0.0),
    );

    let position = request.await.unwrap().unwrap();
    assert_eq!(position.coordinates(), Some((41.8781, -87.6298)));
    assert_eq!(position.accuracy(), Some(15.0));
    assert_eq!(position.altitude(), Some(181.0));
    assert_eq!(position.speed(), Some(0.0));

    // The temporary session is gone and listening was never started
    assert_eq!(service.active_sessions(), 0);
    assert_eq!(single_update_starts(&service), 1);
    assert_eq!(single_update_stops(&service), 1);
    assert!(!geolocator.is_listening());
    assert!(!service.is_updating());
}

#[tokio::test(start_paused = true)]
async fn test_one_shot_times_out() {
    let (service, geolocator) = setup();

    let request = {
        let geolocator = geolocator.clone();
        tokio::spawn(async move {
            geolocator
                .get_position(Some(Duration::from_secs(5)), None, false)
                .await
        })
    };
    wait_for_session(&service).await;

    // Not accurate enough to satisfy the request
    service.push_fix(RawFix::new(41.0, -87.0, 400.0));

    assert_eq!(request.await.unwrap(), Err(GeolocationError::Timeout));
    assert_eq!(service.active_sessions(), 0);
    assert_eq!(single_update_stops(&service), 1);
}

#[tokio::test(start_paused = true)]
async fn test_one_shot_returns_best_fix_on_timeout_when_configured() {
    let service = MockLocationService::new();
    let config = GeolocatorConfig {
        desired_accuracy: 10.0,
        accept_best_on_timeout: true,
        ..Default::default()
    };
    let geolocator = Geolocator::with_config(
        Arc::new(service.clone()),
        create_geocoding_service(),
        &config,
    );

    let request = {
        let geolocator = geolocator.clone();
        tokio::spawn(async move {
            geolocator
                .get_position(Some(Duration::from_secs(5)), None, false)
                .await
        })
    };
    wait_for_session(&service).await;

    service.push_fix(RawFix::new(1.0, 1.0, 90.0));
    service.push_fix(RawFix::new(2.0, 2.0, 45.0));
    service.push_fix(RawFix::new(3.0, 3.0, 300.0));

    let position = request.await.unwrap().unwrap();
    assert_eq!(position.coordinates(), Some((2.0, 2.0)));
    assert_eq!(position.accuracy(), Some(45.0));
}

#[tokio::test]
async fn test_cancel_wins_over_late_fix() {
    let (service, geolocator) = setup();
    let cancel = CancelToken::new();

    let request = {
        let geolocator = geolocator.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { geolocator.get_position(None, Some(cancel), false).await })
    };
    wait_for_session(&service).await;

    cancel.cancel();
    for _ in 0..100 {
        if request.is_finished() {
            break;
        }
        tokio::task::yield_now().await;
    }

    // A fix that shows up after cancellation changes nothing
    service.push_fix(RawFix::new(41.0, -87.0, 5.0));

    assert_eq!(request.await.unwrap(), Err(GeolocationError::Cancelled));
    assert_eq!(service.active_sessions(), 0);
}

#[tokio::test]
async fn test_already_cancelled_token_skips_service() {
    let (service, geolocator) = setup();
    let cancel = CancelToken::new();
    cancel.cancel();

    let result = geolocator.get_position(None, Some(cancel), false).await;

    assert_eq!(result, Err(GeolocationError::Cancelled));
    assert_eq!(single_update_starts(&service), 0);
}

#[tokio::test(start_paused = true)]
async fn test_dropped_request_tears_down_session() {
    let (service, geolocator) = setup();

    let outer = tokio::time::timeout(
        Duration::from_secs(1),
        geolocator.get_position(None, None, false),
    )
    .await;

    assert!(outer.is_err());
    assert_eq!(service.active_sessions(), 0);
    assert_eq!(single_update_stops(&service), 1);
}

#[tokio::test]
async fn test_one_shot_network_failure() {
    let (service, geolocator) = setup();

    let request = {
        let geolocator = geolocator.clone();
        tokio::spawn(async move { geolocator.get_position(None, None, false).await })
    };
    wait_for_session(&service).await;

    service.fail(ServiceFailure::Network);

    assert!(matches!(
        request.await.unwrap(),
        Err(GeolocationError::PositionUnavailable(_))
    ));
    assert_eq!(service.active_sessions(), 0);
}

#[tokio::test]
async fn test_unauthorized_fails_before_service() {
    let (service, geolocator) = setup();
    service.set_authorization(AuthorizationStatus::Denied);

    assert_eq!(
        geolocator.get_position(None, None, false).await,
        Err(GeolocationError::Unauthorized)
    );
    assert_eq!(
        geolocator.get_last_known_position().await,
        Err(GeolocationError::Unauthorized)
    );
    assert_eq!(
        geolocator
            .start_listening(Duration::from_secs(1), 0.0, false, None)
            .await,
        Err(GeolocationError::Unauthorized)
    );
    assert!(service.calls().is_empty());
}

#[tokio::test]
async fn test_double_start_is_rejected() {
    let (service, geolocator) = setup();

    geolocator
        .start_listening(Duration::from_secs(1), 5.0, false, None)
        .await
        .unwrap();
    let second = geolocator
        .start_listening(Duration::from_secs(1), 5.0, false, None)
        .await;

    assert!(matches!(second, Err(GeolocationError::InvalidOperation(_))));
    assert!(geolocator.is_listening());
    assert_eq!(
        service.call_count(|call| *call == ServiceCall::StartUpdatingLocation),
        1
    );
}

#[tokio::test]
async fn test_stop_when_idle_is_a_no_op() {
    let (service, geolocator) = setup();

    assert_eq!(geolocator.stop_listening().await, Ok(true));
    assert!(service.calls().is_empty());
}

#[tokio::test]
async fn test_listening_returns_cached_fix_without_new_session() {
    let (service, geolocator) = setup();
    geolocator
        .start_listening(Duration::from_secs(1), 0.0, false, None)
        .await
        .unwrap();

    service.push_fix(RawFix::new(10.0, 20.0, 30.0));

    let position = geolocator.get_position(None, None, false).await.unwrap();
    assert_eq!(position.coordinates(), Some((10.0, 20.0)));
    assert_eq!(single_update_starts(&service), 0);
}

#[tokio::test]
async fn test_stop_clears_cached_position() {
    let (service, geolocator) = setup();
    geolocator
        .start_listening(Duration::from_secs(1), 0.0, false, None)
        .await
        .unwrap();
    service.push_fix(RawFix::new(10.0, 20.0, 30.0));
    geolocator.stop_listening().await.unwrap();

    assert!(!geolocator.is_listening());
    assert!(!service.is_updating());

    let request = {
        let geolocator = geolocator.clone();
        tokio::spawn(async move {
            geolocator
                .get_position(Some(Duration::from_secs(30)), None, false)
                .await
        })
    };
    wait_for_session(&service).await;
    service.push_fix(RawFix::new(11.0, 21.0, 8.0));

    let position = request.await.unwrap().unwrap();
    assert_eq!(position.coordinates(), Some((11.0, 21.0)));
    assert_eq!(single_update_starts(&service), 1);
}

#[tokio::test]
async fn test_partial_fix_keeps_previous_readings() {
    let (service, geolocator) = setup();
    let mut events = geolocator.subscribe();
    geolocator
        .start_listening(Duration::from_secs(1), 0.0, true, None)
        .await
        .unwrap();

    service.push_fix(
        RawFix::new(41.0, -87.0, 10.0)
            .with_altitude(200.0, 5.0)
            .with_speed(3.0)
            .with_course(90.0),
    );
    service.push_fix(RawFix::new(41.001, -87.001, 12.0));

    let position = geolocator.get_position(None, None, false).await.unwrap();
    assert_eq!(position.coordinates(), Some((41.001, -87.001)));
    assert_eq!(position.accuracy(), Some(12.0));
    assert_eq!(position.altitude(), Some(200.0));
    assert_eq!(position.speed(), Some(3.0));
    assert_eq!(position.heading(), Some(90.0));

    let first = events.recv().await.unwrap();
    let second = events.recv().await.unwrap();
    assert!(matches!(first, PositionEvent::PositionChanged(p) if p.latitude == 41.0));
    assert_eq!(second, PositionEvent::PositionChanged(position));
}

#[tokio::test]
async fn test_pending_requests_share_first_update() {
    let (service, geolocator) = setup();
    geolocator
        .start_listening(Duration::from_secs(1), 0.0, false, None)
        .await
        .unwrap();

    let waiters = {
        let geolocator = geolocator.clone();
        tokio::spawn(async move {
            let requests = (0..3).map(|_| geolocator.get_position(None, None, false));
            join_all(requests).await
        })
    };
    settle().await;

    service.push_fix(RawFix::new(5.0, 6.0, 7.0));

    let results = waiters.await.unwrap();
    assert_eq!(results.len(), 3);
    for result in results {
        assert_eq!(result.unwrap().coordinates(), Some((5.0, 6.0)));
    }
    assert_eq!(single_update_starts(&service), 0);
}

#[tokio::test]
async fn test_pending_request_cancelled_while_listening() {
    let (_service, geolocator) = setup();
    geolocator
        .start_listening(Duration::from_secs(1), 0.0, false, None)
        .await
        .unwrap();
    let cancel = CancelToken::new();

    let request = {
        let geolocator = geolocator.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { geolocator.get_position(None, Some(cancel), false).await })
    };
    settle().await;
    cancel.cancel();

    assert_eq!(request.await.unwrap(), Err(GeolocationError::Cancelled));
    assert!(geolocator.is_listening());
}

#[tokio::test(start_paused = true)]
async fn test_pending_request_times_out_while_listening() {
    let (service, geolocator) = setup();
    geolocator
        .start_listening(Duration::from_secs(1), 0.0, false, None)
        .await
        .unwrap();

    let result = geolocator
        .get_position(Some(Duration::from_secs(2)), None, false)
        .await;

    assert_eq!(result, Err(GeolocationError::Timeout));
    assert!(geolocator.is_listening());
    assert!(service.is_updating());
    assert_eq!(single_update_starts(&service), 0);
}

#[tokio::test(start_paused = true)]
async fn test_stop_listening_releases_pending_request() {
    let (service, geolocator) = setup();
    let mut events = geolocator.subscribe();
    geolocator
        .start_listening(Duration::from_secs(1), 0.0, false, None)
        .await
        .unwrap();

    let request = {
        let geolocator = geolocator.clone();
        tokio::spawn(async move { geolocator.get_position(None, None, false).await })
    };
    settle().await;

    geolocator.stop_listening().await.unwrap();
    service.push_fix(RawFix::new(1.0, 1.0, 1.0));

    let outcome = tokio::time::timeout(Duration::from_secs(3600), request)
        .await
        .expect("waiter should be released by stop_listening");
    assert_eq!(outcome.unwrap(), Err(GeolocationError::Cancelled));
    assert_eq!(
        events.recv().await.unwrap(),
        PositionEvent::PositionError(GeolocationError::Cancelled)
    );

    // Stopping again while idle tells nobody anything
    geolocator.stop_listening().await.unwrap();
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_revoked_authorization_stops_listening() {
    let (service, geolocator) = setup();
    let mut events = geolocator.subscribe();
    geolocator
        .start_listening(Duration::from_secs(1), 0.0, false, None)
        .await
        .unwrap();

    let request = {
        let geolocator = geolocator.clone();
        tokio::spawn(async move { geolocator.get_position(None, None, false).await })
    };
    settle().await;

    service.set_authorization(AuthorizationStatus::Denied);

    assert_eq!(request.await.unwrap(), Err(GeolocationError::Unauthorized));
    assert!(!geolocator.is_listening());
    assert!(!service.is_updating());
    assert_eq!(
        events.recv().await.unwrap(),
        PositionEvent::PositionError(GeolocationError::Unauthorized)
    );

    // No more updates once the session is torn down
    service.push_fix(RawFix::new(1.0, 1.0, 1.0));
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_network_failure_stops_listening() {
    let (service, geolocator) = setup();
    let mut events = geolocator.subscribe();
    geolocator
        .start_listening(Duration::from_secs(1), 0.0, false, None)
        .await
        .unwrap();

    service.fail(ServiceFailure::Network);

    assert!(!geolocator.is_listening());
    assert!(matches!(
        events.recv().await.unwrap(),
        PositionEvent::PositionError(GeolocationError::PositionUnavailable(_))
    ));
}

#[tokio::test]
async fn test_new_session_without_settings_resets_to_defaults() {
    let (service, geolocator) = setup();
    let custom = ListenerSettings {
        listen_for_significant_changes: true,
        allow_background_updates: true,
        ..Default::default()
    };

    geolocator
        .start_listening(Duration::from_secs(1), 0.0, false, Some(custom.clone()))
        .await
        .unwrap();
    geolocator.stop_listening().await.unwrap();
    service.clear_calls();

    geolocator
        .start_listening(Duration::from_secs(1), 0.0, false, None)
        .await
        .unwrap();

    let calls = service.calls();
    assert!(calls.contains(&ServiceCall::ApplyListenerSettings(ListenerSettings::default())));
    assert!(calls.contains(&ServiceCall::StartUpdatingLocation));
    assert!(!calls.contains(&ServiceCall::StartMonitoringSignificantChanges));
}
