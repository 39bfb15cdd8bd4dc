//! The position acquisition coordinator.
//!
//! `Geolocator` sits between callers and a platform [`LocationService`]. It
//! runs one-shot requests through short-lived single-update sessions, owns
//! the continuous listening session, caches the last fix while listening, and
//! fans updates and errors out to subscribers.
//!
//! The geolocator spawns nothing. It reacts to callbacks from the platform
//! (it is the platform's [`LocationDelegate`]) and resolves waiting futures
//! from there.

use log::{debug, info, warn};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use crate::cancel::CancelToken;
use crate::config::GeolocatorConfig;
use crate::error::{GeolocationError, Result};
use crate::geocode::{Address, Geocoder, create_geocoding_service};
use crate::position::{ListenerSettings, Position};
use crate::service::{
    AuthorizationStatus, LocationDelegate, LocationService, RawFix, ServiceFailure,
};
use crate::single_update::{self, SingleUpdateRequest, lock};

/// Buffered notifications per subscriber before it starts lagging
const EVENT_CAPACITY: usize = 64;

/// Notifications delivered to subscribers while listening
#[derive(Debug, Clone, PartialEq)]
pub enum PositionEvent {
    PositionChanged(Position),
    PositionError(GeolocationError),
}

#[derive(Debug, Default)]
struct SessionState {
    is_listening: bool,
    include_heading: bool,
    last_position: Option<Position>,
    listener_settings: Option<ListenerSettings>,
    deferring_updates: bool,
    desired_accuracy: f64,
}

struct Inner {
    service: Arc<dyn LocationService>,
    geocoder: Arc<dyn Geocoder>,
    events: broadcast::Sender<PositionEvent>,
    state: Mutex<SessionState>,
    accept_best_on_timeout: bool,
}

/// Unified access to device location.
///
/// Cloning is cheap; every clone drives the same session.
#[derive(Clone)]
pub struct Geolocator {
    inner: Arc<Inner>,
}

impl Geolocator {
    /// Creates a geolocator over `service` with default settings and the bundled geocoder
    pub fn new(service: Arc<dyn LocationService>) -> Self {
        Self::with_config(service, create_geocoding_service(), &GeolocatorConfig::default())
    }

    pub fn with_config(
        service: Arc<dyn LocationService>,
        geocoder: Arc<dyn Geocoder>,
        config: &GeolocatorConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let inner = Arc::new(Inner {
            service,
            geocoder,
            events,
            state: Mutex::new(SessionState {
                desired_accuracy: config.desired_accuracy,
                ..Default::default()
            }),
            accept_best_on_timeout: config.accept_best_on_timeout,
        });

        let delegate: Weak<Inner> = Arc::downgrade(&inner);
        inner.service.set_delegate(delegate);

        Self { inner }
    }

    /// Accuracy in meters a one-shot request waits for
    pub fn desired_accuracy(&self) -> f64 {
        lock(&self.inner.state).desired_accuracy
    }

    pub fn set_desired_accuracy(&self, meters: f64) {
        lock(&self.inner.state).desired_accuracy = meters;
    }

    pub fn is_listening(&self) -> bool {
        lock(&self.inner.state).is_listening
    }

    pub fn supports_heading(&self) -> bool {
        self.inner.service.supports_heading()
    }

    pub fn is_geolocation_available(&self) -> bool {
        self.inner.service.is_available()
    }

    pub fn is_geolocation_enabled(&self) -> bool {
        self.inner.service.is_enabled()
    }

    /// Receives every position change and error while listening
    pub fn subscribe(&self) -> broadcast::Receiver<PositionEvent> {
        self.inner.events.subscribe()
    }

    /// The platform's cached fix, without activating any sensor
    pub async fn get_last_known_position(&self) -> Result<Option<Position>> {
        self.inner.ensure_authorized(false)?;
        Ok(self
            .inner
            .service
            .last_known_fix()
            .map(|fix| fix.to_position(false)))
    }

    /// Gets the current position.
    ///
    /// `timeout` of `None` waits indefinitely. While listening, the cached
    /// fix is returned right away, or the next update if there is none yet.
    /// Otherwise a one-shot session is opened and torn down again before
    /// this returns.
    pub async fn get_position(
        &self,
        timeout: Option<Duration>,
        cancel: Option<CancelToken>,
        include_heading: bool,
    ) -> Result<Position> {
        if timeout.is_some_and(|t| t.is_zero()) {
            return Err(GeolocationError::InvalidArgument(
                "timeout must be positive or infinite".to_string(),
            ));
        }
        self.inner.ensure_authorized(false)?;
        if cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
            return Err(GeolocationError::Cancelled);
        }

        // Subscribe under the lock so an update cannot slip in between
        // checking the cache and listening for the next one
        let (desired_accuracy, pending) = {
            let state = lock(&self.inner.state);
            if !state.is_listening {
                (state.desired_accuracy, None)
            } else if let Some(position) = state.last_position.clone() {
                return Ok(position);
            } else {
                (state.desired_accuracy, Some(self.inner.events.subscribe()))
            }
        };

        match pending {
            Some(receiver) => wait_for_event(receiver, timeout, cancel).await,
            None => {
                single_update::acquire(
                    &*self.inner.service,
                    SingleUpdateRequest {
                        desired_accuracy,
                        include_heading,
                        timeout,
                        cancel,
                        accept_best_on_timeout: self.inner.accept_best_on_timeout,
                    },
                )
                .await
            }
        }
    }

    /// Starts continuous updates.
    ///
    /// Passing `None` for `settings` always means the defaults, never the
    /// settings of an earlier session.
    pub async fn start_listening(
        &self,
        minimum_time: Duration,
        minimum_distance: f64,
        include_heading: bool,
        settings: Option<ListenerSettings>,
    ) -> Result<bool> {
        if !minimum_distance.is_finite() || minimum_distance < 0.0 {
            return Err(GeolocationError::InvalidArgument(format!(
                "minimum distance must be a non-negative number, got {minimum_distance}"
            )));
        }
        if self.is_listening() {
            return Err(already_listening());
        }

        let settings = settings.unwrap_or_default();
        self.inner
            .ensure_authorized(settings.require_location_always_permission)?;

        let service = &self.inner.service;
        let defer = settings.defer_location_updates && service.supports_deferred_updates();

        let desired_accuracy = {
            let mut state = lock(&self.inner.state);
            if state.is_listening {
                return Err(already_listening());
            }
            state.is_listening = true;
            state.include_heading = include_heading;
            state.listener_settings = Some(settings.clone());
            state.last_position = None;
            state.deferring_updates = false;
            state.desired_accuracy
        };

        service.apply_listener_settings(&settings);
        service.set_minimum_interval(minimum_time);

        // Deferral needs every fix at the best accuracy the platform has
        if defer {
            service.set_desired_accuracy(0.0);
            service.set_distance_filter(None);
        } else {
            service.set_desired_accuracy(desired_accuracy);
            service.set_distance_filter(Some(minimum_distance));
        }

        if settings.listen_for_significant_changes {
            service.start_monitoring_significant_changes();
        } else {
            service.start_updating_location();
        }

        let mode = if settings.listen_for_significant_changes {
            "significant changes"
        } else {
            "standard updates"
        };
        info!("Listening for location updates ({mode}, min distance {minimum_distance} m)");
        Ok(true)
    }

    /// Stops continuous updates and forgets the cached position.
    ///
    /// Succeeds without doing anything when not listening. Requests still
    /// waiting for the next update fail with `Cancelled`.
    pub async fn stop_listening(&self) -> Result<bool> {
        self.inner.stop_session(GeolocationError::Cancelled);
        Ok(true)
    }

    /// Forward geocodes `address` into candidate positions
    pub async fn get_positions_for_address(
        &self,
        address: &str,
        map_key: Option<&str>,
    ) -> Result<Vec<Position>> {
        if address.trim().is_empty() {
            return Err(GeolocationError::InvalidArgument(
                "address must not be empty".to_string(),
            ));
        }

        let coordinates = self
            .inner
            .geocoder
            .geocode(address, map_key)
            .await
            .map_err(geocoding_failed)?;

        Ok(coordinates
            .into_iter()
            .map(|(latitude, longitude)| Position::from_coordinates(latitude, longitude))
            .collect())
    }

    /// Reverse geocodes a position into candidate addresses
    pub async fn get_addresses_for_position(
        &self,
        position: &Position,
        map_key: Option<&str>,
    ) -> Result<Vec<Address>> {
        let Some((latitude, longitude)) = position.coordinates() else {
            return Err(GeolocationError::InvalidArgument(
                "position has no latitude/longitude".to_string(),
            ));
        };

        self.inner
            .geocoder
            .reverse_geocode(latitude, longitude, map_key)
            .await
            .map_err(geocoding_failed)
    }
}

fn already_listening() -> GeolocationError {
    GeolocationError::InvalidOperation("already listening".to_string())
}

fn geocoding_failed(err: anyhow::Error) -> GeolocationError {
    GeolocationError::PositionUnavailable(format!("geocoding failed: {err:#}"))
}

/// Waits for the first position or error on the event stream.
///
/// The receiver is dropped on return, so nothing stays subscribed after
/// the request is answered.
async fn wait_for_event(
    mut receiver: broadcast::Receiver<PositionEvent>,
    timeout: Option<Duration>,
    cancel: Option<CancelToken>,
) -> Result<Position> {
    let next = async {
        loop {
            match receiver.recv().await {
                Ok(PositionEvent::PositionChanged(position)) => return Ok(position),
                Ok(PositionEvent::PositionError(err)) => return Err(err),
                Err(RecvError::Lagged(skipped)) => {
                    debug!("Position waiter lagged behind by {skipped} events");
                }
                Err(RecvError::Closed) => {
                    return Err(GeolocationError::PositionUnavailable(
                        "geolocator shut down".to_string(),
                    ));
                }
            }
        }
    };
    let timer = async {
        match timeout {
            Some(timeout) => tokio::time::sleep(timeout).await,
            None => std::future::pending().await,
        }
    };
    let cancelled = async {
        match &cancel {
            Some(token) => token.cancelled().await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        biased;
        _ = cancelled => Err(GeolocationError::Cancelled),
        outcome = next => outcome,
        _ = timer => Err(GeolocationError::Timeout),
    }
}

impl Inner {
    fn ensure_authorized(&self, require_always: bool) -> Result<()> {
        match self.service.authorization_status() {
            status if status.is_revoked() => Err(GeolocationError::Unauthorized),
            AuthorizationStatus::AuthorizedWhenInUse if require_always => {
                warn!("Listening requires \"always\" location authorization");
                Err(GeolocationError::Unauthorized)
            }
            _ => Ok(()),
        }
    }

    /// Tears down the listening session, if any, and fails anyone still
    /// waiting on it with `reason`
    fn stop_session(&self, reason: GeolocationError) {
        let settings = {
            let mut state = lock(&self.state);
            if !state.is_listening {
                return;
            }
            state.is_listening = false;
            state.last_position = None;
            state.deferring_updates = false;
            // Sent under the lock so waiters of a later session never see it
            let _ = self.events.send(PositionEvent::PositionError(reason));
            state.listener_settings.take().unwrap_or_default()
        };

        // Deferral applies to either update mode
        if settings.defer_location_updates && self.service.supports_deferred_updates() {
            self.service.disallow_deferred_updates();
        }

        if settings.listen_for_significant_changes {
            self.service.stop_monitoring_significant_changes();
        } else {
            self.service.stop_updating_location();
        }

        info!("Stopped listening for location updates");
    }

    fn fail_session(&self, error: GeolocationError) {
        warn!("Location updates failed: {error}");
        self.stop_session(error);
    }
}

impl LocationDelegate for Inner {
    fn on_locations_updated(&self, fixes: &[RawFix]) {
        let Some(fix) = fixes.last() else {
            return;
        };
        let can_defer = self.service.supports_deferred_updates();

        let deferral = {
            let mut state = lock(&self.state);
            if !state.is_listening {
                return;
            }

            let base = state.last_position.clone().unwrap_or_default();
            let position = fix.merge_into(base, state.include_heading);
            state.last_position = Some(position.clone());
            let _ = self.events.send(PositionEvent::PositionChanged(position));

            match state.listener_settings.as_ref() {
                Some(settings)
                    if settings.defer_location_updates && can_defer && !state.deferring_updates =>
                {
                    let window = (settings.deferral_distance_meters, settings.deferral_time);
                    state.deferring_updates = true;
                    Some(window)
                }
                _ => None,
            }
        };

        if let Some((distance, time)) = deferral {
            debug!("Deferring location updates until {distance:?} m / {time:?}");
            self.service.allow_deferred_updates_until(distance, time);
        }
    }

    fn on_failed(&self, failure: ServiceFailure) {
        match failure {
            ServiceFailure::Network => self.fail_session(GeolocationError::PositionUnavailable(
                "network unavailable for assisted positioning".to_string(),
            )),
            other => debug!("Ignoring transient location failure: {other:?}"),
        }
    }

    fn on_authorization_changed(&self, status: AuthorizationStatus) {
        if status.is_revoked() {
            self.fail_session(GeolocationError::Unauthorized);
        } else {
            debug!("Location authorization changed to {status:?}");
        }
    }

    fn on_deferred_updates_finished(&self) {
        lock(&self.state).deferring_updates = false;
    }
}
