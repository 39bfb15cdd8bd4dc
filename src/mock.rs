//! An in-process location service for tests, demos and headless hosts.
//!
//! `MockLocationService` behaves like a platform adapter: it keeps the
//! settings the geolocator configures, records every call, and delivers fixes,
//! failures and authorization changes to whichever delegates are active.
//! Tests drive it by hand with `push_fix`, `fail` and `set_authorization`;
//! built from a `SimulationConfig` it replays a track on a timer instead.

use log::{debug, info};
use rand::Rng;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::config::SimulationConfig;
use crate::position::ListenerSettings;
use crate::service::{
    AuthorizationStatus, LocationDelegate, LocationService, RawFix, ServiceFailure, SessionId,
};
use crate::single_update::lock;

/// Meters per degree of latitude, close enough for simulated noise
const METERS_PER_DEGREE: f64 = 111_320.0;

/// Oldest calls are dropped past this many
const MAX_RECORDED_CALLS: usize = 1024;

/// A call the geolocator made on the service
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceCall {
    LastKnownFix,
    SetDesiredAccuracy(f64),
    SetDistanceFilter(Option<f64>),
    SetMinimumInterval(Duration),
    ApplyListenerSettings(ListenerSettings),
    StartUpdatingLocation,
    StopUpdatingLocation,
    StartMonitoringSignificantChanges,
    StopMonitoringSignificantChanges,
    AllowDeferredUpdatesUntil(Option<f64>, Option<Duration>),
    DisallowDeferredUpdates,
    StartSingleUpdate(SessionId),
    StopSingleUpdate(SessionId),
}

struct MockState {
    authorization: AuthorizationStatus,
    enabled: bool,
    supports_heading: bool,
    supports_deferred_updates: bool,
    last_known: Option<RawFix>,
    delegate: Option<Weak<dyn LocationDelegate>>,
    sessions: HashMap<SessionId, Arc<dyn LocationDelegate>>,
    desired_accuracy: f64,
    distance_filter: Option<f64>,
    updating: bool,
    monitoring_significant_changes: bool,
    calls: VecDeque<ServiceCall>,
    playback: Option<JoinHandle<()>>,
}

impl MockState {
    fn record(&mut self, call: ServiceCall) {
        if self.calls.len() == MAX_RECORDED_CALLS {
            self.calls.pop_front();
        }
        self.calls.push_back(call);
    }
}

struct Playback {
    interval: Duration,
    track: Vec<RawFix>,
    jitter_meters: f64,
}

struct MockInner {
    state: Mutex<MockState>,
    next_session: AtomicU64,
    playback: Option<Playback>,
}

/// Scriptable platform location service
#[derive(Clone)]
pub struct MockLocationService {
    inner: Arc<MockInner>,
}

impl MockLocationService {
    /// A manually driven service, authorized for use while in the foreground
    pub fn new() -> Self {
        Self::build(AuthorizationStatus::AuthorizedWhenInUse, None, None)
    }

    /// A service that replays `simulation.track` while any update is running
    pub fn from_simulation(simulation: &SimulationConfig) -> Self {
        let plays = !simulation.track.is_empty() && simulation.interval_ms > 0;
        let playback = plays.then(|| Playback {
            interval: Duration::from_millis(simulation.interval_ms),
            track: simulation.track.clone(),
            jitter_meters: simulation.jitter_meters.max(0.0),
        });
        Self::build(
            simulation.authorization,
            simulation.last_known.clone(),
            playback,
        )
    }

    fn build(
        authorization: AuthorizationStatus,
        last_known: Option<RawFix>,
        playback: Option<Playback>,
    ) -> Self {
        let state = MockState {
            authorization,
            enabled: true,
            supports_heading: true,
            supports_deferred_updates: false,
            last_known,
            delegate: None,
            sessions: HashMap::new(),
            desired_accuracy: 100.0,
            distance_filter: None,
            updating: false,
            monitoring_significant_changes: false,
            calls: VecDeque::new(),
            playback: None,
        };
        Self {
            inner: Arc::new(MockInner {
                state: Mutex::new(state),
                next_session: AtomicU64::new(1),
                playback,
            }),
        }
    }

    pub fn with_last_known(self, fix: RawFix) -> Self {
        lock(&self.inner.state).last_known = Some(fix);
        self
    }

    pub fn with_deferred_updates(self) -> Self {
        lock(&self.inner.state).supports_deferred_updates = true;
        self
    }

    pub fn without_heading(self) -> Self {
        lock(&self.inner.state).supports_heading = false;
        self
    }

    pub fn set_enabled(&self, enabled: bool) {
        lock(&self.inner.state).enabled = enabled;
    }

    /// Delivers fixes to every active delegate
    pub fn push_fixes(&self, fixes: &[RawFix]) {
        for delegate in self.inner.active_delegates() {
            delegate.on_locations_updated(fixes);
        }
    }

    pub fn push_fix(&self, fix: RawFix) {
        self.push_fixes(std::slice::from_ref(&fix));
    }

    /// Reports a service failure to every active delegate
    pub fn fail(&self, failure: ServiceFailure) {
        for delegate in self.inner.active_delegates() {
            delegate.on_failed(failure.clone());
        }
    }

    /// Changes the authorization status and notifies every registered delegate
    pub fn set_authorization(&self, status: AuthorizationStatus) {
        let delegates = {
            let mut state = lock(&self.inner.state);
            state.authorization = status;
            let mut delegates: Vec<Arc<dyn LocationDelegate>> =
                state.sessions.values().cloned().collect();
            if let Some(delegate) = state.delegate.as_ref().and_then(Weak::upgrade) {
                delegates.push(delegate);
            }
            delegates
        };
        for delegate in delegates {
            delegate.on_authorization_changed(status);
        }
    }

    /// Signals that a deferred-update window has elapsed
    pub fn finish_deferred_updates(&self) {
        let delegate = lock(&self.inner.state)
            .delegate
            .as_ref()
            .and_then(Weak::upgrade);
        if let Some(delegate) = delegate {
            delegate.on_deferred_updates_finished();
        }
    }

    /// The most recent calls, oldest first
    pub fn calls(&self) -> Vec<ServiceCall> {
        lock(&self.inner.state).calls.iter().cloned().collect()
    }

    pub fn call_count(&self, predicate: impl Fn(&ServiceCall) -> bool) -> usize {
        lock(&self.inner.state)
            .calls
            .iter()
            .filter(|call| predicate(call))
            .count()
    }

    pub fn clear_calls(&self) {
        lock(&self.inner.state).calls.clear();
    }

    pub fn is_updating(&self) -> bool {
        lock(&self.inner.state).updating
    }

    pub fn is_monitoring_significant_changes(&self) -> bool {
        lock(&self.inner.state).monitoring_significant_changes
    }

    pub fn active_sessions(&self) -> usize {
        lock(&self.inner.state).sessions.len()
    }

    pub fn desired_accuracy(&self) -> f64 {
        lock(&self.inner.state).desired_accuracy
    }

    pub fn distance_filter(&self) -> Option<f64> {
        lock(&self.inner.state).distance_filter
    }

    fn record(&self, call: ServiceCall) {
        lock(&self.inner.state).record(call);
    }
}

impl Default for MockLocationService {
    fn default() -> Self {
        Self::new()
    }
}

impl MockInner {
    /// Delegates that should hear about fixes right now
    fn active_delegates(&self) -> Vec<Arc<dyn LocationDelegate>> {
        let state = lock(&self.state);
        let mut delegates: Vec<Arc<dyn LocationDelegate>> =
            state.sessions.values().cloned().collect();
        if state.updating || state.monitoring_significant_changes {
            if let Some(delegate) = state.delegate.as_ref().and_then(Weak::upgrade) {
                delegates.push(delegate);
            }
        }
        delegates
    }

    fn is_running(&self) -> bool {
        let state = lock(&self.state);
        state.updating || state.monitoring_significant_changes || !state.sessions.is_empty()
    }

    /// Starts replaying the track if configured and not already playing
    fn ensure_playback(self: &Arc<Self>) {
        let Some(playback) = self.playback.as_ref() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!("No tokio runtime, simulated track will not play");
            return;
        };

        let mut state = lock(&self.state);
        if state.playback.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        let weak = Arc::downgrade(self);
        let interval = playback.interval;
        info!("Replaying simulated track every {} ms", interval.as_millis());
        state.playback = Some(runtime.spawn(async move {
            let mut index = 0usize;
            loop {
                tokio::time::sleep(interval).await;
                let Some(inner) = weak.upgrade() else { break };
                if !inner.is_running() {
                    debug!("Simulated track stopped, no active updates");
                    break;
                }
                let Some(fix) = inner.next_fix(index) else { break };
                index += 1;
                for delegate in inner.active_delegates() {
                    delegate.on_locations_updated(std::slice::from_ref(&fix));
                }
            }
        }));
    }

    fn next_fix(&self, index: usize) -> Option<RawFix> {
        let playback = self.playback.as_ref()?;
        let base = playback.track.get(index % playback.track.len())?;
        let mut fix = base.clone().with_timestamp(chrono::Utc::now());

        if playback.jitter_meters > 0.0 {
            let mut rng = rand::thread_rng();
            let spread = playback.jitter_meters / METERS_PER_DEGREE;
            fix.latitude += rng.gen_range(-spread..=spread);
            fix.longitude += rng.gen_range(-spread..=spread);
        }
        Some(fix)
    }
}

impl LocationService for MockLocationService {
    fn authorization_status(&self) -> AuthorizationStatus {
        lock(&self.inner.state).authorization
    }

    fn is_enabled(&self) -> bool {
        lock(&self.inner.state).enabled
    }

    fn supports_heading(&self) -> bool {
        lock(&self.inner.state).supports_heading
    }

    fn supports_deferred_updates(&self) -> bool {
        lock(&self.inner.state).supports_deferred_updates
    }

    fn last_known_fix(&self) -> Option<RawFix> {
        let mut state = lock(&self.inner.state);
        state.record(ServiceCall::LastKnownFix);
        state.last_known.clone()
    }

    fn set_delegate(&self, delegate: Weak<dyn LocationDelegate>) {
        lock(&self.inner.state).delegate = Some(delegate);
    }

    fn set_desired_accuracy(&self, meters: f64) {
        let mut state = lock(&self.inner.state);
        state.desired_accuracy = meters;
        state.record(ServiceCall::SetDesiredAccuracy(meters));
    }

    fn set_distance_filter(&self, meters: Option<f64>) {
        let mut state = lock(&self.inner.state);
        state.distance_filter = meters;
        state.record(ServiceCall::SetDistanceFilter(meters));
    }

    fn set_minimum_interval(&self, interval: Duration) {
        self.record(ServiceCall::SetMinimumInterval(interval));
    }

    fn apply_listener_settings(&self, settings: &ListenerSettings) {
        self.record(ServiceCall::ApplyListenerSettings(settings.clone()));
    }

    fn start_updating_location(&self) {
        {
            let mut state = lock(&self.inner.state);
            state.updating = true;
            state.record(ServiceCall::StartUpdatingLocation);
        }
        self.inner.ensure_playback();
    }

    fn stop_updating_location(&self) {
        let mut state = lock(&self.inner.state);
        state.updating = false;
        state.record(ServiceCall::StopUpdatingLocation);
    }

    fn start_monitoring_significant_changes(&self) {
        {
            let mut state = lock(&self.inner.state);
            state.monitoring_significant_changes = true;
            state.record(ServiceCall::StartMonitoringSignificantChanges);
        }
        self.inner.ensure_playback();
    }

    fn stop_monitoring_significant_changes(&self) {
        let mut state = lock(&self.inner.state);
        state.monitoring_significant_changes = false;
        state.record(ServiceCall::StopMonitoringSignificantChanges);
    }

    fn allow_deferred_updates_until(&self, distance: Option<f64>, timeout: Option<Duration>) {
        self.record(ServiceCall::AllowDeferredUpdatesUntil(distance, timeout));
    }

    fn disallow_deferred_updates(&self) {
        self.record(ServiceCall::DisallowDeferredUpdates);
    }

    fn start_single_update(
        &self,
        desired_accuracy: f64,
        delegate: Arc<dyn LocationDelegate>,
    ) -> SessionId {
        let session = SessionId(self.inner.next_session.fetch_add(1, Ordering::Relaxed));
        {
            let mut state = lock(&self.inner.state);
            state.desired_accuracy = desired_accuracy;
            state.sessions.insert(session, delegate);
            state.record(ServiceCall::StartSingleUpdate(session));
        }
        self.inner.ensure_playback();
        session
    }

    fn stop_single_update(&self, session: SessionId) {
        let mut state = lock(&self.inner.state);
        state.sessions.remove(&session);
        state.record(ServiceCall::StopSingleUpdate(session));
    }
}
