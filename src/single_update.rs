//! One-shot position acquisition.
//!
//! A `SingleUpdateDelegate` is handed to the platform for the lifetime of one
//! `get_position` call. Three parties race to finish the request: the
//! platform (fix or failure), the timeout timer and the caller's cancel
//! token. All of them go through the same [`Completion`], so whichever gets
//! there first wins and everything after it is dropped.

use log::{debug, warn};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;

use crate::cancel::CancelToken;
use crate::error::{GeolocationError, Result};
use crate::position::Position;
use crate::service::{
    AuthorizationStatus, LocationDelegate, LocationService, RawFix, ServiceFailure, SessionId,
};

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A value that can be delivered exactly once.
pub struct Completion<T> {
    sender: Mutex<Option<oneshot::Sender<T>>>,
}

impl<T> Completion<T> {
    pub fn new() -> (Self, oneshot::Receiver<T>) {
        let (sender, receiver) = oneshot::channel();
        let completion = Self {
            sender: Mutex::new(Some(sender)),
        };
        (completion, receiver)
    }

    /// Delivers `value` if nothing was delivered yet.
    ///
    /// Returns `false` when an earlier resolution already won.
    pub fn resolve(&self, value: T) -> bool {
        let sender = lock(&self.sender).take();
        match sender {
            Some(sender) => {
                // A dropped receiver means the caller went away; still counts as resolved
                let _ = sender.send(value);
                true
            }
            None => false,
        }
    }

    pub fn is_resolved(&self) -> bool {
        lock(&self.sender).is_none()
    }
}

/// Receives platform callbacks for a single `get_position` call
pub(crate) struct SingleUpdateDelegate {
    desired_accuracy: f64,
    include_heading: bool,
    needs_heading: bool,
    best: Mutex<Option<Position>>,
    completion: Completion<Result<Position>>,
}

impl SingleUpdateDelegate {
    pub(crate) fn new(
        desired_accuracy: f64,
        include_heading: bool,
        supports_heading: bool,
    ) -> (Self, oneshot::Receiver<Result<Position>>) {
        let (completion, receiver) = Completion::new();
        let delegate = Self {
            desired_accuracy,
            include_heading,
            needs_heading: include_heading && supports_heading,
            best: Mutex::new(None),
            completion,
        };
        (delegate, receiver)
    }

    fn finish(&self, outcome: Result<Position>) {
        if !self.completion.resolve(outcome) {
            debug!("Single update already resolved, ignoring late outcome");
        }
    }

    /// Resolves with `Cancelled` unless something already won
    pub(crate) fn cancel(&self) {
        self.finish(Err(GeolocationError::Cancelled));
    }

    /// Called when the timer fires
    pub(crate) fn expire(&self, accept_best: bool) {
        let best = lock(&self.best).clone();
        match best {
            Some(position) if accept_best => {
                debug!(
                    "Timed out before reaching {} m, using best fix ({} m)",
                    self.desired_accuracy, position.accuracy
                );
                self.finish(Ok(position));
            }
            _ => self.finish(Err(GeolocationError::Timeout)),
        }
    }

    fn consider(&self, fix: &RawFix) -> Option<Position> {
        if !fix.reports_coordinates() {
            return None;
        }

        let mut best = lock(&self.best);
        if let Some(current) = best.as_ref() {
            if fix.horizontal_accuracy > current.accuracy {
                return None;
            }
        }

        let base = best.as_ref().cloned().unwrap_or_default();
        let position = fix.merge_into(base, self.include_heading);
        *best = Some(position.clone());

        let accurate_enough = position.accuracy <= self.desired_accuracy;
        let heading_ready = !self.needs_heading || position.has_heading;
        (accurate_enough && heading_ready).then_some(position)
    }
}

impl LocationDelegate for SingleUpdateDelegate {
    fn on_locations_updated(&self, fixes: &[RawFix]) {
        if self.completion.is_resolved() {
            return;
        }
        for fix in fixes {
            if let Some(position) = self.consider(fix) {
                self.finish(Ok(position));
                return;
            }
        }
    }

    fn on_failed(&self, failure: ServiceFailure) {
        match failure {
            ServiceFailure::Network => self.finish(Err(GeolocationError::PositionUnavailable(
                "network unavailable for assisted positioning".to_string(),
            ))),
            other => debug!("Single update ignoring transient failure: {other:?}"),
        }
    }

    fn on_authorization_changed(&self, status: AuthorizationStatus) {
        if status.is_revoked() {
            self.finish(Err(GeolocationError::Unauthorized));
        }
    }
}

/// Stops the single-update session however the request ends, including when
/// the caller drops the future.
struct SessionGuard<'a> {
    service: &'a dyn LocationService,
    session: SessionId,
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        self.service.stop_single_update(self.session);
    }
}

/// Parameters for one acquisition
pub(crate) struct SingleUpdateRequest {
    pub desired_accuracy: f64,
    pub include_heading: bool,
    pub timeout: Option<Duration>,
    pub cancel: Option<CancelToken>,
    pub accept_best_on_timeout: bool,
}

/// Opens a single-update session and waits for the first of fix, failure,
/// timeout or cancellation.
pub(crate) async fn acquire(
    service: &dyn LocationService,
    request: SingleUpdateRequest,
) -> Result<Position> {
    let (delegate, mut receiver) = SingleUpdateDelegate::new(
        request.desired_accuracy,
        request.include_heading,
        service.supports_heading(),
    );
    let delegate = Arc::new(delegate);

    let session = service.start_single_update(request.desired_accuracy, delegate.clone());
    let _guard = SessionGuard { service, session };
    debug!("Started single update session {:?}", session);

    let timer = async {
        match request.timeout {
            Some(timeout) => tokio::time::sleep(timeout).await,
            None => std::future::pending().await,
        }
    };
    let cancelled = async {
        match &request.cancel {
            Some(token) => token.cancelled().await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        biased;
        outcome = &mut receiver => return flatten(outcome),
        _ = cancelled => delegate.cancel(),
        _ = timer => delegate.expire(request.accept_best_on_timeout),
    }

    // Either our own resolution or a platform callback that beat it
    flatten(receiver.await)
}

fn flatten(
    outcome: std::result::Result<Result<Position>, oneshot::error::RecvError>,
) -> Result<Position> {
    outcome.unwrap_or_else(|_| {
        warn!("Single update delegate dropped without resolving");
        Err(GeolocationError::PositionUnavailable(
            "location session ended without a result".to_string(),
        ))
    })
}
