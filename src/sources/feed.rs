//! Externally driven position source
//!
//! The platform bridge (or a test) pushes fixes and authorization
//! changes through a [`PositionFeed`]; the tracking session consumes them
//! through the regular [`PositionSource`] contract.

use std::sync::{Arc, Mutex};

use tracing::{debug, trace};

use super::{
    AcquisitionError, AcquisitionRequest, AuthorizationState, PositionSource, PositionStreams,
    SourceEvent, StreamSenders,
};
use crate::PositionSample;

#[derive(Debug)]
struct FeedState {
    authorization: AuthorizationState,
    background: bool,
    senders: Option<StreamSenders>,
}

/// Position source fed from outside
pub struct ManualPositionSource {
    state: Arc<Mutex<FeedState>>,
}

/// Producer side of a [`ManualPositionSource`]
#[derive(Clone)]
pub struct PositionFeed {
    state: Arc<Mutex<FeedState>>,
}

impl ManualPositionSource {
    pub fn new(authorization: AuthorizationState) -> (Self, PositionFeed) {
        let state = Arc::new(Mutex::new(FeedState {
            authorization,
            background: false,
            senders: None,
        }));

        (
            Self {
                state: state.clone(),
            },
            PositionFeed { state },
        )
    }
}

impl PositionSource for ManualPositionSource {
    fn start(&mut self, request: &AcquisitionRequest) -> Result<PositionStreams, AcquisitionError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| AcquisitionError::Platform("feed state poisoned".to_string()))?;

        if state.authorization == AuthorizationState::Denied {
            return Err(AcquisitionError::PermissionDenied);
        }

        let (senders, streams) = PositionStreams::channel();
        let _ = senders
            .events
            .try_send(SourceEvent::Authorization(state.authorization));
        state.background = request.background;
        state.senders = Some(senders);
        debug!(authorization = ?state.authorization, "Manual position source started");

        Ok(streams)
    }

    fn stop(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            if state.senders.take().is_some() {
                debug!("Manual position source stopped");
            }
        }
    }
}

impl PositionFeed {
    /// Deliver a fix. Returns false when it was not delivered: the source
    /// is stopped, unauthorized, or the consumer is lagging.
    pub fn push(&self, sample: PositionSample) -> bool {
        let Ok(state) = self.state.lock() else {
            return false;
        };

        if !state.authorization.allows_updates() {
            trace!("Sample withheld, location not authorized");
            return false;
        }

        match &state.senders {
            Some(senders) => senders.samples.try_send(sample).is_ok(),
            None => false,
        }
    }

    /// Change the authorization state, notifying a running session
    pub fn set_authorization(&self, authorization: AuthorizationState) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };

        if state.authorization == authorization {
            return;
        }
        state.authorization = authorization;

        if let Some(senders) = &state.senders {
            let _ = senders
                .events
                .try_send(SourceEvent::Authorization(authorization));
            if state.background && !authorization.allows_background() {
                debug!(?authorization, "Background updates not authorized");
            }
        }
    }

    /// Report a platform failure to a running session
    pub fn fail(&self, error: AcquisitionError) {
        if let Ok(state) = self.state.lock() {
            if let Some(senders) = &state.senders {
                let _ = senders.events.try_send(SourceEvent::Error(error));
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.state
            .lock()
            .map(|state| state.senders.is_some())
            .unwrap_or(false)
    }
}
