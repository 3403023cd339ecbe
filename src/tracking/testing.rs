//! Collaborator doubles for tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::gateway::{BackgroundExecution, GatewayError, OrderLocationGateway};
use crate::LocationUpdate;

#[derive(Default)]
pub(crate) struct RecordingGateway {
    calls: Mutex<Vec<LocationUpdate>>,
    fail: bool,
}

impl RecordingGateway {
    pub fn failing() -> Self {
        Self {
            calls: Mutex::new(vec![]),
            fail: true,
        }
    }

    pub fn calls(&self) -> Vec<LocationUpdate> {
        self.calls.lock().unwrap().clone()
    }
}

impl OrderLocationGateway for RecordingGateway {
    async fn update_location(&self, update: &LocationUpdate) -> Result<(), GatewayError> {
        self.calls.lock().unwrap().push(update.clone());

        if self.fail {
            Err(GatewayError::Status(503))
        } else {
            Ok(())
        }
    }
}

#[derive(Default)]
pub(crate) struct CountingBackground {
    begun: AtomicUsize,
    ended: AtomicUsize,
}

impl CountingBackground {
    pub fn begun(&self) -> usize {
        self.begun.load(Ordering::SeqCst)
    }

    pub fn ended(&self) -> usize {
        self.ended.load(Ordering::SeqCst)
    }
}

impl BackgroundExecution for CountingBackground {
    fn begin(&self) {
        self.begun.fetch_add(1, Ordering::SeqCst);
    }

    fn end(&self) {
        self.ended.fetch_add(1, Ordering::SeqCst);
    }
}
