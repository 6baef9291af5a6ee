//! Sticky deferred error status.

use parking_lot::Mutex;
use tracing::error;

use crate::error::{Error, Result};

/// Holds the first fatal error seen by the pool.
///
/// Once set, the status is never cleared for the life of the pool and every
/// allocation returns it.
#[derive(Debug, Default)]
pub struct DeferredStatus {
    slot: Mutex<Option<Error>>,
}

impl DeferredStatus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `err` unless an error is already recorded. Returns true if
    /// this call set the status.
    pub fn set(&self, err: Error) -> bool {
        let mut slot = self.slot.lock();
        if slot.is_some() {
            return false;
        }
        error!(error = %err, "Setting deferred zone status");
        *slot = Some(err);
        true
    }

    /// `Ok` while no error is recorded, otherwise the first error.
    pub fn check(&self) -> Result<()> {
        match &*self.slot.lock() {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    pub fn get(&self) -> Option<Error> {
        self.slot.lock().clone()
    }

    pub fn is_set(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// Record the error of `result`, if any, and pass it through.
    pub fn record<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            self.set(err.clone());
        }
        result
    }
}
