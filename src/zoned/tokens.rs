//! Open and active zone resource tokens.
//!
//! The device caps how many zones may be open (accepting writes right now)
//! and active (open or closed but not yet full). Both ceilings are modelled
//! as counters behind one lock. Tokens are RAII guards: dropping one returns
//! the slot, and an [`ActiveToken`] can instead be handed over to a zone,
//! which then owns the slot until it is finished or reset.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tracing::error;

#[derive(Debug, Default)]
struct TokenCounts {
    open: u32,
    active: u32,
}

/// Open/active zone counters bounded by device ceilings.
#[derive(Debug)]
pub struct ZoneTokens {
    counts: Mutex<TokenCounts>,
    resources: Condvar,
    max_open: u32,
    max_active: u32,
}

impl ZoneTokens {
    pub fn new(max_open: u32, max_active: u32) -> Self {
        Self {
            counts: Mutex::new(TokenCounts::default()),
            resources: Condvar::new(),
            max_open,
            max_active,
        }
    }

    pub fn max_open(&self) -> u32 {
        self.max_open
    }

    pub fn max_active(&self) -> u32 {
        self.max_active
    }

    pub fn open_count(&self) -> u32 {
        self.counts.lock().open
    }

    pub fn active_count(&self) -> u32 {
        self.counts.lock().active
    }

    /// Block until an open-zone slot is free and take it.
    ///
    /// Prioritized (WAL) callers may use the full ceiling; everyone else is
    /// held one below it so a WAL writer can always get a slot.
    pub fn wait_for_open(self: &Arc<Self>, prioritized: bool) -> OpenToken {
        let limit = if prioritized {
            self.max_open
        } else {
            self.max_open.saturating_sub(1)
        };

        let mut counts = self.counts.lock();
        while counts.open >= limit {
            self.resources.wait(&mut counts);
        }
        counts.open += 1;

        OpenToken {
            tokens: Arc::clone(self),
            armed: true,
        }
    }

    /// Take an active-zone slot if one is free.
    pub fn try_acquire_active(self: &Arc<Self>) -> Option<ActiveToken> {
        let mut counts = self.counts.lock();
        if counts.active >= self.max_active {
            return None;
        }
        counts.active += 1;

        Some(ActiveToken {
            tokens: Arc::clone(self),
            armed: true,
        })
    }

    /// Count a zone the device already reports active, ignoring the ceiling.
    pub(crate) fn adopt_active(&self) {
        self.counts.lock().active += 1;
    }

    /// Return an active slot owned by a zone.
    pub(crate) fn put_active(&self) {
        {
            let mut counts = self.counts.lock();
            match counts.active.checked_sub(1) {
                Some(n) => counts.active = n,
                None => {
                    debug_assert!(false, "active zone token underflow");
                    error!("Active zone token underflow");
                }
            }
        }
        self.resources.notify_all();
    }

    fn put_open(&self) {
        {
            let mut counts = self.counts.lock();
            match counts.open.checked_sub(1) {
                Some(n) => counts.open = n,
                None => {
                    debug_assert!(false, "open zone token underflow");
                    error!("Open zone token underflow");
                }
            }
        }
        self.resources.notify_all();
    }
}

/// One open-zone slot. Returned on drop.
#[derive(Debug)]
pub struct OpenToken {
    tokens: Arc<ZoneTokens>,
    armed: bool,
}

impl OpenToken {
    /// Return the slot now.
    pub fn release(mut self) {
        self.put();
    }

    fn put(&mut self) {
        if std::mem::replace(&mut self.armed, false) {
            self.tokens.put_open();
        }
    }
}

impl Drop for OpenToken {
    fn drop(&mut self) {
        self.put();
    }
}

/// One active-zone slot. Returned on drop unless handed to a zone.
#[derive(Debug)]
pub struct ActiveToken {
    tokens: Arc<ZoneTokens>,
    armed: bool,
}

impl ActiveToken {
    /// Hand the slot to the zone being opened. It comes back through
    /// `put_active` when that zone is finished or reset.
    pub fn transfer(mut self) {
        self.armed = false;
    }

    /// Return the slot now.
    pub fn release(mut self) {
        self.put();
    }

    fn put(&mut self) {
        if std::mem::replace(&mut self.armed, false) {
            self.tokens.put_active();
        }
    }
}

impl Drop for ActiveToken {
    fn drop(&mut self) {
        self.put();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[test]
    fn test_active_ceiling() {
        let tokens = Arc::new(ZoneTokens::new(4, 2));
        let a = tokens.try_acquire_active().unwrap();
        let b = tokens.try_acquire_active().unwrap();
        assert!(tokens.try_acquire_active().is_none());
        assert_eq!(tokens.active_count(), 2);

        drop(a);
        assert_eq!(tokens.active_count(), 1);
        b.release();
        assert_eq!(tokens.active_count(), 0);
    }

    #[test]
    fn test_active_transfer_keeps_slot() {
        let tokens = Arc::new(ZoneTokens::new(4, 2));
        tokens.try_acquire_active().unwrap().transfer();
        assert_eq!(tokens.active_count(), 1);

        tokens.put_active();
        assert_eq!(tokens.active_count(), 0);
    }

    #[test]
    fn test_open_priority() {
        let tokens = Arc::new(ZoneTokens::new(2, 2));
        let _t1 = tokens.wait_for_open(false);
        assert_eq!(tokens.open_count(), 1);

        // A WAL writer can still take the last slot
        let wal = tokens.wait_for_open(true);
        assert_eq!(tokens.open_count(), 2);
        drop(wal);
        assert_eq!(tokens.open_count(), 1);
    }

    #[test]
    fn test_open_wait_wakes_on_put() {
        let tokens = Arc::new(ZoneTokens::new(2, 2));
        let held = tokens.wait_for_open(false);

        std::thread::scope(|s| {
            let waiter = s.spawn(|| {
                let _t = tokens.wait_for_open(false);
            });
            std::thread::sleep(Duration::from_millis(20));
            assert!(!waiter.is_finished());
            drop(held);
            waiter.join().unwrap();
        });
        assert_eq!(tokens.open_count(), 0);
    }

    #[test]
    fn test_open_ceiling_under_contention() {
        let tokens = Arc::new(ZoneTokens::new(4, 4));
        let peak = AtomicU32::new(0);

        std::thread::scope(|s| {
            for i in 0..8 {
                let tokens = &tokens;
                let peak = &peak;
                s.spawn(move || {
                    for _ in 0..200 {
                        let _t = tokens.wait_for_open(i % 2 == 0);
                        peak.fetch_max(tokens.open_count(), Ordering::Relaxed);
                    }
                });
            }
        });

        assert!(peak.load(Ordering::Relaxed) <= 4);
        assert_eq!(tokens.open_count(), 0);
    }
}
