//! Admission control for the upload route
//!
//! A fixed pool of permits created once at startup. Acquisition never waits:
//! when the pool is empty the request is rejected on the spot. A permit is
//! returned when its `AdmissionSlot` is dropped, so every exit path of a
//! handler (early return, error, unwinding) releases it exactly once.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Debug, Clone)]
pub struct AdmissionController {
    /// `None` disables the gate
    slots: Option<Arc<Semaphore>>,
    capacity: usize,
}

/// Proof of admission; dropping it frees the slot
#[derive(Debug)]
pub struct AdmissionSlot {
    _permit: Option<OwnedSemaphorePermit>,
}

impl AdmissionController {
    /// Capacity 0 disables the gate: every request is admitted.
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (capacity > 0).then(|| Arc::new(Semaphore::new(capacity))),
            capacity,
        }
    }

    /// Take a slot if one is free, without waiting.
    pub fn try_acquire(&self) -> Option<AdmissionSlot> {
        match &self.slots {
            None => Some(AdmissionSlot { _permit: None }),
            Some(slots) => slots
                .clone()
                .try_acquire_owned()
                .ok()
                .map(|permit| AdmissionSlot { _permit: Some(permit) }),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.slots.is_some()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots currently held; always 0 when the gate is disabled
    pub fn in_flight(&self) -> usize {
        self.slots
            .as_ref()
            .map(|slots| self.capacity - slots.available_permits())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_gate_always_admits() {
        let admission = AdmissionController::new(0);

        let slots: Vec<_> = (0..100).map(|_| admission.try_acquire()).collect();
        assert!(slots.iter().all(Option::is_some));
        assert!(!admission.is_enabled());
        assert_eq!(admission.in_flight(), 0);
    }

    #[test]
    fn test_rejects_when_full() {
        let admission = AdmissionController::new(2);

        let first = admission.try_acquire();
        let second = admission.try_acquire();
        assert!(first.is_some());
        assert!(second.is_some());
        assert!(admission.try_acquire().is_none());
        assert_eq!(admission.in_flight(), 2);
    }

    #[test]
    fn test_drop_releases_slot() {
        let admission = AdmissionController::new(1);

        let slot = admission.try_acquire().unwrap();
        assert!(admission.try_acquire().is_none());

        drop(slot);
        assert_eq!(admission.in_flight(), 0);
        assert!(admission.try_acquire().is_some());
    }

    #[test]
    fn test_clones_share_the_pool() {
        let admission = AdmissionController::new(1);
        let clone = admission.clone();

        let _slot = admission.try_acquire().unwrap();
        assert!(clone.try_acquire().is_none());
        assert_eq!(clone.in_flight(), 1);
    }

    #[test]
    fn test_slot_released_on_unwind() {
        let admission = AdmissionController::new(1);
        let inner = admission.clone();

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _slot = inner.try_acquire().unwrap();
            panic!("handler blew up");
        }));

        assert!(result.is_err());
        assert_eq!(admission.in_flight(), 0);
    }
}
