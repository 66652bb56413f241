use std::sync::{Mutex, MutexGuard};

/// Allows one outstanding action at a time. The slot holds the action's key
/// while it runs and is cleared when the permit drops, including on error
/// or cancellation of the owning future.
pub struct SingleFlight<K> {
    slot: Mutex<Option<K>>,
}

impl<K: Clone> SingleFlight<K> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    /// Claim the slot for `key`, or get back the key that currently holds it
    pub fn try_acquire(&self, key: K) -> Result<FlightPermit<'_, K>, K> {
        let mut slot = self.slot();
        if let Some(current) = slot.as_ref() {
            return Err(current.clone());
        }
        *slot = Some(key);
        Ok(FlightPermit { flight: self })
    }

    fn slot(&self) -> MutexGuard<'_, Option<K>> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl<K: Clone> Default for SingleFlight<K> {
    fn default() -> Self {
        Self::new()
    }
}

pub struct FlightPermit<'a, K> {
    flight: &'a SingleFlight<K>,
}

impl<K> Drop for FlightPermit<'_, K> {
    fn drop(&mut self) {
        *self.flight.slot.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_rejected_while_held() {
        let flight = SingleFlight::new();

        let permit = flight.try_acquire(("b-1", "ACCEPTED")).unwrap();

        let rejected = flight.try_acquire(("b-1", "DECLINED"));
        assert_eq!(rejected.err(), Some(("b-1", "ACCEPTED")));

        drop(permit);
        assert!(flight.try_acquire(("b-1", "DECLINED")).is_ok());
    }

    #[test]
    fn test_slot_released_when_holder_panics() {
        let flight = std::sync::Arc::new(SingleFlight::new());
        let inner = std::sync::Arc::clone(&flight);

        let result = std::thread::spawn(move || {
            let _permit = inner.try_acquire(7u32).unwrap();
            panic!("action blew up");
        })
        .join();

        assert!(result.is_err());
        assert!(flight.try_acquire(8u32).is_ok());
    }
}
