use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Collapses concurrent work for the same key into one execution.
///
/// Callers acquire the key's flight lock, re-check their fast path (the
/// cache), and only the first one through actually computes. The map entry is
/// dropped once a holder finishes so keys do not accumulate.
#[derive(Default)]
pub struct FlightMap {
    flights: DashMap<String, Arc<Mutex<()>>>,
}

impl FlightMap {
    pub fn new() -> Self {
        Self {
            flights: DashMap::new(),
        }
    }

    /// Number of keys with an in-flight computation. Diagnostics only.
    pub fn in_flight(&self) -> usize {
        self.flights.len()
    }

    pub async fn acquire(&self, key: &str) -> FlightGuard {
        loop {
            let lock = self
                .flights
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone();
            let permit = lock.clone().lock_owned().await;

            // The flight we waited on may have been retired while we slept;
            // holding a lock nobody else can reach would let two computes
            // run side by side, so verify and retry instead.
            let still_current = self
                .flights
                .get(key)
                .map(|entry| Arc::ptr_eq(entry.value(), &lock))
                .unwrap_or(false);
            if still_current {
                return FlightGuard {
                    key: key.to_string(),
                    _permit: permit,
                };
            }
        }
    }

    fn release(&self, key: &str) {
        // Late waiters on the retired lock notice it is gone from the map
        // and re-acquire; a fresh caller simply starts a new flight.
        self.flights.remove(key);
    }
}

pub struct FlightGuard {
    key: String,
    _permit: tokio::sync::OwnedMutexGuard<()>,
}

impl FlightGuard {
    pub fn finish(self, flights: &FlightMap) {
        flights.release(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_concurrent_acquires_serialize() {
        let flights = Arc::new(FlightMap::new());
        let running = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let flights = Arc::clone(&flights);
            let running = Arc::clone(&running);
            let max_seen = Arc::clone(&max_seen);
            handles.push(tokio::spawn(async move {
                let guard = flights.acquire("key").await;
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                guard.finish(&flights);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1, "flights overlapped");
        assert_eq!(flights.in_flight(), 0, "flight entries leaked");
    }

    #[tokio::test]
    async fn test_distinct_keys_do_not_block_each_other() {
        let flights = Arc::new(FlightMap::new());
        let a = flights.acquire("a").await;

        // A second key must acquire immediately even while "a" is held.
        let b = tokio::time::timeout(std::time::Duration::from_millis(50), flights.acquire("b"))
            .await
            .expect("acquire on a different key should not block");

        b.finish(&flights);
        a.finish(&flights);
    }
}
