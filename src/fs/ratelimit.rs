//! Rate-limited warnings.
//!
//! Out-of-space conditions tend to arrive in storms: every request that
//! touches a full volume fails the same way.  Each distinct message is
//! logged at most once per second; the next emission reports how many
//! copies were swallowed in between.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};
use std::time::{Duration, Instant};

use tracing::warn;

/// Minimum interval between two emissions of the same message.
const INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug)]
struct Slot {
    last_emitted: Instant,
    suppressed: u64,
}

/// Tracks when each distinct message was last emitted.
#[derive(Debug, Default)]
pub struct RateLimiter {
    slots: Mutex<HashMap<String, Slot>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide whether `message` may be emitted at `now`.
    ///
    /// Returns `Some(suppressed)` when it may, where `suppressed` is the
    /// number of occurrences dropped since the previous emission, and
    /// `None` when this occurrence should be dropped.
    ///
    /// Other messages last emitted more than an interval ago are forgotten
    /// along with their suppressed counts, which keeps the table bounded by
    /// the messages of the last second.
    pub fn check(&self, message: &str, now: Instant) -> Option<u64> {
        let mut slots = self.slots.lock().expect("rate limiter poisoned");
        let verdict = Self::update(&mut slots, message, now);
        slots.retain(|key, slot| {
            key == message || now.saturating_duration_since(slot.last_emitted) < INTERVAL
        });
        verdict
    }

    fn update(slots: &mut HashMap<String, Slot>, message: &str, now: Instant) -> Option<u64> {
        match slots.get_mut(message) {
            Some(slot) if now.duration_since(slot.last_emitted) < INTERVAL => {
                slot.suppressed += 1;
                None
            }
            Some(slot) => {
                let suppressed = slot.suppressed;
                slot.last_emitted = now;
                slot.suppressed = 0;
                Some(suppressed)
            }
            None => {
                slots.insert(
                    message.to_string(),
                    Slot {
                        last_emitted: now,
                        suppressed: 0,
                    },
                );
                Some(0)
            }
        }
    }
}

fn global() -> &'static RateLimiter {
    static LIMITER: OnceLock<RateLimiter> = OnceLock::new();
    LIMITER.get_or_init(RateLimiter::new)
}

/// Emit `message` as a warning, at most once per second per message.
pub fn warn_rate_limited(message: &str) {
    if let Some(suppressed) = global().check(message, Instant::now()) {
        warn!(
            pid = std::process::id(),
            suppressed, "{}", message
        );
    }
}
