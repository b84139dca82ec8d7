//! Snowflake-style run identifiers.
//!
//! Layout of the 63 significant bits:
//!
//! ```text
//! | 41 bits: ms since EPOCH_MS | 10 bits: instance | 12 bits: sequence |
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{Error, Result};

/// 2020-01-01T00:00:00Z in milliseconds since the Unix epoch.
pub const EPOCH_MS: u64 = 1_577_836_800_000;

const INSTANCE_BITS: u32 = 10;
const SEQUENCE_BITS: u32 = 12;
const MAX_INSTANCE: u16 = (1 << INSTANCE_BITS) - 1;
const MAX_SEQUENCE: u16 = (1 << SEQUENCE_BITS) - 1;

#[derive(Debug, Default)]
struct Clock {
    last_ms: u64,
    sequence: u16,
}

/// Clock state for `instance`, shared by every generator in this process.
fn shared_clock(instance: u16) -> Arc<Mutex<Clock>> {
    static CLOCKS: OnceLock<Mutex<HashMap<u16, Arc<Mutex<Clock>>>>> = OnceLock::new();
    let mut clocks = CLOCKS
        .get_or_init(Default::default)
        .lock()
        .unwrap_or_else(|e| e.into_inner());
    clocks.entry(instance).or_default().clone()
}

/// Instance id derived from the process id, in `1..=1023`.
///
/// Instance 0 is never derived, so it stays free for an explicitly
/// configured node.
pub fn process_instance() -> u16 {
    1 + (std::process::id() % u32::from(MAX_INSTANCE)) as u16
}

/// Generator of unique, time-ordered identifiers.
///
/// Generators for the same instance id within one process share their clock
/// state, so they never issue the same id. Processes are told apart by
/// their instance id: configure one per node, or use
/// [`for_process`](Self::for_process).
#[derive(Debug, Clone)]
pub struct IdGenerator {
    instance: u16,
    clock: Arc<Mutex<Clock>>,
}

impl IdGenerator {
    /// Create a generator for the given instance id (0..=1023).
    pub fn new(instance: u16) -> Result<Self> {
        if instance > MAX_INSTANCE {
            return Err(Error::InvalidConfig(format!(
                "instance id {} exceeds {}",
                instance, MAX_INSTANCE
            )));
        }
        Ok(Self {
            instance,
            clock: shared_clock(instance),
        })
    }

    /// Generator whose instance id is derived from this process.
    pub fn for_process() -> Self {
        let instance = process_instance();
        Self {
            instance,
            clock: shared_clock(instance),
        }
    }

    pub fn instance(&self) -> u16 {
        self.instance
    }

    /// Next raw identifier.
    pub fn next_raw(&self) -> u64 {
        // The clock state stays consistent even if a holder panicked.
        let mut clock = self.clock.lock().unwrap_or_else(|e| e.into_inner());

        // A clock that went backwards is pinned to the last observed ms.
        let mut now = current_ms().max(clock.last_ms);
        if now == clock.last_ms {
            if clock.sequence == MAX_SEQUENCE {
                while now <= clock.last_ms {
                    std::thread::yield_now();
                    now = current_ms();
                }
                clock.sequence = 0;
            } else {
                clock.sequence += 1;
            }
        } else {
            clock.sequence = 0;
        }
        clock.last_ms = now;

        ((now - EPOCH_MS) << (INSTANCE_BITS + SEQUENCE_BITS))
            | (u64::from(self.instance) << SEQUENCE_BITS)
            | u64::from(clock.sequence)
    }

    /// Next identifier rendered with an optional prefix.
    pub fn next_id(&self, prefix: Option<&str>) -> String {
        format!("{}{}", prefix.unwrap_or_default(), self.next_raw())
    }
}

fn current_ms() -> u64 {
    let ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(EPOCH_MS);
    ms.max(EPOCH_MS)
}

/// Split a raw identifier into (ms since Unix epoch, instance, sequence).
pub fn decompose(id: u64) -> (u64, u16, u16) {
    let ms = (id >> (INSTANCE_BITS + SEQUENCE_BITS)) + EPOCH_MS;
    let instance = ((id >> SEQUENCE_BITS) & u64::from(MAX_INSTANCE)) as u16;
    let sequence = (id & u64::from(MAX_SEQUENCE)) as u16;
    (ms, instance, sequence)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_rejects_large_instance() {
        assert!(IdGenerator::new(1024).is_err());
        assert!(IdGenerator::new(1023).is_ok());
    }

    #[test]
    fn test_ids_strictly_increase() {
        let id_gen = IdGenerator::new(1).unwrap();
        let mut last = 0;
        for _ in 0..10_000 {
            let id = id_gen.next_raw();
            assert!(id > last);
            last = id;
        }
    }

    #[test]
    fn test_prefix_and_instance_bits() {
        let id_gen = IdGenerator::new(7).unwrap();
        let id = id_gen.next_id(Some("run-"));
        assert!(id.starts_with("run-"));

        let raw: u64 = id.trim_start_matches("run-").parse().unwrap();
        let (ms, instance, _) = decompose(raw);
        assert_eq!(instance, 7);
        assert!(ms >= EPOCH_MS);
    }

    #[test]
    fn test_no_duplicates_across_threads() {
        let id_gen = Arc::new(IdGenerator::new(3).unwrap());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let id_gen = id_gen.clone();
                std::thread::spawn(move || (0..5_000).map(|_| id_gen.next_raw()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id), "duplicate id {}", id);
            }
        }
        assert_eq!(seen.len(), 40_000);
    }

    #[test]
    fn test_generators_sharing_an_instance_never_collide() {
        let first = IdGenerator::new(11).unwrap();
        let second = IdGenerator::new(11).unwrap();

        let mut seen = HashSet::new();
        for _ in 0..1_000 {
            assert!(seen.insert(first.next_raw()));
            assert!(seen.insert(second.next_raw()));
        }
        assert_eq!(seen.len(), 2_000);
    }

    #[test]
    fn test_separate_generators_across_threads() {
        let handles: Vec<_> = (0..4)
            .map(|_| {
                std::thread::spawn(|| {
                    let id_gen = IdGenerator::new(12).unwrap();
                    (0..2_000).map(|_| id_gen.next_raw()).collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id), "duplicate id {}", id);
            }
        }
    }

    #[test]
    fn test_process_instance_is_never_zero() {
        let id_gen = IdGenerator::for_process();
        assert_eq!(id_gen.instance(), process_instance());
        assert!((1..=MAX_INSTANCE).contains(&id_gen.instance()));
        let (_, instance, _) = decompose(id_gen.next_raw());
        assert_eq!(instance, id_gen.instance());
    }
}
