//! Clock and randomness abstractions
//!
//! TigerStyle: Non-deterministic inputs go through traits.
//!
//! The runtime reads time (envelope timestamps, task delays) and randomness
//! (generated actor IDs, failure IDs) only through these providers, so tests
//! can pin both.
//!
//! ```text
//!        Stage / Agent
//!             │
//!     ┌───────┴────────┐
//!     │   IoContext    │
//!     └───────┬────────┘
//!      ┌──────┴──────┐
//!  WallClockTime  ManualClock
//!  StdRngProvider (seeded)
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

// ============================================================================
// Time Provider
// ============================================================================

/// Source of wall-clock time for the runtime
pub trait TimeProvider: Send + Sync + std::fmt::Debug {
    /// Current time in milliseconds since epoch
    fn now_ms(&self) -> u64;

    /// Monotonic timestamp for measuring durations
    fn monotonic_ms(&self) -> u64 {
        self.now_ms()
    }
}

/// Production time provider using the system clock
#[derive(Debug, Clone, Default)]
pub struct WallClockTime;

impl WallClockTime {
    /// Create a new wall clock time provider
    pub fn new() -> Self {
        Self
    }
}

impl TimeProvider for WallClockTime {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Clock that only moves when told to
///
/// Pins envelope timestamps in tests without real delays.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicU64,
}

impl ManualClock {
    /// Create a clock reading `start_ms`
    pub fn new(start_ms: u64) -> Self {
        Self {
            now_ms: AtomicU64::new(start_ms),
        }
    }

    /// Move the clock forward
    pub fn advance_ms(&self, ms: u64) {
        self.now_ms.fetch_add(ms, Ordering::SeqCst);
    }
}

impl TimeProvider for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

// ============================================================================
// RNG Provider
// ============================================================================

/// Random number source for generated identifiers
pub trait RngProvider: Send + Sync + std::fmt::Debug {
    /// Generate a random u64
    fn next_u64(&self) -> u64;

    /// Generate a random UUID v4 string
    fn gen_uuid(&self) -> String {
        let raw = ((self.next_u64() as u128) << 64) | self.next_u64() as u128;
        // Version 4, variant 1
        let raw = (raw & !(0xf << 76)) | (0x4 << 76);
        let raw = (raw & !(0x3 << 62)) | (0x2 << 62);
        let hex = format!("{:032x}", raw);
        format!(
            "{}-{}-{}-{}-{}",
            &hex[0..8],
            &hex[8..12],
            &hex[12..16],
            &hex[16..20],
            &hex[20..32]
        )
    }
}

/// Production RNG provider (xorshift64*, lock-free)
///
/// Not cryptographically secure; IDs only need to be unlikely to collide.
#[derive(Debug)]
pub struct StdRngProvider {
    state: AtomicU64,
}

impl Default for StdRngProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl StdRngProvider {
    /// Create a new RNG provider seeded from system time
    pub fn new() -> Self {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0x9E37_79B9_7F4A_7C15);
        Self::with_seed(seed)
    }

    /// Create with a specific seed (for tests)
    pub fn with_seed(seed: u64) -> Self {
        // xorshift never leaves zero
        let seed = if seed == 0 { 0x9E37_79B9_7F4A_7C15 } else { seed };
        Self {
            state: AtomicU64::new(seed),
        }
    }
}

impl RngProvider for StdRngProvider {
    fn next_u64(&self) -> u64 {
        let mut state = self.state.load(Ordering::Relaxed);
        loop {
            let mut x = state;
            x ^= x >> 12;
            x ^= x << 25;
            x ^= x >> 27;

            match self
                .state
                .compare_exchange_weak(state, x, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => return x.wrapping_mul(0x2545_F491_4F6C_DD1D),
                Err(current) => state = current,
            }
        }
    }
}

// ============================================================================
// I/O Context
// ============================================================================

/// Bundle of the providers a stage hands to its actors
#[derive(Debug, Clone)]
pub struct IoContext {
    /// Time provider
    pub time: Arc<dyn TimeProvider>,
    /// RNG provider
    pub rng: Arc<dyn RngProvider>,
}

impl Default for IoContext {
    fn default() -> Self {
        Self::production()
    }
}

impl IoContext {
    /// Real wall clock and RNG
    pub fn production() -> Self {
        Self {
            time: Arc::new(WallClockTime::new()),
            rng: Arc::new(StdRngProvider::new()),
        }
    }

    /// Custom providers
    pub fn new(time: Arc<dyn TimeProvider>, rng: Arc<dyn RngProvider>) -> Self {
        Self { time, rng }
    }

    /// Current time in milliseconds
    pub fn now_ms(&self) -> u64 {
        self.time.now_ms()
    }

    /// Generate a UUID
    pub fn gen_uuid(&self) -> String {
        self.rng.gen_uuid()
    }
}
