//! Time source for the decision engine.
//!
//! Every "now" the scheduler and its evaluators see comes from a [`Clock`],
//! so a whole decision pass can be replayed at a fixed instant in tests.

use chrono::{DateTime, Duration, TimeZone, Utc};
use chrono_tz::Tz;
use parking_lot::Mutex;

pub trait Clock: Send + Sync {
    /// Current instant in the installation's local timezone.
    fn now(&self) -> DateTime<Tz>;

    fn timezone(&self) -> Tz;
}

/// Wall clock in a configured IANA timezone.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    tz: Tz,
}

impl SystemClock {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Tz> {
        Utc::now().with_timezone(&self.tz)
    }

    fn timezone(&self) -> Tz {
        self.tz
    }
}

/// Manually driven clock for simulations and tests.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Tz>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Tz>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// Build from a local wall-clock reading. Ambiguous readings (DST fold)
    /// resolve to the earlier instant; `None` inside a DST gap.
    pub fn at_local(
        tz: Tz,
        year: i32,
        month: u32,
        day: u32,
        hour: u32,
        minute: u32,
    ) -> Option<Self> {
        tz.with_ymd_and_hms(year, month, day, hour, minute, 0)
            .earliest()
            .map(Self::new)
    }

    pub fn set(&self, now: DateTime<Tz>) {
        *self.now.lock() = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Tz> {
        *self.now.lock()
    }

    fn timezone(&self) -> Tz {
        self.now.lock().timezone()
    }
}
