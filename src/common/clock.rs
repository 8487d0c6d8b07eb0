use chrono::{DateTime, TimeZone, Utc};

/// Wall-clock abstraction.
///
/// The engine never consults the system time directly; every component
/// that needs "now" receives a clock through the index construction
/// context so tests can pin time.
pub trait Clock: Send + Sync + 'static {
    fn utc_now(&self) -> DateTime<Utc>;

    fn utc_now_millis(&self) -> i64 {
        self.utc_now().timestamp_millis()
    }
}

/// Production clock backed by the OS.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn utc_now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

pub fn datetime_from_millis(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis).single().unwrap_or_default()
}

#[cfg(test)]
pub mod test_support {
    use std::sync::atomic::{AtomicI64, Ordering};

    use super::*;

    /// Deterministic clock for tests; advances only when told to.
    #[derive(Debug, Default)]
    pub struct FixedClock {
        millis: AtomicI64,
    }

    impl FixedClock {
        pub fn at(millis: i64) -> FixedClock {
            FixedClock { millis: AtomicI64::new(millis) }
        }

        pub fn advance(&self, by_millis: i64) {
            self.millis.fetch_add(by_millis, Ordering::SeqCst);
        }
    }

    impl Clock for FixedClock {
        fn utc_now(&self) -> DateTime<Utc> {
            datetime_from_millis(self.millis.load(Ordering::SeqCst))
        }
    }
}
