use chrono::{Local, NaiveDateTime};

/// Source of local wall-clock time for the ledger.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

/// The system's local time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::Clock;
    use chrono::{Duration, NaiveDate, NaiveDateTime};
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// Hand-driven clock shared between a test and the ledger under test.
    #[derive(Clone)]
    pub struct ManualClock(Arc<Mutex<NaiveDateTime>>);

    impl ManualClock {
        pub fn at(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> Self {
            let t = NaiveDate::from_ymd_opt(y, m, d)
                .unwrap()
                .and_hms_opt(h, min, s)
                .unwrap();
            Self(Arc::new(Mutex::new(t)))
        }

        pub fn advance(&self, by: Duration) {
            *self.0.lock() += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> NaiveDateTime {
            *self.0.lock()
        }
    }
}
