//! Seams to the world outside the sync engine.
pub mod analytics;
pub mod clock;
pub mod connectivity;

pub use analytics::{Analytics, AnalyticsEvent, TracingAnalytics};
pub use clock::{Clock, SystemClock};
pub use connectivity::{Connectivity, NetworkState, StaticConnectivity};

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use chrono::{DateTime, Duration, Utc};

    use super::*;

    /// Clock that only moves when told to.
    pub struct FixedClock(Mutex<DateTime<Utc>>);

    impl FixedClock {
        pub fn at(rfc3339: &str) -> Self {
            let now = DateTime::parse_from_rfc3339(rfc3339)
                .unwrap()
                .with_timezone(&Utc);
            Self(Mutex::new(now))
        }

        pub fn advance(&self, by: Duration) {
            let mut now = self.0.lock().unwrap();
            *now += by;
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().unwrap()
        }
    }

    #[derive(Default)]
    pub struct RecordingAnalytics {
        pub events: Mutex<Vec<AnalyticsEvent>>,
        pub errors: Mutex<Vec<String>>,
    }

    impl Analytics for RecordingAnalytics {
        fn log_event(&self, event: AnalyticsEvent) {
            self.events.lock().unwrap().push(event);
        }

        fn log_error(&self, message: &str) {
            self.errors.lock().unwrap().push(message.to_string());
        }

        fn log_exception(&self, err: &(dyn std::error::Error + 'static)) {
            self.errors.lock().unwrap().push(err.to_string());
        }

        fn set_user_property(&self, _name: &str, _value: &str) {}
    }
}
