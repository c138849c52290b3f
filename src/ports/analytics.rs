//! Fire-and-forget analytics. Never gates sync logic.
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalyticsEvent {
    DownloadFailed,
    FilterListRequested,
    HeadRequestFailed,
    HeadResponseDateParsingFailed,
    SyncSucceeded,
    SyncFailed,
}

impl AnalyticsEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalyticsEvent::DownloadFailed => "download_failed",
            AnalyticsEvent::FilterListRequested => "filter_list_requested",
            AnalyticsEvent::HeadRequestFailed => "head_request_failed",
            AnalyticsEvent::HeadResponseDateParsingFailed => "head_response_date_parsing_failed",
            AnalyticsEvent::SyncSucceeded => "sync_succeeded",
            AnalyticsEvent::SyncFailed => "sync_failed",
        }
    }
}

pub trait Analytics: Send + Sync {
    fn log_event(&self, event: AnalyticsEvent);
    fn log_error(&self, message: &str);
    fn log_exception(&self, err: &(dyn std::error::Error + 'static));
    fn set_user_property(&self, name: &str, value: &str);
}

/// Writes analytics as structured tracing events under the `analytics` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAnalytics;

impl Analytics for TracingAnalytics {
    fn log_event(&self, event: AnalyticsEvent) {
        info!(target: "analytics", event = event.as_str(), "analytics event");
    }

    fn log_error(&self, message: &str) {
        warn!(target: "analytics", message, "analytics error");
    }

    fn log_exception(&self, err: &(dyn std::error::Error + 'static)) {
        error!(target: "analytics", error = %err, "analytics exception");
    }

    fn set_user_property(&self, name: &str, value: &str) {
        info!(target: "analytics", name, value, "analytics user property");
    }
}
