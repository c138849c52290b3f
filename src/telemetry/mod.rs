//! Anonymous once-a-day user counting ping.
pub mod schedule;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::app::{Result, SyncError};
use crate::domain::{saturating_count, AppInfo};
use crate::fetcher::{retry_io, sanitize_url, HttpClient, HttpRequest, RetryPolicy};
use crate::ports::{Analytics, AnalyticsEvent, Clock};
use crate::settings::SettingsRepository;
use crate::store::CoreStore;

pub use schedule::{TelemetrySchedule, TelemetryScheduler};

/// Persisted token layout, always in GMT.
pub const TOKEN_FORMAT: &str = "%Y%m%d%H%M";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountResult {
    Success,
    /// Already counted during the current UTC day.
    Skipped,
    Failed,
}

#[async_trait]
pub trait UserCounter: Send + Sync {
    async fn count(&self) -> Result<CountResult>;
}

pub struct HttpUserCounter {
    http: Arc<dyn HttpClient>,
    store: Arc<dyn CoreStore>,
    settings: Arc<dyn SettingsRepository>,
    analytics: Arc<dyn Analytics>,
    clock: Arc<dyn Clock>,
    app_info: AppInfo,
    endpoint: String,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

impl HttpUserCounter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        http: Arc<dyn HttpClient>,
        store: Arc<dyn CoreStore>,
        settings: Arc<dyn SettingsRepository>,
        analytics: Arc<dyn Analytics>,
        clock: Arc<dyn Clock>,
        app_info: AppInfo,
        endpoint: impl Into<String>,
        retry: RetryPolicy,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            http,
            store,
            settings,
            analytics,
            clock,
            app_info,
            endpoint: endpoint.into(),
            retry,
            cancel,
        }
    }

    fn create_url(&self, acceptable_ads_enabled: bool, last_version: i64, count: u32) -> Result<Url> {
        let mut url = Url::parse(&sanitize_url(&self.endpoint))?;
        self.app_info.append_query(&mut url);
        url.query_pairs_mut()
            .append_pair("disabled", &(!acceptable_ads_enabled).to_string())
            .append_pair("lastVersion", &last_version.to_string())
            .append_pair("downloadCount", &saturating_count(count));
        Ok(url)
    }

    /// Token from the server clock, or from ours when the header is unusable in
    /// release builds.
    fn response_token(&self, date: Option<&str>) -> Result<i64> {
        match date.map(parse_server_date) {
            Some(Ok(token)) => Ok(token),
            parsed => {
                let reason = match parsed {
                    Some(Err(e)) => e.to_string(),
                    _ => "missing Date header".to_string(),
                };
                error!("Parsing 'Date' from header failed: {}", reason);
                self.analytics
                    .log_event(AnalyticsEvent::HeadResponseDateParsingFailed);
                if cfg!(debug_assertions) {
                    return Err(SyncError::Parse(reason));
                }
                warn!("Using client GMT time for the counting token");
                Ok(format_token(self.clock.now()))
            }
        }
    }
}

#[async_trait]
impl UserCounter for HttpUserCounter {
    async fn count(&self) -> Result<CountResult> {
        let data = self.store.get()?;
        let last = data.last_user_counting_response;
        debug!("User count lastUserCountingResponse saved is `{}`", last);

        if counted_today(last, self.clock.now()) {
            debug!("User already counted today");
            return Ok(CountResult::Skipped);
        }

        let acceptable_ads_enabled = self.settings.current().acceptable_ads_enabled;
        let url = self.create_url(acceptable_ads_enabled, last, data.user_counting_count)?;
        let request = HttpRequest::head(url);

        let response = match retry_io("User counting HEAD request", self.retry, &self.cancel, || {
            self.http.send(&request)
        })
        .await
        {
            Ok(response) => response,
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                error!("User count request failed: {}", e);
                self.analytics.log_exception(&e);
                return Ok(CountResult::Failed);
            }
        };

        if response.status != 200 {
            warn!("User count request returned {}", response.status);
            return Ok(CountResult::Failed);
        }

        debug!("User count response date: {:?}", response.header("date"));
        let token = self.response_token(response.header("date"))?;
        self.store.update(&mut |data| {
            data.last_user_counting_response = token;
            data.user_counting_count = data.user_counting_count.saturating_add(1);
        })?;
        info!("User counted, new lastUserCountingResponse `{}`", token);
        Ok(CountResult::Success)
    }
}

/// Parses an RFC 1123 `Date` header (`Thu, 23 Sep 2021 17:31:01 GMT`) into a token.
pub fn parse_server_date(header: &str) -> Result<i64> {
    let parsed = DateTime::parse_from_rfc2822(header.trim())
        .map_err(|e| SyncError::Parse(format!("bad Date header {:?}: {}", header, e)))?;
    Ok(format_token(parsed.with_timezone(&Utc)))
}

pub fn format_token(at: DateTime<Utc>) -> i64 {
    // Digits only, so this always fits
    at.format(TOKEN_FORMAT).to_string().parse().unwrap_or(0)
}

pub(crate) fn counted_today(token: i64, now: DateTime<Utc>) -> bool {
    token > 0 && token / 10_000 == format_token(now) / 10_000
}
