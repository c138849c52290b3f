use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderValue, IF_MODIFIED_SINCE, IF_NONE_MATCH};
use sha2::{Digest, Sha256};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};
use url::Url;

use crate::app::{Result, SyncError};
use crate::domain::{AppInfo, DownloadedSubscription, Subscription};
use crate::fetcher::{retry_io, sanitize_url, HttpClient, HttpRequest, HttpResponse, RetryPolicy};
use crate::filters::{is_filter_rule, parse_version, resolve_version};
use crate::ports::{Analytics, AnalyticsEvent, Clock, Connectivity, NetworkState};
use crate::store::CoreStore;

pub const HTTP_ERROR_LOG_HEADER: &str = "HttpDownloader HTTP error, return code";
const HTTP_ERROR_MAX_HEADERS_SIZE: usize = 1024;
const HTTP_ERROR_MAX_BODY_SIZE: usize = 512;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadResult {
    /// New content stored on disk
    Success(DownloadedSubscription),
    /// Server confirmed the cached copy (HTTP 304)
    NotModified(DownloadedSubscription),
    /// Carries the previous record while its file still exists
    Failed(Option<DownloadedSubscription>),
}

impl DownloadResult {
    pub fn is_successful(&self) -> bool {
        matches!(self, DownloadResult::Success(_) | DownloadResult::NotModified(_))
    }

    pub fn subscription(&self) -> Option<&DownloadedSubscription> {
        match self {
            DownloadResult::Success(s) | DownloadResult::NotModified(s) => Some(s),
            DownloadResult::Failed(s) => s.as_ref(),
        }
    }
}

/// Why a subscription is being downloaded; decides whether the cached copy is enough.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DownloadMode {
    pub forced: bool,
    pub periodic: bool,
    /// The URL was not part of the last synced state.
    pub new_subscription: bool,
}

impl DownloadMode {
    pub fn forced() -> Self {
        Self {
            forced: true,
            ..Self::default()
        }
    }
}

/// How long a cached list stays fresh for new-subscription and periodic passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshPolicy {
    pub new_subscription: Duration,
    pub metered: Duration,
    pub unmetered: Duration,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            new_subscription: Duration::from_secs(60 * 60),
            metered: Duration::from_secs(3 * 24 * 60 * 60),
            unmetered: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl RefreshPolicy {
    fn interval(&self, new_subscription: bool, network: NetworkState) -> Duration {
        if new_subscription {
            self.new_subscription
        } else if network == NetworkState::Metered {
            self.metered
        } else {
            self.unmetered
        }
    }
}

#[async_trait]
pub trait Downloader: Send + Sync {
    async fn download(&self, subscription: &Subscription, mode: DownloadMode) -> DownloadResult;

    /// Checks that the list is reachable without fetching its body.
    async fn validate(&self, subscription: &Subscription) -> bool;
}

pub struct HttpDownloader {
    http: Arc<dyn HttpClient>,
    store: Arc<dyn CoreStore>,
    analytics: Arc<dyn Analytics>,
    clock: Arc<dyn Clock>,
    connectivity: Arc<dyn Connectivity>,
    app_info: AppInfo,
    downloads_dir: PathBuf,
    retry: RetryPolicy,
    refresh: RefreshPolicy,
    cancel: CancellationToken,
}

impl HttpDownloader {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        http: Arc<dyn HttpClient>,
        store: Arc<dyn CoreStore>,
        analytics: Arc<dyn Analytics>,
        clock: Arc<dyn Clock>,
        connectivity: Arc<dyn Connectivity>,
        app_info: AppInfo,
        downloads_dir: impl Into<PathBuf>,
        retry: RetryPolicy,
        refresh: RefreshPolicy,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            http,
            store,
            analytics,
            clock,
            connectivity,
            app_info,
            downloads_dir: downloads_dir.into(),
            retry,
            refresh,
            cancel,
        }
    }

    /// Forced passes always hit the network. New subscriptions and periodic passes
    /// reuse the cached file until it expires, other passes whenever it exists.
    fn can_skip_download(&self, previous: &DownloadedSubscription, mode: DownloadMode) -> bool {
        let exists = previous.exists();
        if mode.forced {
            return false;
        }
        if !(mode.new_subscription || mode.periodic) {
            return exists;
        }

        let network = self.connectivity.state();
        let interval = self.refresh.interval(mode.new_subscription, network);
        let expired = match previous.last_updated {
            Some(at) => (self.clock.now() - at)
                .to_std()
                .is_ok_and(|elapsed| elapsed > interval),
            None => true,
        };
        debug!(
            "Url: {}: {:?}, expired: {}, exists: {}, network: {:?}",
            previous.url, mode, expired, exists, network
        );
        !expired && exists
    }

    /// Stored record for the URL, or a fresh one pointing at its deterministic path.
    fn previous_download(&self, subscription: &Subscription) -> Result<DownloadedSubscription> {
        let data = self.store.get()?;
        if let Some(existing) = data.downloaded(&subscription.url) {
            return Ok(existing.clone());
        }
        let path = self.downloads_dir.join(file_name_for(&subscription.url));
        Ok(DownloadedSubscription::new(subscription.url.clone(), path))
    }

    fn create_url(&self, subscription: &Subscription, previous: &DownloadedSubscription) -> Result<Url> {
        let mut url = Url::parse(&sanitize_url(&subscription.url))?;
        self.app_info.append_query(&mut url);
        url.query_pairs_mut()
            .append_pair("lastVersion", &previous.version)
            .append_pair("downloadCount", &previous.download_count_param());
        Ok(url)
    }

    fn create_download_request(
        &self,
        url: Url,
        previous: &DownloadedSubscription,
        forced: bool,
    ) -> HttpRequest {
        let mut request = HttpRequest::get(url);
        // Validators only make sense while the cached file is still there
        if !forced && previous.exists() {
            if !previous.last_modified.is_empty() {
                if let Ok(value) = HeaderValue::from_str(&previous.last_modified) {
                    request.headers.insert(IF_MODIFIED_SINCE, value);
                }
            }
            if !previous.etag.is_empty() {
                if let Ok(value) = HeaderValue::from_str(&previous.etag) {
                    request.headers.insert(IF_NONE_MATCH, value);
                }
            }
        }
        request
    }

    async fn try_download(
        &self,
        subscription: &Subscription,
        previous: &DownloadedSubscription,
        forced: bool,
    ) -> Result<DownloadResult> {
        let url = self.create_url(subscription, previous)?;
        let request = self.create_download_request(url, previous, forced);

        debug!("Downloading {} - previous subscription: {:?}", request.url, previous);
        let mut response = retry_io(subscription.display_title(), self.retry, &self.cancel, || {
            self.http.send(&request)
        })
        .await?;

        match response.status {
            200 => {
                let temp = write_temp_file(&mut response, &previous.path).await?;
                let version = read_version(&temp).await?;
                temp.persist(&previous.path)?;

                Ok(DownloadResult::Success(DownloadedSubscription {
                    last_updated: Some(self.clock.now()),
                    last_modified: response.header("last-modified").unwrap_or_default().to_string(),
                    version,
                    etag: response.header("etag").unwrap_or_default().to_string(),
                    download_count: previous.download_count.saturating_add(1),
                    ..previous.clone()
                }))
            }
            304 => Ok(DownloadResult::NotModified(DownloadedSubscription {
                last_updated: Some(self.clock.now()),
                ..previous.clone()
            })),
            code => {
                error!("Error downloading {}, response code: {}", request.url, code);
                let report = http_error_report(code, &mut response).await;
                self.analytics.log_error(&report);
                self.analytics.log_event(AnalyticsEvent::DownloadFailed);
                Ok(DownloadResult::Failed(previous.clone().if_exists()))
            }
        }
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn download(&self, subscription: &Subscription, mode: DownloadMode) -> DownloadResult {
        let previous = match self.previous_download(subscription) {
            Ok(previous) => previous,
            Err(e) => {
                error!("Cannot load cache record for {}: {}", subscription.url, e);
                self.analytics.log_exception(&e);
                return DownloadResult::Failed(None);
            }
        };

        if self.can_skip_download(&previous, mode) {
            debug!("Returning pre-downloaded subscription: {}", previous.url);
            return DownloadResult::NotModified(previous);
        }

        match self.try_download(subscription, &previous, mode.forced).await {
            Ok(result) => result,
            Err(e) => {
                error!("Error downloading {}: {}", previous.url, e);
                if !e.is_cancelled() {
                    self.analytics.log_exception(&e);
                }
                DownloadResult::Failed(previous.if_exists())
            }
        }
    }

    async fn validate(&self, subscription: &Subscription) -> bool {
        let default = DownloadedSubscription::new(subscription.url.clone(), PathBuf::new());
        let url = match self.create_url(subscription, &default) {
            Ok(url) => url,
            Err(e) => {
                error!("Invalid subscription url {}: {}", subscription.url, e);
                return false;
            }
        };
        let request = HttpRequest::head(url);

        match retry_io(subscription.display_title(), self.retry, &self.cancel, || {
            self.http.send(&request)
        })
        .await
        {
            Ok(response) => response.status == 200,
            Err(e) => {
                error!("Error validating {}: {}", subscription.url, e);
                false
            }
        }
    }
}

/// `<hash>-<last path segment>`, stable for a given URL.
pub fn file_name_for(url: &str) -> String {
    let digest = hex::encode(Sha256::digest(url.as_bytes()));
    let segment = Url::parse(&sanitize_url(url))
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut s| s.next_back().map(str::to_string))
        })
        .unwrap_or_default();
    let segment: String = segment
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
        .collect();
    let segment = if segment.is_empty() {
        "list.txt".to_string()
    } else {
        segment
    };
    format!("{}-{}", &digest[..16], segment)
}

/// Streams the body next to `target` so the final rename stays on one filesystem.
async fn write_temp_file(response: &mut HttpResponse, target: &Path) -> Result<tempfile::TempPath> {
    let dir = target
        .parent()
        .ok_or_else(|| SyncError::Other(format!("no parent for {}", target.display())))?;
    tokio::fs::create_dir_all(dir).await?;

    let temp = tempfile::Builder::new()
        .prefix("list")
        .suffix(".tmp")
        .tempfile_in(dir)?;
    let (file, temp_path) = temp.into_parts();
    let mut file = tokio::fs::File::from_std(file);

    while let Some(chunk) = response.body.next_chunk().await? {
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    file.sync_all().await?;

    Ok(temp_path)
}

async fn read_version(path: &Path) -> Result<String> {
    let file = tokio::fs::File::open(path).await?;
    let mut lines = BufReader::new(file).lines();
    let mut header = Vec::new();
    while let Some(line) = lines.next_line().await? {
        if is_filter_rule(line.trim_end_matches('\r')) {
            break;
        }
        header.push(line);
    }
    resolve_version(parse_version(header.iter().map(String::as_str)))
        .map_err(|e| SyncError::Parse(e.to_string()))
}

async fn http_error_report(code: u16, response: &mut HttpResponse) -> String {
    let mut headers = String::new();
    for (name, value) in response.headers.iter() {
        headers.push_str(name.as_str());
        headers.push_str(": ");
        headers.push_str(value.to_str().unwrap_or("<binary>"));
        headers.push('\n');
    }
    let headers: String = headers.chars().take(HTTP_ERROR_MAX_HEADERS_SIZE).collect();
    let body = response.body_prefix(HTTP_ERROR_MAX_BODY_SIZE).await;
    format!(
        "{} {}\nHeaders:\n{}\nBody:\n{}",
        HTTP_ERROR_LOG_HEADER, code, headers, body
    )
}
