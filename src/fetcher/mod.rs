pub mod downloader;
pub mod http_client;
pub mod retry;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use url::Url;

use crate::app::Result;

pub use downloader::{DownloadMode, DownloadResult, Downloader, HttpDownloader, RefreshPolicy};
pub use http_client::ReqwestHttpClient;
pub use retry::{retry_io, RetryPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Head,
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
}

impl HttpRequest {
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::Get,
            url,
            headers: HeaderMap::new(),
        }
    }

    pub fn head(url: Url) -> Self {
        Self {
            method: Method::Head,
            url,
            headers: HeaderMap::new(),
        }
    }
}

/// Response body read chunk by chunk so large lists never sit in memory.
#[async_trait]
pub trait ResponseBody: Send {
    /// Next chunk of the body, `None` once exhausted.
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>>;
}

pub struct HttpResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Box<dyn ResponseBody>,
}

impl HttpResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Reads at most `limit` bytes of the body, lossily decoded.
    pub async fn body_prefix(&mut self, limit: usize) -> String {
        let mut buf = Vec::new();
        while buf.len() < limit {
            match self.body.next_chunk().await {
                Ok(Some(chunk)) => buf.extend_from_slice(&chunk),
                _ => break,
            }
        }
        buf.truncate(limit);
        String::from_utf8_lossy(&buf).into_owned()
    }
}

impl std::fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse>;
}

/// Prepends `https://` to scheme-less subscription URLs.
pub fn sanitize_url(raw: &str) -> String {
    if raw.starts_with("http://") || raw.starts_with("https://") {
        raw.to_string()
    } else {
        format!("https://{}", raw)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted HTTP client shared by downloader, telemetry and scheduler tests.
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    use reqwest::header::{HeaderName, HeaderValue};

    use super::*;
    use crate::app::SyncError;

    pub struct StaticBody(Option<Vec<u8>>);

    #[async_trait]
    impl ResponseBody for StaticBody {
        async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
            Ok(self.0.take())
        }
    }

    #[derive(Clone)]
    pub enum Scripted {
        Response {
            status: u16,
            headers: Vec<(&'static str, String)>,
            body: Vec<u8>,
        },
        ConnectError,
    }

    impl Scripted {
        pub fn ok(body: &str) -> Self {
            Scripted::Response {
                status: 200,
                headers: Vec::new(),
                body: body.as_bytes().to_vec(),
            }
        }

        pub fn status(status: u16) -> Self {
            Scripted::Response {
                status,
                headers: Vec::new(),
                body: Vec::new(),
            }
        }

        pub fn with_header(self, name: &'static str, value: &str) -> Self {
            match self {
                Scripted::Response {
                    status,
                    mut headers,
                    body,
                } => {
                    headers.push((name, value.to_string()));
                    Scripted::Response {
                        status,
                        headers,
                        body,
                    }
                }
                other => other,
            }
        }
    }

    /// Replies per URL path from a queue; the last entry of a queue repeats.
    #[derive(Default)]
    pub struct FakeHttpClient {
        routes: Mutex<HashMap<String, VecDeque<Scripted>>>,
        pub requests: Mutex<Vec<HttpRequest>>,
    }

    impl FakeHttpClient {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn route(&self, path: &str, reply: Scripted) {
            self.routes
                .lock()
                .unwrap()
                .entry(path.to_string())
                .or_default()
                .push_back(reply);
        }

        pub fn requests_to(&self, path: &str) -> Vec<HttpRequest> {
            self.requests
                .lock()
                .unwrap()
                .iter()
                .filter(|r| r.url.path() == path)
                .cloned()
                .collect()
        }

        pub fn request_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl HttpClient for FakeHttpClient {
        async fn send(&self, request: &HttpRequest) -> Result<HttpResponse> {
            self.requests.lock().unwrap().push(request.clone());
            let reply = {
                let mut routes = self.routes.lock().unwrap();
                let queue = routes
                    .get_mut(request.url.path())
                    .ok_or_else(|| SyncError::Other(format!("no route for {}", request.url)))?;
                if queue.len() > 1 {
                    queue.pop_front()
                } else {
                    queue.front().cloned()
                }
            };
            match reply {
                Some(Scripted::Response {
                    status,
                    headers,
                    body,
                }) => {
                    let mut map = HeaderMap::new();
                    for (name, value) in headers {
                        map.insert(
                            HeaderName::from_static(name),
                            HeaderValue::from_str(&value).unwrap(),
                        );
                    }
                    let body = if request.method == Method::Head {
                        None
                    } else {
                        Some(body)
                    };
                    Ok(HttpResponse {
                        status,
                        headers: map,
                        body: Box::new(StaticBody(body)),
                    })
                }
                Some(Scripted::ConnectError) | None => {
                    Err(SyncError::Other("connection refused".to_string()))
                }
            }
        }
    }
}
