use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::app::Result;
use crate::fetcher::{HttpClient, HttpRequest, HttpResponse, Method, ResponseBody};

pub struct ReqwestHttpClient {
    client: Client,
}

impl ReqwestHttpClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .gzip(true)
            .brotli(true)
            .user_agent(concat!("filtersync/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client })
    }
}

struct ReqwestBody(reqwest::Response);

#[async_trait]
impl ResponseBody for ReqwestBody {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        Ok(self.0.chunk().await?.map(|bytes| bytes.to_vec()))
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse> {
        let builder = match request.method {
            Method::Get => self.client.get(request.url.clone()),
            Method::Head => self.client.head(request.url.clone()),
        };

        let response = builder.headers(request.headers.clone()).send().await?;
        tracing::debug!(url = %request.url, status = response.status().as_u16(), "HTTP response");

        Ok(HttpResponse {
            status: response.status().as_u16(),
            headers: response.headers().clone(),
            body: Box::new(ReqwestBody(response)),
        })
    }
}
