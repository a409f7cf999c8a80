// src/ingest/http.rs
//! HTTP seam used by the adapters. Production goes through reqwest; tests
//! hand the adapters a [`StubFetcher`] with canned responses.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::ingest::types::FetchError;

pub const BROWSER_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
}

impl HttpResponse {
    pub fn ok(content_type: &str, body: &str) -> Self {
        Self {
            status: 200,
            content_type: Some(content_type.to_string()),
            body: body.to_string(),
        }
    }

    pub fn status(status: u16, body: &str) -> Self {
        Self {
            status,
            content_type: None,
            body: body.to_string(),
        }
    }
}

#[async_trait::async_trait]
pub trait HttpFetch: Send + Sync {
    /// GET `url` with extra request headers. Non-2xx statuses are returned, not raised.
    async fn get(&self, url: &str, headers: &[(&str, String)]) -> Result<HttpResponse, FetchError>;
}

pub struct ReqwestFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl ReqwestFetcher {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(BROWSER_UA)
            .connect_timeout(Duration::from_secs(10).min(timeout))
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Network(e.to_string()))?;
        Ok(Self { client, timeout })
    }

    /// The client-wide timeout covers connect, send and body read alike.
    fn classify(&self, err: reqwest::Error, url: &str) -> FetchError {
        tracing::debug!(error = %err, %url, "http get failed");
        if err.is_timeout() {
            FetchError::Timeout(self.timeout)
        } else {
            FetchError::Network(err.to_string())
        }
    }
}

#[async_trait::async_trait]
impl HttpFetch for ReqwestFetcher {
    async fn get(&self, url: &str, headers: &[(&str, String)]) -> Result<HttpResponse, FetchError> {
        let mut req = self.client.get(url);
        for (k, v) in headers {
            req = req.header(*k, v.as_str());
        }
        let resp = req.send().await.map_err(|e| self.classify(e, url))?;
        let status = resp.status().as_u16();
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = resp.text().await.map_err(|e| self.classify(e, url))?;
        Ok(HttpResponse {
            status,
            content_type,
            body,
        })
    }
}

// --- Test helper ---

/// Canned responses keyed by exact URL. Unknown URLs fail as network errors.
/// Records every request so tests can assert on order and headers.
#[derive(Default)]
pub struct StubFetcher {
    routes: HashMap<String, Result<HttpResponse, FetchError>>,
    pub calls: Mutex<Vec<(String, Vec<(String, String)>)>>,
}

impl StubFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(mut self, url: &str, resp: HttpResponse) -> Self {
        self.routes.insert(url.to_string(), Ok(resp));
        self
    }

    pub fn fail(mut self, url: &str, err: FetchError) -> Self {
        self.routes.insert(url.to_string(), Err(err));
        self
    }

    pub fn requested_urls(&self) -> Vec<String> {
        match self.calls.lock() {
            Ok(c) => c.iter().map(|(u, _)| u.clone()).collect(),
            Err(poison) => poison.into_inner().iter().map(|(u, _)| u.clone()).collect(),
        }
    }
}

#[async_trait::async_trait]
impl HttpFetch for StubFetcher {
    async fn get(&self, url: &str, headers: &[(&str, String)]) -> Result<HttpResponse, FetchError> {
        let recorded = headers
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        if let Ok(mut c) = self.calls.lock() {
            c.push((url.to_string(), recorded));
        }
        self.routes
            .get(url)
            .cloned()
            .unwrap_or_else(|| Err(FetchError::Network(format!("no route for {url}"))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn stalled_body_reports_configured_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            // headers promise a body that never arrives
            sock.write_all(b"HTTP/1.1 200 OK\r\ncontent-type: text/xml\r\ncontent-length: 100\r\n\r\n<rss>")
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(sock);
        });

        let timeout = Duration::from_millis(300);
        let fetcher = ReqwestFetcher::new(timeout).unwrap();
        let err = fetcher
            .get(&format!("http://{addr}/feed"), &[])
            .await
            .unwrap_err();
        assert_eq!(err, FetchError::Timeout(timeout));
    }
}
