use std::thread;
use std::time::Duration;

use parking_lot::RwLock;
use reqwest::blocking::{Client as HttpClient, Response};
use reqwest::header::REFERER;
use serde::de::DeserializeOwned;

use crate::config::Config;

/// Statuses that are never worth retrying.
pub const PERMANENT_STATUSES: [u16; 2] = [404, 410];

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request failed with status {0}")]
    Status(u16),
    #[error("transport failure: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("failed to decode response body: {0}")]
    Decode(#[source] reqwest::Error),
}

/// Header profile for a request. Metadata lookups carry the application
/// identifier and the session write-claim; write-adjacent lookups add the
/// csrf token and the requested-via-script marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestScope {
    Plain,
    Claim,
    Csrf,
}

/// Tokens read from the host session. The claim token lives in session
/// storage and the csrf token in a cookie; both are provided by the
/// embedding host and can be refreshed mid-session.
#[derive(Debug, Clone, Default)]
pub struct SessionTokens {
    pub app_id: String,
    pub claim: Option<String>,
    pub csrf: Option<String>,
}

pub struct Client {
    http: HttpClient,
    referer: String,
    backoff: Duration,
    tokens: RwLock<SessionTokens>,
}

impl Client {
    pub fn new(config: &Config, http_client: Option<HttpClient>) -> anyhow::Result<Self> {
        let http = match http_client {
            Some(client) => client,
            None => HttpClient::builder().timeout(config.fetch.timeout).build()?,
        };

        Ok(Client {
            http,
            referer: config.api.referer.clone(),
            backoff: config.fetch.backoff,
            tokens: RwLock::new(SessionTokens {
                app_id: config.api.app_id.clone(),
                claim: None,
                csrf: None,
            }),
        })
    }

    pub fn set_tokens(&self, tokens: SessionTokens) {
        *self.tokens.write() = tokens;
    }

    pub fn set_app_id(&self, app_id: &str) {
        self.tokens.write().app_id = app_id.to_string();
    }

    /// GET with a bounded retry budget and a fixed backoff between
    /// attempts. Permanent statuses fail immediately carrying the status.
    pub fn fetch(
        &self,
        url: &str,
        retries: u32,
        scope: RequestScope,
    ) -> Result<Response, FetchError> {
        let mut remaining = retries;
        loop {
            match self.send(url, scope) {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return Ok(resp);
                    }
                    let code = status.as_u16();
                    if PERMANENT_STATUSES.contains(&code) || remaining == 0 {
                        return Err(FetchError::Status(code));
                    }
                    tracing::debug!(url, code, remaining, "retrying after fixed backoff");
                }
                Err(err) => {
                    if remaining == 0 {
                        return Err(FetchError::Transport(err));
                    }
                    tracing::debug!(url, remaining, error = %err, "transport failure, retrying");
                }
            }
            thread::sleep(self.backoff);
            remaining -= 1;
        }
    }

    pub fn fetch_json<T>(
        &self,
        url: &str,
        retries: u32,
        scope: RequestScope,
    ) -> Result<T, FetchError>
    where
        T: DeserializeOwned,
    {
        let resp = self.fetch(url, retries, scope)?;
        resp.json().map_err(FetchError::Decode)
    }

    pub fn fetch_text(
        &self,
        url: &str,
        retries: u32,
        scope: RequestScope,
    ) -> Result<String, FetchError> {
        let resp = self.fetch(url, retries, scope)?;
        resp.text().map_err(FetchError::Decode)
    }

    pub fn fetch_bytes(&self, url: &str, retries: u32) -> Result<Vec<u8>, FetchError> {
        let resp = self.fetch(url, retries, RequestScope::Plain)?;
        let bytes = resp.bytes().map_err(FetchError::Decode)?;
        Ok(bytes.to_vec())
    }

    fn send(&self, url: &str, scope: RequestScope) -> reqwest::Result<Response> {
        let tokens = self.tokens.read().clone();
        let mut req = self.http.get(url).header(REFERER, self.referer.clone());
        if scope != RequestScope::Plain {
            req = req.header("x-ig-app-id", tokens.app_id.clone());
            if let Some(claim) = &tokens.claim {
                req = req.header("x-ig-www-claim", claim.clone());
            }
        }
        if scope == RequestScope::Csrf {
            if let Some(csrf) = &tokens.csrf {
                req = req.header("x-csrftoken", csrf.clone());
            }
            req = req.header("x-requested-with", "XMLHttpRequest");
        }
        req.send()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    fn test_client() -> Client {
        let mut config = Config::default();
        config.fetch.backoff = Duration::from_millis(1);
        Client::new(&config, None).unwrap()
    }

    fn serve_statuses(statuses: Vec<u16>) -> (String, Arc<AtomicUsize>, thread::JoinHandle<()>) {
        let server = tiny_http::Server::http("127.0.0.1:0").unwrap();
        let addr = server.server_addr().to_ip().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let handle = thread::spawn(move || {
            for status in statuses {
                let request = match server.recv() {
                    Ok(rq) => rq,
                    Err(_) => return,
                };
                counter.fetch_add(1, Ordering::SeqCst);
                let response =
                    tiny_http::Response::from_string("{}").with_status_code(status as i32);
                let _ = request.respond(response);
            }
        });
        (format!("http://{}/", addr), hits, handle)
    }

    #[test]
    fn retries_transient_statuses_until_success() {
        let (url, hits, handle) = serve_statuses(vec![503, 503, 200]);
        let client = test_client();
        let resp = client.fetch(&url, 2, RequestScope::Plain).unwrap();
        assert!(resp.status().is_success());
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        handle.join().unwrap();
    }

    #[test]
    fn exhausted_budget_fails_with_status() {
        let (url, hits, handle) = serve_statuses(vec![503, 503]);
        let client = test_client();
        let err = client.fetch(&url, 1, RequestScope::Plain).unwrap_err();
        assert!(matches!(err, FetchError::Status(503)));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        handle.join().unwrap();
    }

    #[test]
    fn permanent_status_fails_without_retry() {
        let (url, hits, handle) = serve_statuses(vec![404]);
        let client = test_client();
        let err = client.fetch(&url, 5, RequestScope::Plain).unwrap_err();
        assert!(matches!(err, FetchError::Status(404)));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        handle.join().unwrap();
    }

    #[test]
    fn gone_is_also_permanent() {
        let (url, hits, handle) = serve_statuses(vec![410]);
        let client = test_client();
        let err = client.fetch(&url, 2, RequestScope::Plain).unwrap_err();
        assert!(matches!(err, FetchError::Status(410)));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        handle.join().unwrap();
    }
}
