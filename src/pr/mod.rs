pub mod types;

pub use types::{PrStats, Subject};

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::credential::Credential;

pub const DEFAULT_API_BASE: &str = "https://api.github.com";
const GITHUB_HOST: &str = "github.com";

#[derive(Debug, Error)]
pub enum PrError {
    #[error("Invalid GitHub URL: {0}")]
    InvalidUrl(String),

    #[error("Failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Why a pull request's statistics could not be obtained.
///
/// Cloneable so that every caller joined on one fetch receives the same value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// 401/403: the credential is invalid or lacks access.
    #[error("authentication failed ({0}), token cleared")]
    Unauthorized(u16),

    #[error("pull request not found or no repository access")]
    NotFound,

    #[error("network error fetching PR stats: {0}")]
    Transport(String),

    #[error("unexpected PR response: {0}")]
    Malformed(String),
}

/// One network read per subject. Implementations never retry.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, subject: &Subject, credential: &Credential) -> Result<PrStats, FetchError>;
}

/// Parse a github.com page URL and return its path.
///
/// Only the path matters to the router; query and fragment are dropped.
pub fn parse_page_url(url: &str) -> Result<String, PrError> {
    let parsed = reqwest::Url::parse(url).map_err(|_| PrError::InvalidUrl(url.to_string()))?;

    if parsed.host_str() != Some(GITHUB_HOST) {
        return Err(PrError::InvalidUrl(url.to_string()));
    }

    Ok(parsed.path().to_string())
}

/// Derive a subject from a single-PR page path: `/{owner}/{repo}/pull/{number}`
/// with an optional trailing slash.
pub fn subject_from_path(path: &str) -> Option<Subject> {
    let rest = path.strip_prefix('/')?;
    let rest = rest.strip_suffix('/').unwrap_or(rest);
    let segments: Vec<&str> = rest.split('/').collect();

    match segments.as_slice() {
        [owner, repo, "pull", number]
            if !owner.is_empty()
                && !repo.is_empty()
                && !number.is_empty()
                && number.bytes().all(|b| b.is_ascii_digit()) =>
        {
            let number = number.parse::<u64>().ok()?;
            Some(Subject::new(*owner, *repo, number))
        }
        _ => None,
    }
}

/// Derive a subject from a row link, either site-relative (`/o/r/pull/1`) or
/// absolute on github.com.
pub fn subject_from_href(href: &str) -> Option<Subject> {
    let base = reqwest::Url::parse("https://github.com/").ok()?;
    let url = base.join(href).ok()?;
    if url.host_str() != Some(GITHUB_HOST) {
        return None;
    }
    subject_from_path(url.path())
}

/// Map an HTTP status and body onto statistics or the error taxonomy.
pub fn interpret_response(status: u16, body: &str) -> Result<PrStats, FetchError> {
    match status {
        401 | 403 => Err(FetchError::Unauthorized(status)),
        404 => Err(FetchError::NotFound),
        _ => serde_json::from_str::<PrStats>(body).map_err(|err| FetchError::Malformed(err.to_string())),
    }
}

/// Reads `GET /repos/{owner}/{repo}/pulls/{number}` from the GitHub REST API.
pub struct GitHubFetcher {
    client: reqwest::Client,
    api_base: String,
}

impl GitHubFetcher {
    pub fn new(api_base: impl Into<String>) -> Result<Self, PrError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("pr-badges/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl Fetcher for GitHubFetcher {
    #[instrument(skip_all, fields(subject = %subject))]
    async fn fetch(&self, subject: &Subject, credential: &Credential) -> Result<PrStats, FetchError> {
        let url = format!("{}{}", self.api_base, subject.api_path());

        debug!(%url, "fetching PR stats");
        let response = self
            .client
            .get(&url)
            .bearer_auth(credential.expose())
            .header(ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
            .send()
            .await
            .map_err(|err| FetchError::Transport(err.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|err| FetchError::Transport(err.to_string()))?;
        debug!(status, body_bytes = body.len(), "received PR response");

        interpret_response(status, &body)
    }
}

/// Serves statistics from a fixed table. Unknown subjects are `NotFound`.
#[derive(Default)]
pub struct StaticFetcher {
    stats: HashMap<Subject, PrStats>,
    calls: AtomicUsize,
}

impl StaticFetcher {
    pub fn new(stats: impl IntoIterator<Item = (Subject, PrStats)>) -> Self {
        Self {
            stats: stats.into_iter().collect(),
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of fetches served so far.
    #[cfg(test)]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for StaticFetcher {
    async fn fetch(&self, subject: &Subject, _credential: &Credential) -> Result<PrStats, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.stats.get(subject).copied().ok_or(FetchError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn test_parse_page_url() {
        assert_eq!(parse_page_url("https://github.com/org/repo/pull/42").unwrap(), "/org/repo/pull/42");
        assert_eq!(parse_page_url("https://github.com/org/repo/pulls?q=is%3Aopen").unwrap(), "/org/repo/pulls");
        assert!(parse_page_url("https://example.com/org/repo/pull/42").is_err());
        assert!(parse_page_url("not-a-url").is_err());
    }

    #[test]
    fn test_subject_from_detail_path() {
        assert_eq!(subject_from_path("/org/repo/pull/42"), Some(Subject::new("org", "repo", 42)));
        assert_eq!(subject_from_path("/org/repo/pull/42/"), Some(Subject::new("org", "repo", 42)));
        assert_eq!(subject_from_path("/org/repo/pull/42/files"), None);
        assert_eq!(subject_from_path("/org/repo/pulls/42"), None);
        assert_eq!(subject_from_path("/org/repo/pull/abc"), None);
        assert_eq!(subject_from_path("/org/repo/pull/+4"), None);
        assert_eq!(subject_from_path("org/repo/pull/4"), None);
    }

    #[test]
    fn test_subject_from_href() {
        assert_eq!(subject_from_href("/org/repo/pull/7"), Some(Subject::new("org", "repo", 7)));
        assert_eq!(
            subject_from_href("https://github.com/org/repo/pull/7"),
            Some(Subject::new("org", "repo", 7))
        );
        assert_eq!(subject_from_href("https://example.com/org/repo/pull/7"), None);
        assert_eq!(subject_from_href("/org/repo/issues/7"), None);
    }

    #[test]
    fn test_interpret_response_taxonomy() {
        assert_eq!(interpret_response(401, ""), Err(FetchError::Unauthorized(401)));
        assert_eq!(interpret_response(403, "{}"), Err(FetchError::Unauthorized(403)));
        assert_eq!(interpret_response(404, ""), Err(FetchError::NotFound));
        assert!(matches!(interpret_response(200, "<html>"), Err(FetchError::Malformed(_))));
        assert!(matches!(interpret_response(500, r#"{"message":"boom"}"#), Err(FetchError::Malformed(_))));
        let stats = interpret_response(200, r#"{"additions":1,"deletions":2,"changed_files":3}"#).unwrap();
        assert_eq!(stats.total_lines(), 3);
    }

    #[tokio::test]
    async fn test_static_fetcher_counts_calls() {
        let subject = Subject::new("o", "r", 1);
        let stats = PrStats {
            additions: 1,
            deletions: 1,
            changed_files: 1,
        };
        let fetcher = StaticFetcher::new([(subject.clone(), stats)]);
        let credential = Credential::new("t");
        assert_eq!(fetcher.fetch(&subject, &credential).await, Ok(stats));
        assert_eq!(
            fetcher.fetch(&Subject::new("o", "r", 2), &credential).await,
            Err(FetchError::NotFound)
        );
        assert_eq!(fetcher.calls(), 2);
    }

    /// Serve exactly one canned HTTP response on a local port.
    async fn serve_once(status_line: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            let response = format!(
                "{status_line}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_github_fetcher_reads_stats() {
        let base = serve_once("HTTP/1.1 200 OK", r#"{"additions":800,"deletions":300,"changed_files":15}"#).await;
        let fetcher = GitHubFetcher::new(base).unwrap();
        let stats = fetcher
            .fetch(&Subject::new("o", "r", 1), &Credential::new("t"))
            .await
            .unwrap();
        assert_eq!(stats.complexity_score(), 93);
    }

    #[tokio::test]
    async fn test_github_fetcher_maps_unauthorized() {
        let base = serve_once("HTTP/1.1 401 Unauthorized", r#"{"message":"Bad credentials"}"#).await;
        let fetcher = GitHubFetcher::new(base).unwrap();
        let result = fetcher.fetch(&Subject::new("o", "r", 1), &Credential::new("t")).await;
        assert_eq!(result, Err(FetchError::Unauthorized(401)));
    }

    #[tokio::test]
    async fn test_github_fetcher_maps_connection_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let fetcher = GitHubFetcher::new(format!("http://{addr}")).unwrap();
        let result = fetcher.fetch(&Subject::new("o", "r", 1), &Credential::new("t")).await;
        assert!(matches!(result, Err(FetchError::Transport(_))));
    }
}
