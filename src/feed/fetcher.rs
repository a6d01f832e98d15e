use crate::app::AppEvent;
use crate::feed::parser::{parse_feed, ParsedFeed};
use crate::storage::document;
use crate::storage::DocumentError;
use crate::util::catch_task_panic;
use futures::stream::{self, StreamExt};
use reqwest::redirect::Policy;
use secrecy::{ExposeSecret, SecretString};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Notify};

const MAX_RETRIES: u32 = 3;
const MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_CONCURRENT_FETCHES: usize = 10;

/// Why a source could not be refreshed.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    #[error("Request timed out")]
    Timeout,
    /// Neither RSS nor Atom.
    #[error("Parse error: {0}")]
    Parse(String),
    /// The fetched entries could not be merged into the document.
    #[error("Document error: {0}")]
    Document(#[from] DocumentError),
    /// Still 429 once the retries ran out.
    #[error("Rate limited after {0} retries")]
    RateLimited(u32),
    #[error("Response too large")]
    ResponseTooLarge,
    /// The body ended short of its Content-Length.
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
    #[error("Fetch task panicked: {0}")]
    Panicked(String),
}

/// HTTP basic auth for a source.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: SecretString,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Everything the fetch task needs to know about one source.
#[derive(Debug, Clone)]
pub struct Source {
    pub url: String,
    pub path: PathBuf,
    /// Entries kept in the document (0 = unlimited).
    pub keep: usize,
    pub credentials: Option<Credentials>,
}

/// Result of a single source refresh.
#[derive(Debug)]
pub struct FetchResult {
    pub url: String,
    /// Number of entries the feed delivered, or the error that occurred
    pub result: Result<usize, FetchError>,
}

/// Refreshes every source concurrently. Results arrive in completion order.
pub async fn refresh_all(client: reqwest::Client, sources: Arc<Vec<Source>>) -> Vec<FetchResult> {
    stream::iter(sources.iter().cloned())
        .map(|source| {
            let client = client.clone();
            async move { refresh_one(&client, &source).await }
        })
        .buffer_unordered(MAX_CONCURRENT_FETCHES)
        .collect()
        .await
}

/// Fetches one source and merges the result into its document.
pub async fn refresh_one(client: &reqwest::Client, source: &Source) -> FetchResult {
    let result = match fetch_one(client, source).await {
        Ok(feed) => store_feed(source, feed).await,
        Err(e) => Err(e),
    };
    match &result {
        Ok(count) => tracing::info!(feed = %source.url, entries = count, "Feed refreshed"),
        Err(e) => tracing::warn!(feed = %source.url, error = %e, "Feed refresh failed"),
    }
    FetchResult {
        url: source.url.clone(),
        result,
    }
}

/// Read-merge-write under one exclusive lock, off the async runtime.
async fn store_feed(source: &Source, feed: ParsedFeed) -> Result<usize, FetchError> {
    let path = source.path.clone();
    let url = source.url.clone();
    let keep = source.keep;
    let count = feed.entries.len();

    tokio::task::spawn_blocking(move || {
        document::update_exclusive(&path, &url, |doc| {
            doc.merge_fetched(feed.title, feed.link, feed.entries, keep);
        })
    })
    .await
    .map_err(|e| {
        FetchError::Document(DocumentError::Io(std::io::Error::other(e.to_string())))
    })??;

    Ok(count)
}

async fn fetch_one(client: &reqwest::Client, source: &Source) -> Result<ParsedFeed, FetchError> {
    let mut retry_count = 0;

    let bytes = loop {
        let mut request = client.get(&source.url);
        if let Some(creds) = &source.credentials {
            request = request.basic_auth(&creds.username, Some(creds.password.expose_secret()));
        }

        let response = tokio::time::timeout(REQUEST_TIMEOUT, request.send())
            .await
            .map_err(|_| FetchError::Timeout)?
            .map_err(FetchError::Network)?;

        // Rate limiting and server errors back off exponentially
        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            if retry_count >= MAX_RETRIES {
                return Err(if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                    FetchError::RateLimited(MAX_RETRIES)
                } else {
                    FetchError::HttpStatus(status.as_u16())
                });
            }

            let delay_secs = 2u64.pow(retry_count); // 1s, 2s, 4s
            tracing::warn!(
                feed = %source.url,
                status = %status,
                retry = retry_count,
                delay_secs = delay_secs,
                "Retrying after delay"
            );

            tokio::time::sleep(Duration::from_secs(delay_secs)).await;
            retry_count += 1;
            continue;
        }

        // 4xx errors fail immediately
        if !status.is_success() {
            return Err(FetchError::HttpStatus(status.as_u16()));
        }

        match read_limited_bytes(response, MAX_FEED_SIZE).await {
            Ok(bytes) => break bytes,
            Err(FetchError::IncompleteResponse { expected, received }) => {
                if retry_count >= MAX_RETRIES {
                    return Err(FetchError::IncompleteResponse { expected, received });
                }

                let delay_secs = 2u64.pow(retry_count);
                tracing::debug!(
                    feed = %source.url,
                    expected = expected,
                    received = received,
                    attempt = retry_count + 1,
                    delay_secs = delay_secs,
                    "Retrying incomplete download"
                );

                tokio::time::sleep(Duration::from_secs(delay_secs)).await;
                retry_count += 1;
                continue;
            }
            Err(e) => return Err(e),
        }
    };

    let feed = parse_feed(&bytes).map_err(|e| FetchError::Parse(e.to_string()))?;
    if feed.skipped_links > 0 {
        tracing::warn!(
            feed = %source.url,
            filtered = feed.skipped_links,
            "Entry links with unsupported schemes dropped"
        );
    }
    Ok(feed)
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    let declared = response.content_length();
    if declared.is_some_and(|len| len > limit as u64) {
        return Err(FetchError::ResponseTooLarge);
    }

    let mut body = Vec::with_capacity(declared.map_or(0, |len| len as usize));
    let mut chunks = response.bytes_stream();
    while let Some(chunk) = chunks.next().await {
        let chunk = chunk.map_err(FetchError::Network)?;
        if body.len() + chunk.len() > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        body.extend_from_slice(&chunk);
    }

    match declared {
        Some(expected) if (body.len() as u64) < expected => Err(FetchError::IncompleteResponse {
            expected,
            received: body.len(),
        }),
        _ => Ok(body),
    }
}

/// Follows at most 3 redirects and refuses loops.
fn redirect_policy() -> Policy {
    Policy::custom(|attempt| {
        if attempt.previous().len() >= 3 {
            return attempt.error("Too many redirects (max 3)");
        }
        let url = attempt.url();
        if attempt.previous().iter().any(|prev| prev.as_str() == url.as_str()) {
            return attempt.error("Redirect loop detected");
        }
        tracing::debug!(
            from = %attempt.previous().last().map(|u| u.as_str()).unwrap_or("initial"),
            to = %url,
            hop = attempt.previous().len() + 1,
            "Following redirect"
        );
        attempt.follow()
    })
}

/// The HTTP client shared by every fetch task.
pub fn build_client() -> Result<reqwest::Client, FetchError> {
    let client = reqwest::Client::builder()
        .redirect(redirect_policy())
        .pool_max_idle_per_host(4)
        .pool_idle_timeout(Duration::from_secs(30))
        .tcp_keepalive(Duration::from_secs(60))
        .timeout(REQUEST_TIMEOUT)
        .user_agent(concat!("tagreel/", env!("CARGO_PKG_VERSION")))
        .build()?;
    Ok(client)
}

/// Fetches `source` forever: every `interval` after a success, every `retry`
/// after a failure, or immediately when `wake` is notified.
pub async fn run_source_loop(
    client: reqwest::Client,
    source: Source,
    interval: Duration,
    retry: Duration,
    wake: Arc<Notify>,
    event_tx: mpsc::Sender<AppEvent>,
) {
    loop {
        let outcome = match catch_task_panic(refresh_one(&client, &source)).await {
            Ok(outcome) => outcome,
            Err(panic_msg) => {
                tracing::error!(feed = %source.url, error = %panic_msg, "Fetch task panicked");
                let _ = event_tx
                    .send(AppEvent::TaskPanicked {
                        task: "fetch",
                        error: panic_msg.clone(),
                    })
                    .await;
                FetchResult {
                    url: source.url.clone(),
                    result: Err(FetchError::Panicked(panic_msg)),
                }
            }
        };

        let delay = if outcome.result.is_ok() { interval } else { retry };
        if event_tx.send(AppEvent::FetchComplete(outcome)).await.is_err() {
            tracing::debug!(feed = %source.url, "Event channel closed, stopping fetch loop");
            return;
        }

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = wake.notified() => {
                tracing::debug!(feed = %source.url, "Fetch woken early");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::document::read_shared;
    use crate::storage::LockMode;
    use wiremock::matchers::{header_exists, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const VALID_RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
    <title>Test Feed</title>
    <item><guid>1</guid><title>Test</title></item>
</channel></rss>"#;

    fn source_for(dir: &tempfile::TempDir, url: String) -> Source {
        Source {
            url,
            path: dir.path().join("feed.json"),
            keep: 0,
            credentials: None,
        }
    }

    #[tokio::test]
    async fn test_refresh_success_writes_document() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(VALID_RSS)
                    .insert_header("Content-Type", "application/xml"),
            )
            .mount(&mock_server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let source = source_for(&dir, format!("{}/feed", mock_server.uri()));
        let client = reqwest::Client::new();

        let result = refresh_one(&client, &source).await;
        assert_eq!(result.result.unwrap(), 1);

        let doc = read_shared(&source.path, LockMode::Blocking).unwrap();
        assert_eq!(doc.source.title.as_deref(), Some("Test Feed"));
        assert_eq!(doc.entries[0].id, "1");
    }

    #[tokio::test]
    async fn test_refresh_keeps_existing_state() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(VALID_RSS))
            .mount(&mock_server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let source = source_for(&dir, format!("{}/feed", mock_server.uri()));
        let client = reqwest::Client::new();
        refresh_one(&client, &source).await.result.unwrap();

        document::update_exclusive(&source.path, &source.url, |doc| {
            doc.entries[0].add_state("read");
        })
        .unwrap();
        refresh_one(&client, &source).await.result.unwrap();

        let doc = read_shared(&source.path, LockMode::Blocking).unwrap();
        assert_eq!(doc.entries.len(), 1);
        assert!(doc.entries[0].has_state("read"));
    }

    #[tokio::test]
    async fn test_refresh_404_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let source = source_for(&dir, format!("{}/feed", mock_server.uri()));
        let result = refresh_one(&reqwest::Client::new(), &source).await;
        match result.result.unwrap_err() {
            FetchError::HttpStatus(404) => {}
            e => panic!("Expected HttpStatus(404), got {:?}", e),
        }
        assert!(!source.path.exists());
    }

    #[tokio::test]
    async fn test_refresh_503_retry_then_success() {
        use wiremock::matchers::any;

        let mock_server = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&mock_server)
            .await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(200).set_body_string(VALID_RSS))
            .mount(&mock_server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let source = source_for(&dir, format!("{}/feed", mock_server.uri()));
        let result = refresh_one(&reqwest::Client::new(), &source).await;
        assert_eq!(result.result.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_malformed_feed_parse_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<not valid xml"))
            .mount(&mock_server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let source = source_for(&dir, format!("{}/feed", mock_server.uri()));
        let result = refresh_one(&reqwest::Client::new(), &source).await;
        assert!(matches!(result.result, Err(FetchError::Parse(_))));
    }

    #[tokio::test]
    async fn test_basic_auth_sent() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header_exists("authorization"))
            .respond_with(ResponseTemplate::new(200).set_body_string(VALID_RSS))
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&mock_server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let mut source = source_for(&dir, format!("{}/feed", mock_server.uri()));
        let client = reqwest::Client::new();
        assert!(matches!(
            refresh_one(&client, &source).await.result,
            Err(FetchError::HttpStatus(401))
        ));

        source.credentials = Some(Credentials {
            username: "user".to_string(),
            password: SecretString::from("hunter2".to_string()),
        });
        assert!(refresh_one(&client, &source).await.result.is_ok());
    }

    #[tokio::test]
    async fn test_refresh_all_reports_each_source() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(VALID_RSS))
            .mount(&mock_server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let sources: Vec<Source> = (0..3)
            .map(|i| Source {
                url: format!("{}/feed/{i}", mock_server.uri()),
                path: dir.path().join(format!("{i}.json")),
                keep: 0,
                credentials: None,
            })
            .collect();
        let results = refresh_all(reqwest::Client::new(), Arc::new(sources)).await;
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.result.is_ok()));
    }

    async fn next_fetch(events: &mut mpsc::Receiver<AppEvent>) -> FetchResult {
        loop {
            match tokio::time::timeout(Duration::from_secs(10), events.recv()).await {
                Ok(Some(AppEvent::FetchComplete(result))) => return result,
                Ok(Some(_)) => continue,
                Ok(None) => panic!("Fetch loop stopped"),
                Err(_) => panic!("No fetch result within 10s"),
            }
        }
    }

    /// Moves the paused clock forward while the loop sleeps between fetches.
    /// The clock runs again before the next request goes out.
    async fn sleep_through(events: &mut mpsc::Receiver<AppEvent>, quiet: Duration) {
        tokio::time::pause();
        tokio::time::advance(quiet).await;
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_source_loop_retries_after_failure() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let source = source_for(&dir, format!("{}/feed", mock_server.uri()));
        let (tx, mut events) = mpsc::channel(8);
        tokio::spawn(run_source_loop(
            reqwest::Client::new(),
            source,
            Duration::from_secs(3600),
            Duration::from_secs(60),
            Arc::new(Notify::new()),
            tx,
        ));

        assert!(next_fetch(&mut events).await.result.is_err());
        sleep_through(&mut events, Duration::from_secs(58)).await;
        tokio::time::advance(Duration::from_secs(4)).await;
        tokio::time::resume();
        assert!(next_fetch(&mut events).await.result.is_err());
        assert_eq!(mock_server.received_requests().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_source_loop_waits_interval_unless_woken() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(VALID_RSS))
            .mount(&mock_server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let source = source_for(&dir, format!("{}/feed", mock_server.uri()));
        let wake = Arc::new(Notify::new());
        let (tx, mut events) = mpsc::channel(8);
        tokio::spawn(run_source_loop(
            reqwest::Client::new(),
            source,
            Duration::from_secs(600),
            Duration::from_secs(1),
            Arc::clone(&wake),
            tx,
        ));
        assert!(next_fetch(&mut events).await.result.is_ok());

        // Well past the retry delay, still inside the interval
        sleep_through(&mut events, Duration::from_secs(30)).await;
        wake.notify_one();
        tokio::time::resume();
        assert!(next_fetch(&mut events).await.result.is_ok());

        sleep_through(&mut events, Duration::from_secs(590)).await;
        tokio::time::advance(Duration::from_secs(20)).await;
        tokio::time::resume();
        assert!(next_fetch(&mut events).await.result.is_ok());
        assert_eq!(mock_server.received_requests().await.unwrap().len(), 3);
    }

    #[test]
    fn test_credentials_debug_masks_password() {
        let creds = Credentials {
            username: "user".to_string(),
            password: SecretString::from("hunter2".to_string()),
        };
        let out = format!("{:?}", creds);
        assert!(!out.contains("hunter2"));
        assert!(out.contains("[REDACTED]"));
    }
}
