use std::time::Duration;

use reqwest::{Method, RequestBuilder, Response, StatusCode, Url};
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::{GuardianError, GuardianResult};

/// A thin wrapper on an HTTP client shared by the secret-store and
/// identity-provider clients. Sets the user agent, applies the optional
/// deadline and classifies transport failures.
///
/// Requests are sent exactly once; retrying is left to the host.
#[derive(Debug, Clone)]
pub struct Request {
    client: reqwest::Client,
    timeout: Option<Duration>,
}

/// A request that never produced an HTTP status, or produced one the caller
/// does not handle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{url}{}: {error}", .status.map_or_else(String::new, |s| format!(" returned {s}")))]
pub struct TransportError {
    /// Target URL, without query string.
    pub url: String,
    /// Status code if a response was received.
    pub status: Option<u16>,
    /// Description of the failure.
    pub error: String,
}

impl Request {
    /// Initializes a new `Request` with an optional per-call deadline.
    pub(crate) fn new(timeout: Option<Duration>) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
        }
    }

    /// Creates a request builder with defaults applied.
    pub(crate) fn req(&self, method: Method, url: &str) -> RequestBuilder {
        if !url.starts_with("https") {
            warn!(url, "sending secrets over a non-TLS connection");
        }

        let builder = self.client.request(method, url).header(
            "User-Agent",
            format!("guardian-core/{}", env!("CARGO_PKG_VERSION")),
        );
        match self.timeout {
            Some(timeout) => builder.timeout(timeout),
            None => builder,
        }
    }

    /// Creates a GET request builder with defaults applied.
    pub(crate) fn get(&self, url: &str) -> RequestBuilder {
        self.req(Method::GET, url)
    }

    /// Creates a POST request builder with defaults applied.
    pub(crate) fn post(&self, url: &str) -> RequestBuilder {
        self.req(Method::POST, url)
    }

    /// Sends a request built by `req`/`get`/`post`.
    ///
    /// Any response, whatever its status, is returned as `Ok`; only failures to
    /// get a response at all are errors.
    pub(crate) async fn handle(
        &self,
        request_builder: RequestBuilder,
    ) -> Result<Response, TransportError> {
        let (client, request) = request_builder.build_split();
        let request = request.map_err(|err| TransportError {
            url: err
                .url()
                .map_or_else(|| "<unknown>".to_string(), |url| url.as_str().to_string()),
            status: None,
            error: format!("request build failed: {err}"),
        })?;
        let url = strip_query(request.url());
        debug!(method = %request.method(), url, "sending request");

        client.execute(request).await.map_err(|err| {
            let error = if err.is_timeout() {
                format!("request timed out: {err}")
            } else if err.is_connect() {
                format!("connection failed: {err}")
            } else {
                format!("request failed: {err}")
            };
            TransportError {
                url,
                status: None,
                error,
            }
        })
    }
}

/// Turns a non-success response into a [`TransportError`] carrying its body.
pub(crate) async fn unexpected_status(response: Response) -> TransportError {
    let url = strip_query(response.url());
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    TransportError {
        url,
        status: Some(status.as_u16()),
        error: if body.is_empty() {
            status
                .canonical_reason()
                .unwrap_or("unexpected status")
                .to_string()
        } else {
            body
        },
    }
}

/// Appends `segments` to the path of `base`, percent-encoding each one.
///
/// A segment can never add, remove or climb a path level: `/` and `%` are
/// escaped, and `.`, `..` and empty segments are refused outright.
///
/// # Errors
/// [`GuardianError::InvalidInput`] for an unusable base URL or segment.
pub(crate) fn join_path<'a>(
    base: &str,
    segments: impl IntoIterator<Item = &'a str>,
) -> GuardianResult<String> {
    let mut url = Url::parse(base)
        .map_err(|e| GuardianError::invalid_input("url", format!("{base} is not a URL: {e}")))?;
    let segments: Vec<&str> = segments.into_iter().collect();
    if let Some(bad) = segments
        .iter()
        .find(|s| s.is_empty() || **s == "." || **s == "..")
    {
        return Err(GuardianError::invalid_input(
            "path",
            format!("'{bad}' is not a valid path segment"),
        ));
    }
    url.path_segments_mut()
        .map_err(|()| GuardianError::invalid_input("url", format!("{base} cannot carry a path")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url.to_string())
}

/// Whether `status` means "nothing there" for an existence check.
pub(crate) fn is_absent(status: StatusCode) -> bool {
    status == StatusCode::NOT_FOUND || status == StatusCode::NO_CONTENT
}

fn strip_query(url: &reqwest::Url) -> String {
    let mut url = url.clone();
    url.set_query(None);
    url.to_string()
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case("http://vault:8200", &["v1", "keys", "user@acme.com"], "http://vault:8200/v1/keys/user@acme.com" ; "plain")]
    #[test_case("http://vault:8200/", &["v1", "keys"], "http://vault:8200/v1/keys" ; "trailing slash")]
    #[test_case("https://acme.okta.com", &["api", "v1", "users", "../groups"], "https://acme.okta.com/api/v1/users/..%2Fgroups" ; "slash escaped")]
    #[test_case("https://acme.okta.com", &["users", "a%2F..%2Fgroups"], "https://acme.okta.com/users/a%252F..%252Fgroups" ; "percent escaped")]
    fn test_join_path_encodes_segments(base: &str, segments: &[&str], expected: &str) {
        assert_eq!(join_path(base, segments.iter().copied()).unwrap(), expected);
    }

    #[test_case("." ; "dot")]
    #[test_case(".." ; "dot dot")]
    #[test_case("" ; "empty")]
    fn test_join_path_refuses_navigation(segment: &str) {
        let err = join_path("https://acme.okta.com", ["api", "v1", "users", segment]).unwrap_err();
        assert!(matches!(&err, GuardianError::InvalidInput { attribute, .. } if attribute == "path"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_transport_error_display() {
        let with_status = TransportError {
            url: "http://vault/v1/keys/a".to_string(),
            status: Some(503),
            error: "sealed".to_string(),
        };
        assert_eq!(with_status.to_string(), "http://vault/v1/keys/a returned 503: sealed");
        let without = TransportError {
            status: None,
            ..with_status
        };
        assert_eq!(without.to_string(), "http://vault/v1/keys/a: sealed");
    }

    #[tokio::test]
    async fn test_sets_user_agent() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/ping")
            .match_header(
                "user-agent",
                format!("guardian-core/{}", env!("CARGO_PKG_VERSION")).as_str(),
            )
            .with_status(200)
            .create_async()
            .await;

        let request = Request::new(None);
        let response = request
            .handle(request.get(&format!("{}/ping", server.url())))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_error_status_is_returned_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/flaky")
            .with_status(503)
            .with_body("sealed")
            .expect(1)
            .create_async()
            .await;

        let request = Request::new(None);
        let response = request
            .handle(request.post(&format!("{}/flaky", server.url())))
            .await
            .unwrap();
        let err = unexpected_status(response).await;
        assert_eq!(err.status, Some(503));
        assert_eq!(err.error, "sealed");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_connection_failure_is_a_transport_error() {
        let request = Request::new(Some(Duration::from_secs(1)));
        let err = request
            .handle(request.get("http://127.0.0.1:1/unreachable"))
            .await
            .unwrap_err();
        assert!(err.status.is_none());
        assert!(err.url.contains("/unreachable"));
    }
}
