//! Conditional HTTP downloads
//!
//! Requests carry `If-None-Match` with the ETag the cache stored, and the
//! credential whose URL is the longest prefix of the requested URL.

use std::sync::Arc;
use std::time::Duration;

use crate::config::RepositoryConfig;
use crate::error::{RepoError, Result};

const TIMEOUT: Duration = Duration::from_secs(60);

/// Result of a conditional fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The stored ETag is still current
    NotModified,
    /// New content and the ETag identifying it
    Fresh { bytes: Vec<u8>, etag: String },
}

/// HTTP client for ETag-conditional downloads
#[derive(Debug, Clone)]
pub struct EtagFetcher {
    client: reqwest::Client,
    config: Arc<RepositoryConfig>,
}

impl EtagFetcher {
    pub fn new(config: Arc<RepositoryConfig>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(TIMEOUT)
            .user_agent(concat!("charter/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| RepoError::Http {
                url: String::new(),
                message: e.to_string(),
            })?;
        Ok(Self { client, config })
    }

    /// Fetch `url` unless `stored_etag` is still current
    ///
    /// When the server sends no ETag the current UNIX time in hex stands
    /// in for it.
    pub async fn fetch(&self, url: &str, stored_etag: &str) -> Result<FetchOutcome> {
        let mut request = self.client.get(url);
        if !stored_etag.is_empty() {
            request = request.header(reqwest::header::IF_NONE_MATCH, stored_etag);
        }
        if let Some(credential) = self.config.credential_for(url) {
            tracing::debug!(%url, %credential, "using credential");
            if let Some(auth) = credential.authorization() {
                request = request.header(reqwest::header::AUTHORIZATION, auth);
            }
        }

        let response = request.send().await.map_err(|e| RepoError::http(url, e))?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_MODIFIED {
            tracing::debug!(%url, "not modified");
            return Ok(FetchOutcome::NotModified);
        }
        if !status.is_success() {
            return Err(RepoError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let etag = response
            .headers()
            .get(reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(String::from)
            .unwrap_or_else(|| format!("{:x}", chrono::Utc::now().timestamp()));
        let bytes = response.bytes().await.map_err(|e| RepoError::http(url, e))?;

        tracing::debug!(%url, %etag, size = bytes.len(), "fetched");
        Ok(FetchOutcome::Fresh {
            bytes: bytes.to_vec(),
            etag,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Credential;
    use wiremock::matchers::{header, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetcher(config: RepositoryConfig) -> EtagFetcher {
        EtagFetcher::new(Arc::new(config)).unwrap()
    }

    #[tokio::test]
    async fn test_fresh_download_carries_etag() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/shop.tgz"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("ETag", "\"v1\"")
                    .set_body_bytes(b"archive".to_vec()),
            )
            .expect(1)
            .mount(&server)
            .await;

        let outcome = fetcher(RepositoryConfig::default())
            .fetch(&format!("{}/shop.tgz", server.uri()), "")
            .await
            .unwrap();
        assert_eq!(
            outcome,
            FetchOutcome::Fresh {
                bytes: b"archive".to_vec(),
                etag: "\"v1\"".into(),
            }
        );
    }

    #[tokio::test]
    async fn test_stored_etag_is_sent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/shop.tgz"))
            .and(header("If-None-Match", "\"v1\""))
            .respond_with(ResponseTemplate::new(304))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = fetcher(RepositoryConfig::default())
            .fetch(&format!("{}/shop.tgz", server.uri()), "\"v1\"")
            .await
            .unwrap();
        assert_eq!(outcome, FetchOutcome::NotModified);
    }

    #[tokio::test]
    async fn test_missing_etag_falls_back_to_time() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"x".to_vec()))
            .mount(&server)
            .await;

        let outcome = fetcher(RepositoryConfig::default())
            .fetch(&server.uri(), "")
            .await
            .unwrap();
        let FetchOutcome::Fresh { etag, .. } = outcome else {
            panic!("expected fresh content");
        };
        assert!(i64::from_str_radix(&etag, 16).unwrap() > 0);
    }

    #[tokio::test]
    async fn test_longest_prefix_credential_is_sent() {
        let server = MockServer::start().await;
        let config = RepositoryConfig {
            credentials: vec![
                Credential {
                    url: server.uri(),
                    token: Some("broad".into()),
                    ..Default::default()
                },
                Credential {
                    url: format!("{}/acme", server.uri()),
                    token: Some("narrow".into()),
                    ..Default::default()
                },
            ],
            catalogs: Vec::new(),
        };
        Mock::given(method("GET"))
            .and(path("/acme/shop.tgz"))
            .and(header("Authorization", "Bearer narrow"))
            .respond_with(ResponseTemplate::new(200).insert_header("ETag", "a"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/public/shop.tgz"))
            .and(header("Authorization", "Bearer broad"))
            .respond_with(ResponseTemplate::new(200).insert_header("ETag", "b"))
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = fetcher(config);
        fetcher
            .fetch(&format!("{}/acme/shop.tgz", server.uri()), "")
            .await
            .unwrap();
        fetcher
            .fetch(&format!("{}/public/shop.tgz", server.uri()), "")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_no_credential_no_header() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header_exists("Authorization"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).insert_header("ETag", "ok"))
            .mount(&server)
            .await;

        let outcome = fetcher(RepositoryConfig::default())
            .fetch(&server.uri(), "")
            .await
            .unwrap();
        assert!(matches!(outcome, FetchOutcome::Fresh { etag, .. } if etag == "ok"));
    }

    #[tokio::test]
    async fn test_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = fetcher(RepositoryConfig::default())
            .fetch(&format!("{}/missing.tgz", server.uri()), "")
            .await
            .unwrap_err();
        assert!(matches!(err, RepoError::HttpStatus { status: 404, .. }));
    }
}
