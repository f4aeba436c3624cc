//! # HTTP Collaborator Clients
//!
//! One `reqwest::Client` serves all three collaborator ports. Endpoints:
//!
//! | Port | Request | Response |
//! |---|---|---|
//! | enrollment | `GET {enrollment}/v1/courses/{course}/enrollments/{user}` | `{"enrolled": bool}`; 404 ⇒ not enrolled |
//! | watch progress | `GET {watch}/v1/courses/{course}/watch-seconds` | `{"seconds": u64}` |
//! | watch progress | `GET {watch}/v1/courses/{course}/duration` | `{"seconds": u64}` |
//! | identity | `GET {identity}/v1/users/{user}/payout-identity` | `{"identity": str}`; 404 ⇒ none |
//!
//! `{course}` is the 64-character hex course id. Transport failures, 5xx
//! and 429 responses are retried `max_retries` times with doubling backoff
//! from [`CollaboratorConfig`]; whatever the last attempt produced is
//! reported. Other non-2xx responses become [`CollaboratorError::Api`]
//! straight away.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use url::Url;

use escrow_core::{CourseId, IdentityHandle, UserId};

use crate::config::CollaboratorConfig;
use crate::ports::{CollaboratorError, EnrollmentService, IdentityService, WatchProgressService};

#[derive(Deserialize)]
struct EnrollmentBody {
    enrolled: bool,
}

#[derive(Deserialize)]
struct SecondsBody {
    seconds: u64,
}

#[derive(Deserialize)]
struct IdentityBody {
    identity: String,
}

/// reqwest-backed implementation of every collaborator port.
#[derive(Debug, Clone)]
pub struct HttpCollaborators {
    client: reqwest::Client,
    config: CollaboratorConfig,
}

impl HttpCollaborators {
    pub fn new(config: CollaboratorConfig) -> Result<Self, CollaboratorError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| CollaboratorError::Http {
                endpoint: "client".into(),
                reason: e.to_string(),
            })?;
        Ok(Self { client, config })
    }

    fn endpoint(base: &Url, segments: &[&str]) -> Result<Url, CollaboratorError> {
        let mut url = base.clone();
        {
            let mut path = url.path_segments_mut().map_err(|_| CollaboratorError::Http {
                endpoint: base.to_string(),
                reason: "base URL cannot carry a path".into(),
            })?;
            path.pop_if_empty().extend(segments);
        }
        Ok(url)
    }

    /// GET `url`, retrying transient failures.
    async fn send(&self, url: &Url) -> Result<reqwest::Response, CollaboratorError> {
        let mut attempt = 0;
        loop {
            let mut req = self.client.get(url.clone());
            if let Some(token) = &self.config.api_token {
                req = req.bearer_auth(token);
            }
            let exhausted = attempt >= self.config.max_retries;
            let failure = match req.send().await {
                Ok(resp) if exhausted || !is_transient(resp.status()) => return Ok(resp),
                Ok(resp) => format!("status {}", resp.status()),
                Err(e) if exhausted => {
                    return Err(CollaboratorError::Http {
                        endpoint: url.to_string(),
                        reason: e.to_string(),
                    })
                }
                Err(e) => e.to_string(),
            };
            attempt += 1;
            let delay = self.config.retry_delay(attempt);
            tracing::warn!(
                endpoint = %url,
                attempt,
                max_retries = self.config.max_retries,
                "collaborator request failed, retrying in {delay:?}: {failure}"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// GET `url`; `Ok(None)` on 404.
    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<Option<T>, CollaboratorError> {
        let endpoint = url.to_string();
        let resp = self.send(&url).await?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(CollaboratorError::Api {
                endpoint,
                status: status.as_u16(),
                body: body.chars().take(512).collect(),
            });
        }
        resp.json::<T>()
            .await
            .map(Some)
            .map_err(|e| CollaboratorError::Deserialization {
                endpoint,
                reason: e.to_string(),
            })
    }

    async fn course_seconds(&self, course: &CourseId, leaf: &str) -> Result<u64, CollaboratorError> {
        let hex = course.to_hex();
        let url = Self::endpoint(
            &self.config.watch_progress_url,
            &["v1", "courses", &hex, leaf],
        )?;
        let endpoint = url.to_string();
        match self.get_json::<SecondsBody>(url).await? {
            Some(body) => Ok(body.seconds),
            None => Err(CollaboratorError::Api {
                endpoint,
                status: 404,
                body: "unknown course".into(),
            }),
        }
    }
}

fn is_transient(status: reqwest::StatusCode) -> bool {
    status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS
}

#[async_trait]
impl EnrollmentService for HttpCollaborators {
    async fn is_enrolled(
        &self,
        course: &CourseId,
        user: &UserId,
    ) -> Result<bool, CollaboratorError> {
        let hex = course.to_hex();
        let url = Self::endpoint(
            &self.config.enrollment_url,
            &["v1", "courses", &hex, "enrollments", user.as_str()],
        )?;
        Ok(self
            .get_json::<EnrollmentBody>(url)
            .await?
            .is_some_and(|b| b.enrolled))
    }
}

#[async_trait]
impl WatchProgressService for HttpCollaborators {
    async fn aggregated_watch_seconds(&self, course: &CourseId) -> Result<u64, CollaboratorError> {
        self.course_seconds(course, "watch-seconds").await
    }

    async fn course_duration_seconds(&self, course: &CourseId) -> Result<u64, CollaboratorError> {
        self.course_seconds(course, "duration").await
    }
}

#[async_trait]
impl IdentityService for HttpCollaborators {
    async fn payout_identity(
        &self,
        user: &UserId,
    ) -> Result<Option<IdentityHandle>, CollaboratorError> {
        let url = Self::endpoint(
            &self.config.identity_url,
            &["v1", "users", user.as_str(), "payout-identity"],
        )?;
        let endpoint = url.to_string();
        match self.get_json::<IdentityBody>(url).await? {
            None => Ok(None),
            Some(body) if body.identity.trim().is_empty() => Ok(None),
            Some(body) => IdentityHandle::new(body.identity)
                .map(Some)
                .map_err(|e| CollaboratorError::Deserialization {
                    endpoint,
                    reason: e.to_string(),
                }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn course() -> CourseId {
        CourseId::derive("rust-101").unwrap()
    }

    fn fast_config(base: &str, token: Option<&str>) -> CollaboratorConfig {
        let mut config = CollaboratorConfig::uniform(base, token.map(str::to_string)).unwrap();
        config.retry_backoff = Duration::from_millis(1);
        config
    }

    async fn client(server: &MockServer, token: Option<&str>) -> HttpCollaborators {
        HttpCollaborators::new(fast_config(&server.uri(), token)).unwrap()
    }

    #[tokio::test]
    async fn enrollment_lookup() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!(
                "/v1/courses/{}/enrollments/alice",
                course().to_hex()
            )))
            .and(header("authorization", "Bearer t0k"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"enrolled": true})),
            )
            .mount(&server)
            .await;

        let http = client(&server, Some("t0k")).await;
        let alice = UserId::new("alice").unwrap();
        assert!(http.is_enrolled(&course(), &alice).await.unwrap());
    }

    #[tokio::test]
    async fn unknown_enrollment_is_false() {
        let server = MockServer::start().await;
        let http = client(&server, None).await;
        let bob = UserId::new("bob").unwrap();
        assert!(!http.is_enrolled(&course(), &bob).await.unwrap());
    }

    #[tokio::test]
    async fn watch_seconds_and_duration() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("/v1/courses/{}/watch-seconds", course().to_hex())))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"seconds": 3900})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("/v1/courses/{}/duration", course().to_hex())))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"seconds": 1200})),
            )
            .mount(&server)
            .await;

        let http = client(&server, None).await;
        assert_eq!(http.aggregated_watch_seconds(&course()).await.unwrap(), 3_900);
        assert_eq!(http.course_duration_seconds(&course()).await.unwrap(), 1_200);
    }

    #[tokio::test]
    async fn payout_identity_found_and_missing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/users/alice/payout-identity"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"identity": "addr_alice"})),
            )
            .mount(&server)
            .await;

        let http = client(&server, None).await;
        let alice = UserId::new("alice").unwrap();
        let bob = UserId::new("bob").unwrap();
        assert_eq!(
            http.payout_identity(&alice).await.unwrap().unwrap().as_str(),
            "addr_alice"
        );
        assert!(http.payout_identity(&bob).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn persistent_server_error_is_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .expect(4)
            .mount(&server)
            .await;

        let http = client(&server, None).await;
        let err = http.aggregated_watch_seconds(&course()).await.unwrap_err();
        assert!(matches!(err, CollaboratorError::Api { status: 503, .. }));
    }

    #[tokio::test]
    async fn transient_server_error_is_retried() {
        let server = MockServer::start().await;
        let route = format!("/v1/courses/{}/duration", course().to_hex());
        Mock::given(method("GET"))
            .and(path(route.clone()))
            .respond_with(ResponseTemplate::new(502))
            .up_to_n_times(2)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"seconds": 1200})),
            )
            .mount(&server)
            .await;

        let http = client(&server, None).await;
        assert_eq!(http.course_duration_seconds(&course()).await.unwrap(), 1_200);
    }

    #[tokio::test]
    async fn client_error_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let http = client(&server, None).await;
        let err = http.aggregated_watch_seconds(&course()).await.unwrap_err();
        assert!(matches!(err, CollaboratorError::Api { status: 401, .. }));
    }

    #[tokio::test]
    async fn unreachable_service_exhausts_retries() {
        // Port 1 is closed: connection refused.
        let mut config = fast_config("http://127.0.0.1:1", None);
        config.max_retries = 2;
        let http = HttpCollaborators::new(config).unwrap();
        let err = http.aggregated_watch_seconds(&course()).await.unwrap_err();
        assert!(matches!(err, CollaboratorError::Http { .. }));
    }

    #[tokio::test]
    async fn malformed_body_is_deserialization_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{\"secs\": 1}"))
            .mount(&server)
            .await;

        let http = client(&server, None).await;
        let err = http.course_duration_seconds(&course()).await.unwrap_err();
        assert!(matches!(err, CollaboratorError::Deserialization { .. }));
    }

    #[test]
    fn endpoint_appends_segments() {
        let base = Url::parse("http://svc.local/api/").unwrap();
        let url = HttpCollaborators::endpoint(&base, &["v1", "users", "a b"]).unwrap();
        assert_eq!(url.as_str(), "http://svc.local/api/v1/users/a%20b");
    }
}
