// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! `LogsClient` over the CloudWatch Logs JSON 1.1 HTTP protocol.
//!
//! Every operation is a `POST /` whose `X-Amz-Target` header names the
//! operation. Service errors come back as a JSON body carrying `__type`.
//! Requests are signed by an optional [`RequestSigner`] right before they
//! are sent.

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use tracing::{debug, error, warn};

use crate::client::{
    ClientFactory, InputLogEvent, LogsClient, PutLogEventsRequest, PutLogEventsResponse,
    RetryStrategy,
};
use crate::config::Config;
use crate::errors::DeliveryError;
use crate::target::Target;

pub const TARGET_PREFIX: &str = "Logs_20140328";
pub const AMZ_JSON_CONTENT_TYPE: &str = "application/x-amz-json-1.1";
pub const AMZ_TARGET_HEADER: &str = "x-amz-target";
pub const LOGS_FORMAT_HEADER: &str = "x-amzn-logs-format";
pub const EMF_FORMAT: &str = "json/emf";

const DEFAULT_USER_AGENT: &str = concat!("cloudwatch-logs-rs/", env!("CARGO_PKG_VERSION"));

/// Authenticates outgoing requests, typically with AWS Signature V4 over
/// the configured credentials.
pub trait RequestSigner: Send + Sync {
    fn sign(&self, request: &mut reqwest::Request) -> Result<(), DeliveryError>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PutLogEventsBody<'a> {
    log_group_name: &'a str,
    log_stream_name: &'a str,
    log_events: &'a [InputLogEvent],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateLogGroupBody<'a> {
    log_group_name: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateLogStreamBody<'a> {
    log_group_name: &'a str,
    log_stream_name: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct ServiceErrorBody {
    #[serde(rename = "__type", default)]
    kind: String,
    #[serde(alias = "Message", default)]
    message: String,
}

/// Maps an unsuccessful response to a [`DeliveryError`]. The status decides
/// for throttling, server and authorization failures, the `__type` code for
/// everything else.
pub fn map_service_error(status: StatusCode, body: &str) -> DeliveryError {
    let parsed: ServiceErrorBody = serde_json::from_str(body).unwrap_or_default();
    // "com.amazonaws.logs#ResourceNotFoundException" and bare codes alike.
    let code = parsed.kind.rsplit('#').next().unwrap_or_default().to_string();
    let message = if parsed.message.is_empty() {
        body.to_string()
    } else {
        parsed.message
    };

    if status == StatusCode::TOO_MANY_REQUESTS {
        return DeliveryError::Throttled(message);
    }
    if status.is_server_error() {
        return DeliveryError::ServiceUnavailable {
            status: Some(status),
            message,
        };
    }
    if status == StatusCode::FORBIDDEN {
        return DeliveryError::AccessDenied(message);
    }

    match code.as_str() {
        "ThrottlingException" => DeliveryError::Throttled(message),
        "ServiceUnavailableException" => DeliveryError::ServiceUnavailable {
            status: Some(status),
            message,
        },
        "ResourceNotFoundException" => DeliveryError::ResourceNotFound(message),
        "ResourceAlreadyExistsException" => DeliveryError::ResourceAlreadyExists(message),
        "InvalidParameterException" | "SerializationException" => {
            DeliveryError::InvalidParameter(message)
        }
        "DataAlreadyAcceptedException" => DeliveryError::DataAlreadyAccepted(message),
        "AccessDeniedException" | "UnrecognizedClientException" => {
            DeliveryError::AccessDenied(message)
        }
        _ => DeliveryError::Unknown {
            status: Some(status),
            code,
            message,
        },
    }
}

/// Builds the shared reqwest client. Falls back to reqwest defaults when the
/// configured one cannot be built.
#[must_use]
pub fn get_client(config: &Config) -> reqwest::Client {
    match build_client(config) {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to build HTTP client: {}, using reqwest defaults", e);
            reqwest::Client::new()
        }
    }
}

fn build_client(config: &Config) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .timeout(config.request_timeout)
        .pool_idle_timeout(Some(std::time::Duration::from_secs(270)))
        .tcp_keepalive(Some(std::time::Duration::from_secs(120)))
        .build()
}

/// Delivery client bound to one endpoint.
pub struct HttpClient {
    client: reqwest::Client,
    endpoint: String,
    signer: Option<Arc<dyn RequestSigner>>,
    retry_strategy: RwLock<RetryStrategy>,
}

impl HttpClient {
    pub fn new(
        client: reqwest::Client,
        endpoint: impl Into<String>,
        signer: Option<Arc<dyn RequestSigner>>,
    ) -> Self {
        HttpClient {
            client,
            endpoint: endpoint.into(),
            signer,
            retry_strategy: RwLock::new(RetryStrategy::default()),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn retry_strategy(&self) -> RetryStrategy {
        match self.retry_strategy.read() {
            Ok(strategy) => *strategy,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn build_request(
        &self,
        operation: &str,
        payload: &[u8],
        emf: bool,
    ) -> Result<reqwest::Request, DeliveryError> {
        let mut builder = self
            .client
            .post(format!("{}/", self.endpoint))
            .header(CONTENT_TYPE, AMZ_JSON_CONTENT_TYPE)
            .header(AMZ_TARGET_HEADER, format!("{TARGET_PREFIX}.{operation}"))
            .header(USER_AGENT, DEFAULT_USER_AGENT)
            .body(payload.to_vec());
        if emf {
            builder = builder.header(LOGS_FORMAT_HEADER, EMF_FORMAT);
        }

        let mut request = builder.build()?;
        if let Some(signer) = &self.signer {
            signer.sign(&mut request)?;
        }
        Ok(request)
    }

    /// Sends one operation. Transport failures are retried per the retry
    /// strategy. Service errors are returned as they are.
    async fn call<B: Serialize>(
        &self,
        operation: &str,
        body: &B,
        emf: bool,
    ) -> Result<String, DeliveryError> {
        let payload =
            serde_json::to_vec(body).map_err(|e| DeliveryError::Payload(e.to_string()))?;
        let strategy = self.retry_strategy();
        let mut attempts = 0;

        loop {
            attempts += 1;
            let request = self.build_request(operation, &payload, emf)?;

            match self.client.execute(request).await {
                Ok(response) => {
                    let status = response.status();
                    let text = response.text().await.unwrap_or_default();
                    if status.is_success() {
                        return Ok(text);
                    }
                    debug!("{} returned {}: {}", operation, status, text);
                    return Err(map_service_error(status, &text));
                }
                Err(e) if attempts < strategy.attempts() => {
                    debug!(
                        "{} attempt {} failed: {}, retrying",
                        operation, attempts, e
                    );
                    let delay = strategy.delay();
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[async_trait]
impl LogsClient for HttpClient {
    async fn put_log_events(
        &self,
        request: &PutLogEventsRequest,
    ) -> Result<PutLogEventsResponse, DeliveryError> {
        let body = PutLogEventsBody {
            log_group_name: &request.target.group,
            log_stream_name: &request.target.stream,
            log_events: &request.events,
        };
        let text = self.call("PutLogEvents", &body, request.emf).await?;
        if text.trim().is_empty() {
            return Ok(PutLogEventsResponse::default());
        }
        match serde_json::from_str(&text) {
            Ok(response) => Ok(response),
            Err(e) => {
                // The batch is accepted at this point, only the details are lost.
                debug!("Unable to parse PutLogEvents response: {}", e);
                Ok(PutLogEventsResponse::default())
            }
        }
    }

    async fn create_log_group(&self, group: &str) -> Result<(), DeliveryError> {
        let body = CreateLogGroupBody {
            log_group_name: group,
        };
        self.call("CreateLogGroup", &body, false).await.map(|_| ())
    }

    async fn create_log_stream(&self, target: &Target) -> Result<(), DeliveryError> {
        let body = CreateLogStreamBody {
            log_group_name: &target.group,
            log_stream_name: &target.stream,
        };
        self.call("CreateLogStream", &body, false).await.map(|_| ())
    }

    fn set_retry_strategy(&self, strategy: RetryStrategy) {
        match self.retry_strategy.write() {
            Ok(mut current) => *current = strategy,
            Err(poisoned) => *poisoned.into_inner() = strategy,
        }
    }
}

/// Hands out [`HttpClient`]s sharing one connection pool.
pub struct HttpClientFactory {
    client: reqwest::Client,
    endpoint: String,
    signer: Option<Arc<dyn RequestSigner>>,
}

impl HttpClientFactory {
    pub fn new(config: &Config, signer: Option<Arc<dyn RequestSigner>>) -> Self {
        if signer.is_none() && config.credentials.is_configured() {
            warn!(
                "Credentials are configured but no request signer is set, requests will be sent unsigned"
            );
        }
        HttpClientFactory {
            client: get_client(config),
            endpoint: config.endpoint(),
            signer,
        }
    }
}

impl ClientFactory for HttpClientFactory {
    fn build(&self, target: &Target) -> Arc<dyn LogsClient> {
        debug!("Building HTTP client for {} at {}", target, self.endpoint);
        Arc::new(HttpClient::new(
            self.client.clone(),
            self.endpoint.clone(),
            self.signer.clone(),
        ))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tracing_test::traced_test;

    fn request(emf: bool) -> PutLogEventsRequest {
        PutLogEventsRequest {
            target: Target::new("group", "stream"),
            events: vec![InputLogEvent {
                timestamp: 1_700_000_000_000,
                message: "hello".to_string(),
            }],
            emf,
        }
    }

    fn client(url: String) -> HttpClient {
        HttpClient::new(reqwest::Client::new(), url, None)
    }

    struct NoopSigner;

    impl RequestSigner for NoopSigner {
        fn sign(&self, _request: &mut reqwest::Request) -> Result<(), DeliveryError> {
            Ok(())
        }
    }

    fn config_with_keys() -> Config {
        Config {
            credentials: crate::config::Credentials {
                access_key: Some("AKID".to_string()),
                secret_key: Some("secret".to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    #[traced_test]
    fn test_unsigned_factory_with_credentials_warns() {
        HttpClientFactory::new(&config_with_keys(), None);
        assert!(logs_contain("no request signer is set"));
    }

    #[test]
    #[traced_test]
    fn test_signed_factory_does_not_warn() {
        HttpClientFactory::new(&config_with_keys(), Some(Arc::new(NoopSigner)));
        HttpClientFactory::new(&Config::default(), None);
        assert!(!logs_contain("no request signer is set"));
    }

    #[test]
    fn test_map_service_error_by_status() {
        assert_eq!(
            map_service_error(StatusCode::TOO_MANY_REQUESTS, ""),
            DeliveryError::Throttled(String::new())
        );
        assert_eq!(
            map_service_error(StatusCode::BAD_GATEWAY, "<html>"),
            DeliveryError::ServiceUnavailable {
                status: Some(StatusCode::BAD_GATEWAY),
                message: "<html>".to_string(),
            }
        );
        assert!(matches!(
            map_service_error(StatusCode::FORBIDDEN, r#"{"__type":"AccessDeniedException"}"#),
            DeliveryError::AccessDenied(_)
        ));
    }

    #[test]
    fn test_map_service_error_by_type() {
        let body = r#"{"__type":"com.amazonaws.logs#ResourceNotFoundException","message":"The specified log stream does not exist."}"#;
        assert_eq!(
            map_service_error(StatusCode::BAD_REQUEST, body),
            DeliveryError::ResourceNotFound("The specified log stream does not exist.".into())
        );

        let body = r#"{"__type":"ThrottlingException","Message":"Rate exceeded"}"#;
        assert_eq!(
            map_service_error(StatusCode::BAD_REQUEST, body),
            DeliveryError::Throttled("Rate exceeded".into())
        );

        for (code, retriable) in [
            ("InvalidParameterException", false),
            ("DataAlreadyAcceptedException", false),
            ("ResourceAlreadyExistsException", false),
            ("UnrecognizedClientException", false),
            ("ServiceUnavailableException", true),
            ("BrandNewException", true),
        ] {
            let body = format!(r#"{{"__type":"{code}","message":"m"}}"#);
            assert_eq!(
                map_service_error(StatusCode::BAD_REQUEST, &body).is_retriable(),
                retriable,
                "{code}"
            );
        }
    }

    #[tokio::test]
    async fn test_put_log_events_wire_format() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .match_header("content-type", AMZ_JSON_CONTENT_TYPE)
            .match_header("x-amz-target", "Logs_20140328.PutLogEvents")
            .match_header(LOGS_FORMAT_HEADER, Matcher::Missing)
            .match_header("user-agent", Matcher::Regex("^cloudwatch-logs-rs/".into()))
            .match_body(Matcher::Json(json!({
                "logGroupName": "group",
                "logStreamName": "stream",
                "logEvents": [{"timestamp": 1_700_000_000_000_i64, "message": "hello"}]
            })))
            .with_status(200)
            .with_body(r#"{"nextSequenceToken":"49590"}"#)
            .create_async()
            .await;

        let response = client(server.url())
            .put_log_events(&request(false))
            .await
            .unwrap();

        assert_eq!(response.next_sequence_token.as_deref(), Some("49590"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_emf_header() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .match_header(LOGS_FORMAT_HEADER, EMF_FORMAT)
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        client(server.url())
            .put_log_events(&request(true))
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_service_error_is_mapped() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .with_status(400)
            .with_body(r#"{"__type":"InvalidParameterException","message":"bad"}"#)
            .expect(1)
            .create_async()
            .await;

        let client = client(server.url());
        client.set_retry_strategy(RetryStrategy::Immediate(3));
        let err = client.put_log_events(&request(false)).await.unwrap_err();

        assert_eq!(err, DeliveryError::InvalidParameter("bad".into()));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_create_operations() {
        let mut server = Server::new_async().await;
        let group = server
            .mock("POST", "/")
            .match_header("x-amz-target", "Logs_20140328.CreateLogGroup")
            .match_body(Matcher::Json(json!({"logGroupName": "group"})))
            .with_status(200)
            .create_async()
            .await;
        let stream = server
            .mock("POST", "/")
            .match_header("x-amz-target", "Logs_20140328.CreateLogStream")
            .match_body(Matcher::Json(
                json!({"logGroupName": "group", "logStreamName": "stream"}),
            ))
            .with_status(400)
            .with_body(r#"{"__type":"ResourceAlreadyExistsException","message":"exists"}"#)
            .create_async()
            .await;

        let client = client(server.url());
        client.create_log_group("group").await.unwrap();
        let err = client
            .create_log_stream(&Target::new("group", "stream"))
            .await
            .unwrap_err();

        assert_eq!(err, DeliveryError::ResourceAlreadyExists("exists".into()));
        group.assert_async().await;
        stream.assert_async().await;
    }

    #[tokio::test]
    async fn test_transport_errors_follow_retry_strategy() {
        // Nothing listens on this port.
        let client = client("http://127.0.0.1:9".to_string());
        client.set_retry_strategy(RetryStrategy::LinearBackoff(2, 10));

        let err = client.put_log_events(&request(false)).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Transport(_)));
        assert!(err.is_retriable());
    }

    struct CountingSigner {
        signed: AtomicUsize,
    }

    impl RequestSigner for CountingSigner {
        fn sign(&self, request: &mut reqwest::Request) -> Result<(), DeliveryError> {
            self.signed.fetch_add(1, Ordering::SeqCst);
            request
                .headers_mut()
                .insert("authorization", "AWS4-HMAC-SHA256 test".parse().unwrap());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_signer_is_applied() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .match_header("authorization", "AWS4-HMAC-SHA256 test")
            .with_status(200)
            .create_async()
            .await;

        let signer = Arc::new(CountingSigner {
            signed: AtomicUsize::new(0),
        });
        let client = HttpClient::new(
            reqwest::Client::new(),
            server.url(),
            Some(Arc::clone(&signer) as Arc<dyn RequestSigner>),
        );
        client.put_log_events(&request(false)).await.unwrap();

        assert_eq!(signer.signed.load(Ordering::SeqCst), 1);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_factory_uses_configured_endpoint() {
        let config = Config {
            endpoint_override: Some("http://localhost:4566".to_string()),
            ..Default::default()
        };
        let factory = HttpClientFactory::new(&config, None);
        assert_eq!(factory.endpoint, "http://localhost:4566");

        let factory = HttpClientFactory::new(&Config::default(), None);
        assert_eq!(factory.endpoint, "https://logs.us-east-1.amazonaws.com");
    }
}
