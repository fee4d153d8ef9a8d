//! Reaction stages the standalone server can register from configuration.

use std::fmt;

use async_trait::async_trait;
use conductor_core::{Notification, ReactionStage, StageError, StageResult};
use reqwest::header::HeaderValue;
use tracing::{debug, info};

use crate::config::HttpStageConfig;

const ORGANIZATION_HEADER: &str = "x-conductor-organization";
const PRINCIPAL_HEADER: &str = "x-conductor-principal";
const SEQUENCE_HEADER: &str = "x-conductor-sequence";

/// POSTs every notification as JSON to a downstream service.
///
/// Any non-2xx response fails the stage, which skips the stages registered
/// after it for that notification.
pub struct HttpForwardStage {
    name: String,
    url: String,
    client: reqwest::Client,
}

impl HttpForwardStage {
    pub fn new(config: &HttpStageConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;

        Ok(Self {
            name: config.name.clone(),
            url: config.url.clone(),
            client,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl fmt::Debug for HttpForwardStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpForwardStage")
            .field("name", &self.name)
            .field("url", &self.url)
            .finish()
    }
}

fn header_value(value: &str) -> Result<HeaderValue, StageError> {
    HeaderValue::from_str(value)
        .map_err(|err| StageError::failed(format!("invalid header value {value:?}: {err}")))
}

#[async_trait]
impl ReactionStage for HttpForwardStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn apply(&self, notification: &Notification) -> StageResult {
        let response = self
            .client
            .post(&self.url)
            .header(ORGANIZATION_HEADER, header_value(notification.organization.as_str())?)
            .header(PRINCIPAL_HEADER, header_value(notification.principal.as_str())?)
            .header(SEQUENCE_HEADER, HeaderValue::from(notification.sequence))
            .json(notification)
            .send()
            .await
            .map_err(|e| StageError::failed(format!("failed to reach {}: {}", self.url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(StageError::failed(format!(
                "{} answered HTTP {}",
                self.url, status
            )));
        }

        debug!(
            target: "conductor::stage",
            stage = %self.name,
            resource = %notification.resource_id,
            status = status.as_u16(),
            "forwarded notification"
        );
        Ok(())
    }
}

/// Logs each notification it sees. Never fails.
#[derive(Debug, Default)]
pub struct LoggingStage;

impl LoggingStage {
    pub const NAME: &'static str = "log";
}

#[async_trait]
impl ReactionStage for LoggingStage {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn apply(&self, notification: &Notification) -> StageResult {
        info!(
            target: "conductor::stage",
            sequence = notification.sequence,
            organization = %notification.organization,
            principal = %notification.principal,
            resource = %notification.resource_id,
            kind = %notification.kind,
            "notification received"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_core::{NotificationKind, OrganizationId, PrincipalId};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    fn sample() -> Notification {
        let mut notification = Notification::new(
            OrganizationId::new("mh_default_org"),
            PrincipalId::new("admin"),
            "series-42",
            NotificationKind::UpdateMetadata,
        );
        notification.sequence = 7;
        notification
    }

    fn stage_for(url: String) -> HttpForwardStage {
        HttpForwardStage::new(&HttpStageConfig {
            name: "downstream".into(),
            url,
            enabled: true,
            timeout_ms: 2_000,
        })
        .expect("client")
    }

    /// Accept one request, answer with `status_line`, and hand back the raw
    /// request text.
    async fn respond_once(status_line: &'static str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.expect("accept");
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.expect("read");
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
                if request_complete(&request) {
                    break;
                }
            }
            let response = format!("{status_line}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n");
            socket.write_all(response.as_bytes()).await.expect("write");
            socket.shutdown().await.ok();
            String::from_utf8_lossy(&request).into_owned()
        });

        (format!("http://{addr}/notify"), handle)
    }

    fn request_complete(request: &[u8]) -> bool {
        let text = String::from_utf8_lossy(request);
        let Some(split) = text.find("\r\n\r\n") else {
            return false;
        };
        let content_length = text[..split]
            .lines()
            .find_map(|line| {
                let (name, value) = line.split_once(':')?;
                name.eq_ignore_ascii_case("content-length")
                    .then(|| value.trim().parse::<usize>().ok())
                    .flatten()
            })
            .unwrap_or(0);
        request.len() >= split + 4 + content_length
    }

    #[tokio::test]
    async fn forwards_notification_as_json() {
        let (url, server) = respond_once("HTTP/1.1 204 No Content").await;
        let stage = stage_for(url);

        stage.apply(&sample()).await.expect("forward succeeds");

        let request = server.await.expect("server task");
        let lower = request.to_ascii_lowercase();
        assert!(request.starts_with("POST /notify"));
        assert!(lower.contains("x-conductor-organization: mh_default_org"));
        assert!(lower.contains("x-conductor-principal: admin"));
        assert!(lower.contains("x-conductor-sequence: 7"));
        assert!(request.contains(r#""resourceId":"series-42""#));
        assert!(request.contains(r#""kind":"UpdateMetadata""#));
    }

    #[tokio::test]
    async fn non_success_status_fails_the_stage() {
        let (url, server) = respond_once("HTTP/1.1 503 Service Unavailable").await;
        let stage = stage_for(url);

        let err = stage.apply(&sample()).await.expect_err("503 must fail");
        assert!(err.to_string().contains("503"), "unexpected error: {err}");
        server.await.expect("server task");
    }

    #[tokio::test]
    async fn unreachable_endpoint_fails_the_stage() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);

        let stage = stage_for(format!("http://{addr}/notify"));
        assert!(stage.apply(&sample()).await.is_err());
    }

    #[test]
    fn control_characters_cannot_reach_headers() {
        assert!(header_value("mh_default_org").is_ok());
        assert!(header_value("evil\r\nx-injected: 1").is_err());
    }

    #[tokio::test]
    async fn logging_stage_never_fails() {
        assert!(LoggingStage.apply(&sample()).await.is_ok());
        assert_eq!(LoggingStage.name(), "log");
    }
}
