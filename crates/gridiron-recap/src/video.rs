//! Video-generation provider client and the background task that polls a
//! submitted job until it reaches a terminal state.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum VideoError {
    #[error("video provider request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("video provider returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("unexpected video provider payload: {0}")]
    Payload(String),
    #[error("invalid video provider configuration: {0}")]
    Config(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoRequest {
    pub script: String,
    pub avatar_id: String,
    pub voice_id: String,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum VideoStatus {
    Pending,
    Processing,
    Completed { video_url: Option<String> },
    Failed { error: Option<String> },
}

impl VideoStatus {
    pub fn label(&self) -> &'static str {
        match self {
            VideoStatus::Pending => "pending",
            VideoStatus::Processing => "processing",
            VideoStatus::Completed { .. } => "completed",
            VideoStatus::Failed { .. } => "failed",
        }
    }

    fn from_payload(data: &JsonValue) -> Result<Self, VideoError> {
        let status = data
            .get("status")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| VideoError::Payload("status missing".into()))?;
        let text = |key: &str| data.get(key).and_then(JsonValue::as_str).map(str::to_string);
        Ok(match status.to_ascii_lowercase().as_str() {
            "completed" | "done" => VideoStatus::Completed {
                video_url: text("video_url"),
            },
            "failed" | "error" => VideoStatus::Failed {
                error: data
                    .get("error")
                    .and_then(|e| e.get("message").or(Some(e)))
                    .and_then(JsonValue::as_str)
                    .map(str::to_string),
            },
            "processing" | "rendering" => VideoStatus::Processing,
            _ => VideoStatus::Pending,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Avatar {
    pub avatar_id: String,
    #[serde(default)]
    pub avatar_name: Option<String>,
    #[serde(default)]
    pub preview_image_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Voice {
    pub voice_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub gender: Option<String>,
}

#[async_trait]
pub trait VideoProvider: Send + Sync {
    /// Submit a render job; returns the provider's video id.
    async fn submit(&self, request: &VideoRequest) -> Result<String, VideoError>;
    async fn status(&self, video_id: &str) -> Result<VideoStatus, VideoError>;
    async fn avatars(&self) -> Result<Vec<Avatar>, VideoError>;
    async fn voices(&self) -> Result<Vec<Voice>, VideoError>;
}

/// Provider responses wrap their payload in `data`; some endpoints don't.
fn unwrap_data(body: JsonValue) -> JsonValue {
    match body {
        JsonValue::Object(mut map) if map.contains_key("data") => map.remove("data").unwrap_or(JsonValue::Null),
        other => other,
    }
}

fn list_field<T: serde::de::DeserializeOwned>(data: JsonValue, key: &str) -> Result<Vec<T>, VideoError> {
    let items = match data {
        JsonValue::Array(items) => JsonValue::Array(items),
        JsonValue::Object(mut map) => map.remove(key).unwrap_or(JsonValue::Array(Vec::new())),
        _ => JsonValue::Array(Vec::new()),
    };
    serde_json::from_value(items).map_err(|e| VideoError::Payload(format!("{key}: {e}")))
}

#[derive(Debug, Clone)]
pub struct HttpVideoProvider {
    client: reqwest::Client,
    base_url: String,
}

impl HttpVideoProvider {
    pub fn new(base_url: impl Into<String>, api_key: &str, timeout: Duration) -> Result<Self, VideoError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(
            "X-Api-Key",
            HeaderValue::from_str(api_key).map_err(|e| VideoError::Config(e.to_string()))?,
        );
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn read_json(response: reqwest::Response) -> Result<JsonValue, VideoError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(VideoError::Status {
                status: status.as_u16(),
                body: body.chars().take(500).collect(),
            });
        }
        Ok(unwrap_data(response.json::<JsonValue>().await?))
    }
}

#[async_trait]
impl VideoProvider for HttpVideoProvider {
    async fn submit(&self, request: &VideoRequest) -> Result<String, VideoError> {
        let body = json!({
            "title": request.title,
            "video_inputs": [{
                "character": {"type": "avatar", "avatar_id": request.avatar_id},
                "voice": {"type": "text", "voice_id": request.voice_id, "input_text": request.script},
            }],
        });
        let response = self.client.post(self.url("video/generate")).json(&body).send().await?;
        let data = Self::read_json(response).await?;
        data.get("video_id")
            .and_then(JsonValue::as_str)
            .map(str::to_string)
            .ok_or_else(|| VideoError::Payload("video_id missing from submit response".into()))
    }

    async fn status(&self, video_id: &str) -> Result<VideoStatus, VideoError> {
        let response = self
            .client
            .get(self.url("video_status.get"))
            .query(&[("video_id", video_id)])
            .send()
            .await?;
        VideoStatus::from_payload(&Self::read_json(response).await?)
    }

    async fn avatars(&self) -> Result<Vec<Avatar>, VideoError> {
        let response = self.client.get(self.url("avatars")).send().await?;
        list_field(Self::read_json(response).await?, "avatars")
    }

    async fn voices(&self) -> Result<Vec<Voice>, VideoError> {
        let response = self.client.get(self.url("voices")).send().await?;
        list_field(Self::read_json(response).await?, "voices")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            max_attempts: 40,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum VideoOutcome {
    Completed { video_url: Option<String>, attempts: u32 },
    Failed { error: String, attempts: u32 },
    TimedOut { attempts: u32 },
    Cancelled { attempts: u32 },
}

impl VideoOutcome {
    pub fn status_label(&self) -> &'static str {
        match self {
            VideoOutcome::Completed { .. } => "completed",
            VideoOutcome::Failed { .. } => "failed",
            VideoOutcome::TimedOut { .. } => "timed_out",
            VideoOutcome::Cancelled { .. } => "cancelled",
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            VideoOutcome::Completed { attempts, .. }
            | VideoOutcome::Failed { attempts, .. }
            | VideoOutcome::TimedOut { attempts }
            | VideoOutcome::Cancelled { attempts } => *attempts,
        }
    }
}

/// Where poll progress and the final outcome are recorded.
#[async_trait]
pub trait VideoStatusSink: Send + Sync {
    async fn record_attempt(&self, video_id: &str, attempt: u32, status: &VideoStatus) -> anyhow::Result<()>;
    async fn record_outcome(&self, video_id: &str, outcome: &VideoOutcome) -> anyhow::Result<()>;
}

/// Spawns one poll task per submitted job. Tasks run detached from the
/// request that submitted them; the shared token stops all of them.
#[derive(Clone)]
pub struct VideoJobSupervisor {
    provider: Arc<dyn VideoProvider>,
    sink: Arc<dyn VideoStatusSink>,
    policy: PollPolicy,
    shutdown: CancellationToken,
}

impl VideoJobSupervisor {
    pub fn new(provider: Arc<dyn VideoProvider>, sink: Arc<dyn VideoStatusSink>, policy: PollPolicy) -> Self {
        Self {
            provider,
            sink,
            policy,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn spawn(&self, video_id: String) -> JoinHandle<VideoOutcome> {
        let provider = Arc::clone(&self.provider);
        let sink = Arc::clone(&self.sink);
        let policy = self.policy;
        let cancel = self.shutdown.child_token();
        tokio::spawn(async move {
            let outcome = poll_until_terminal(provider.as_ref(), sink.as_ref(), &video_id, policy, &cancel).await;
            info!(%video_id, outcome = outcome.status_label(), attempts = outcome.attempts(), "video job finished");
            if let Err(err) = sink.record_outcome(&video_id, &outcome).await {
                warn!(%video_id, error = %format!("{err:#}"), "failed to record video outcome");
            }
            outcome
        })
    }
}

/// Sleep one interval, poll once; repeat until a terminal status, the
/// attempt budget runs out, or the token is cancelled. Poll errors use up
/// an attempt.
pub async fn poll_until_terminal(
    provider: &dyn VideoProvider,
    sink: &dyn VideoStatusSink,
    video_id: &str,
    policy: PollPolicy,
    cancel: &CancellationToken,
) -> VideoOutcome {
    let mut attempts = 0;
    while attempts < policy.max_attempts {
        tokio::select! {
            _ = cancel.cancelled() => return VideoOutcome::Cancelled { attempts },
            _ = tokio::time::sleep(policy.interval) => {}
        }
        attempts += 1;

        let status = match provider.status(video_id).await {
            Ok(status) => status,
            Err(err) => {
                warn!(%video_id, attempt = attempts, error = %err, "video status poll failed");
                continue;
            }
        };
        debug!(%video_id, attempt = attempts, status = status.label(), "video status");
        if let Err(err) = sink.record_attempt(video_id, attempts, &status).await {
            warn!(%video_id, error = %format!("{err:#}"), "failed to record video poll");
        }
        match status {
            VideoStatus::Completed { video_url } => return VideoOutcome::Completed { video_url, attempts },
            VideoStatus::Failed { error } => {
                return VideoOutcome::Failed {
                    error: error.unwrap_or_else(|| "provider reported failure".to_string()),
                    attempts,
                }
            }
            VideoStatus::Pending | VideoStatus::Processing => {}
        }
    }
    VideoOutcome::TimedOut { attempts }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct ScriptedProvider {
        statuses: Mutex<VecDeque<Result<VideoStatus, VideoError>>>,
    }

    impl ScriptedProvider {
        fn new(statuses: Vec<Result<VideoStatus, VideoError>>) -> Self {
            Self {
                statuses: Mutex::new(statuses.into()),
            }
        }
    }

    #[async_trait]
    impl VideoProvider for ScriptedProvider {
        async fn submit(&self, _request: &VideoRequest) -> Result<String, VideoError> {
            Ok("vid-1".into())
        }

        async fn status(&self, _video_id: &str) -> Result<VideoStatus, VideoError> {
            self.statuses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(VideoStatus::Processing))
        }

        async fn avatars(&self) -> Result<Vec<Avatar>, VideoError> {
            Ok(Vec::new())
        }

        async fn voices(&self) -> Result<Vec<Voice>, VideoError> {
            Ok(Vec::new())
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        attempts: Mutex<Vec<(u32, &'static str)>>,
        outcomes: Mutex<Vec<VideoOutcome>>,
    }

    #[async_trait]
    impl VideoStatusSink for RecordingSink {
        async fn record_attempt(&self, _video_id: &str, attempt: u32, status: &VideoStatus) -> anyhow::Result<()> {
            self.attempts.lock().unwrap().push((attempt, status.label()));
            Ok(())
        }

        async fn record_outcome(&self, _video_id: &str, outcome: &VideoOutcome) -> anyhow::Result<()> {
            self.outcomes.lock().unwrap().push(outcome.clone());
            Ok(())
        }
    }

    fn fast(max_attempts: u32) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(1),
            max_attempts,
        }
    }

    #[tokio::test]
    async fn completes_after_processing_polls() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(VideoStatus::Pending),
            Ok(VideoStatus::Processing),
            Ok(VideoStatus::Completed {
                video_url: Some("https://cdn.example/v.mp4".into()),
            }),
        ]));
        let sink = Arc::new(RecordingSink::default());
        let supervisor = VideoJobSupervisor::new(provider, sink.clone(), fast(10));

        let outcome = supervisor.spawn("vid-1".into()).await.unwrap();
        assert_eq!(
            outcome,
            VideoOutcome::Completed {
                video_url: Some("https://cdn.example/v.mp4".into()),
                attempts: 3
            }
        );
        assert_eq!(
            *sink.attempts.lock().unwrap(),
            vec![(1, "pending"), (2, "processing"), (3, "completed")]
        );
        assert_eq!(sink.outcomes.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn provider_failure_is_terminal() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(VideoStatus::Failed {
            error: Some("avatar not found".into()),
        })]));
        let sink = Arc::new(RecordingSink::default());
        let outcome = VideoJobSupervisor::new(provider, sink, fast(10))
            .spawn("vid-1".into())
            .await
            .unwrap();
        assert_eq!(
            outcome,
            VideoOutcome::Failed {
                error: "avatar not found".into(),
                attempts: 1
            }
        );
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Err(VideoError::Payload("flaky".into())),
            Ok(VideoStatus::Processing),
        ]));
        let sink = Arc::new(RecordingSink::default());
        let outcome = VideoJobSupervisor::new(provider, sink.clone(), fast(4))
            .spawn("vid-1".into())
            .await
            .unwrap();
        assert_eq!(outcome, VideoOutcome::TimedOut { attempts: 4 });
        assert_eq!(sink.attempts.lock().unwrap().len(), 3);
        assert_eq!(outcome.status_label(), "timed_out");
    }

    #[tokio::test]
    async fn shutdown_cancels_pending_jobs() {
        let provider = Arc::new(ScriptedProvider::new(Vec::new()));
        let sink = Arc::new(RecordingSink::default());
        let supervisor = VideoJobSupervisor::new(
            provider,
            sink.clone(),
            PollPolicy {
                interval: Duration::from_secs(3600),
                max_attempts: 40,
            },
        );
        let handle = supervisor.spawn("vid-1".into());
        supervisor.shutdown_token().cancel();
        assert_eq!(handle.await.unwrap(), VideoOutcome::Cancelled { attempts: 0 });
        assert_eq!(
            *sink.outcomes.lock().unwrap(),
            vec![VideoOutcome::Cancelled { attempts: 0 }]
        );
    }

    #[test]
    fn status_payloads_parse() {
        let done = VideoStatus::from_payload(&json!({"status": "completed", "video_url": "u"})).unwrap();
        assert_eq!(done, VideoStatus::Completed { video_url: Some("u".into()) });
        let failed = VideoStatus::from_payload(&json!({"status": "failed", "error": {"message": "bad voice"}})).unwrap();
        assert_eq!(failed, VideoStatus::Failed { error: Some("bad voice".into()) });
        assert_eq!(VideoStatus::from_payload(&json!({"status": "waiting"})).unwrap(), VideoStatus::Pending);
        assert!(VideoStatus::from_payload(&json!({})).is_err());
    }

    #[test]
    fn avatar_lists_unwrap_data_envelope() {
        let body = json!({"data": {"avatars": [{"avatar_id": "a1", "avatar_name": "Coach"}]}});
        let avatars: Vec<Avatar> = list_field(unwrap_data(body), "avatars").unwrap();
        assert_eq!(avatars[0].avatar_id, "a1");
        let bare: Vec<Voice> = list_field(json!([{"voice_id": "v1"}]), "voices").unwrap();
        assert_eq!(bare[0].voice_id, "v1");
    }
}
