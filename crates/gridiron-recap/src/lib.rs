//! Weekly recap generation: point-in-time snapshots, prompt building,
//! text generation and video rendering.

pub mod config;
pub mod prompt;
pub mod snapshot;
pub mod store;
pub mod textgen;
pub mod video;

use std::sync::Arc;

use chrono::Utc;
use gridiron_core::{RecapRecord, WeekKey};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub use config::RecapConfig;
pub use prompt::{build_recap_prompt, system_prompt, RecapPrompt};
pub use snapshot::{assemble_snapshot, build_snapshot, RecapSnapshot, SnapshotSource};
pub use store::{PgRecapStore, RecapStore};
pub use textgen::{ChatCompletionClient, TextGenError, TextGenerator};
pub use video::{
    Avatar, HttpVideoProvider, PollPolicy, VideoError, VideoJobSupervisor, VideoOutcome, VideoProvider,
    VideoRequest, VideoStatus, VideoStatusSink, Voice,
};

#[derive(Debug, Error)]
pub enum RecapError {
    #[error("{0} is not configured")]
    NotConfigured(&'static str),
    #[error("no recap stored for {0}")]
    MissingRecap(WeekKey),
    #[error(transparent)]
    TextGen(#[from] TextGenError),
    #[error(transparent)]
    Video(#[from] VideoError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct VideoOptions {
    pub avatar_id: String,
    pub voice_id: String,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StartedVideo {
    pub video_id: String,
    pub season_year: i32,
    pub week: i32,
}

struct VideoBackend {
    provider: Arc<dyn VideoProvider>,
    supervisor: VideoJobSupervisor,
}

/// Snapshot, text and video operations over injected backends. Text and
/// video providers are optional; calls that need a missing one fail with
/// [`RecapError::NotConfigured`].
pub struct RecapService {
    source: Arc<dyn SnapshotSource>,
    store: Arc<dyn RecapStore>,
    textgen: Option<Arc<dyn TextGenerator>>,
    video: Option<VideoBackend>,
}

impl RecapService {
    pub fn new(source: Arc<dyn SnapshotSource>, store: Arc<dyn RecapStore>) -> Self {
        Self {
            source,
            store,
            textgen: None,
            video: None,
        }
    }

    pub fn with_text_generator(mut self, textgen: Arc<dyn TextGenerator>) -> Self {
        self.textgen = Some(textgen);
        self
    }

    pub fn with_video(
        mut self,
        provider: Arc<dyn VideoProvider>,
        sink: Arc<dyn VideoStatusSink>,
        policy: PollPolicy,
    ) -> Self {
        let supervisor = VideoJobSupervisor::new(Arc::clone(&provider), sink, policy);
        self.video = Some(VideoBackend { provider, supervisor });
        self
    }

    /// Postgres-backed service with whichever providers `config` enables.
    pub fn postgres(pool: PgPool, config: &RecapConfig) -> Result<Self, RecapError> {
        let store = Arc::new(PgRecapStore::new(pool));
        let mut service = Self::new(store.clone(), store.clone());
        if let Some((base_url, key)) = config.textgen() {
            let client = ChatCompletionClient::new(base_url, key, config.textgen_model.clone(), config.http_timeout)?;
            service = service.with_text_generator(Arc::new(client));
        }
        if let Some((base_url, key)) = config.video() {
            let provider = HttpVideoProvider::new(base_url, key, config.http_timeout)?;
            service = service.with_video(Arc::new(provider), store, config.poll);
        }
        Ok(service)
    }

    pub async fn snapshot(&self, target: WeekKey) -> Result<RecapSnapshot, RecapError> {
        Ok(assemble_snapshot(self.source.as_ref(), target).await?)
    }

    /// Build the snapshot, ask the text generator for a recap and store
    /// the returned text unchanged.
    pub async fn generate_recap(&self, target: WeekKey) -> Result<RecapRecord, RecapError> {
        let textgen = self.textgen.as_ref().ok_or(RecapError::NotConfigured("text generation"))?;
        let snapshot = self.snapshot(target).await?;
        let prompt = build_recap_prompt(&snapshot);
        let recap_text = textgen.generate(&prompt).await?;
        let recap = RecapRecord {
            season_year: target.season_year,
            week: target.week,
            recap_text,
            generated_at: Utc::now(),
        };
        self.store.save_recap(&recap, textgen.model()).await?;
        info!(%target, model = textgen.model(), chars = recap.recap_text.len(), "stored weekly recap");
        Ok(recap)
    }

    /// Submit the stored recap as a video script and start polling in the
    /// background. Returns once the provider has accepted the job.
    pub async fn start_video(&self, target: WeekKey, options: VideoOptions) -> Result<StartedVideo, RecapError> {
        let backend = self.video.as_ref().ok_or(RecapError::NotConfigured("video generation"))?;
        let recap = self
            .store
            .recap_for(target)
            .await?
            .ok_or(RecapError::MissingRecap(target))?;
        let request = VideoRequest {
            script: recap.recap_text,
            avatar_id: options.avatar_id,
            voice_id: options.voice_id,
            title: options
                .title
                .or_else(|| Some(format!("Season {} Week {} Recap", target.season_year, target.week))),
        };
        let video_id = backend.provider.submit(&request).await?;
        self.store.register_video(target, &video_id).await?;
        info!(%target, %video_id, "video job submitted");
        drop(backend.supervisor.spawn(video_id.clone()));
        Ok(StartedVideo {
            video_id,
            season_year: target.season_year,
            week: target.week,
        })
    }

    pub async fn avatars(&self) -> Result<Vec<Avatar>, RecapError> {
        let backend = self.video.as_ref().ok_or(RecapError::NotConfigured("video generation"))?;
        Ok(backend.provider.avatars().await?)
    }

    pub async fn voices(&self) -> Result<Vec<Voice>, RecapError> {
        let backend = self.video.as_ref().ok_or(RecapError::NotConfigured("video generation"))?;
        Ok(backend.provider.voices().await?)
    }

    /// Token that stops every background video poll when cancelled.
    pub fn shutdown_token(&self) -> Option<CancellationToken> {
        self.video.as_ref().map(|backend| backend.supervisor.shutdown_token())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{GameRow, RosterScoreRow};
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct MemoryRecaps {
        games: Vec<GameRow>,
        recaps: Mutex<BTreeMap<WeekKey, (RecapRecord, String)>>,
        videos: Mutex<Vec<(WeekKey, String)>>,
        outcomes: Mutex<Vec<VideoOutcome>>,
    }

    #[async_trait]
    impl SnapshotSource for MemoryRecaps {
        async fn games_through(&self, target: WeekKey) -> anyhow::Result<Vec<GameRow>> {
            Ok(self.games.iter().filter(|g| g.key() <= target).cloned().collect())
        }

        async fn roster_scores(&self, _target: WeekKey) -> anyhow::Result<Vec<RosterScoreRow>> {
            Ok(Vec::new())
        }

        async fn recaps_before(&self, target: WeekKey, limit: usize) -> anyhow::Result<Vec<RecapRecord>> {
            let recaps = self.recaps.lock().unwrap();
            Ok(recaps
                .range(..target)
                .rev()
                .take(limit)
                .map(|(_, (recap, _))| recap.clone())
                .collect())
        }
    }

    #[async_trait]
    impl RecapStore for MemoryRecaps {
        async fn save_recap(&self, recap: &RecapRecord, model: &str) -> anyhow::Result<()> {
            self.recaps.lock().unwrap().insert(
                WeekKey::new(recap.season_year, recap.week),
                (recap.clone(), model.to_string()),
            );
            Ok(())
        }

        async fn recap_for(&self, target: WeekKey) -> anyhow::Result<Option<RecapRecord>> {
            Ok(self.recaps.lock().unwrap().get(&target).map(|(r, _)| r.clone()))
        }

        async fn register_video(&self, target: WeekKey, video_id: &str) -> anyhow::Result<()> {
            self.videos.lock().unwrap().push((target, video_id.to_string()));
            Ok(())
        }
    }

    #[async_trait]
    impl VideoStatusSink for MemoryRecaps {
        async fn record_attempt(&self, _video_id: &str, _attempt: u32, _status: &VideoStatus) -> anyhow::Result<()> {
            Ok(())
        }

        async fn record_outcome(&self, _video_id: &str, outcome: &VideoOutcome) -> anyhow::Result<()> {
            self.outcomes.lock().unwrap().push(outcome.clone());
            Ok(())
        }
    }

    struct EchoGenerator {
        prompts: Mutex<Vec<RecapPrompt>>,
    }

    #[async_trait]
    impl TextGenerator for EchoGenerator {
        fn model(&self) -> &str {
            "echo-1"
        }

        async fn generate(&self, prompt: &RecapPrompt) -> Result<String, TextGenError> {
            self.prompts.lock().unwrap().push(prompt.clone());
            Ok("  Alice rolled Bob.\n".to_string())
        }
    }

    struct InstantVideo {
        scripts: Mutex<Vec<VideoRequest>>,
    }

    #[async_trait]
    impl VideoProvider for InstantVideo {
        async fn submit(&self, request: &VideoRequest) -> Result<String, VideoError> {
            self.scripts.lock().unwrap().push(request.clone());
            Ok("vid-42".into())
        }

        async fn status(&self, _video_id: &str) -> Result<VideoStatus, VideoError> {
            Ok(VideoStatus::Completed {
                video_url: Some("https://cdn.example/vid-42.mp4".into()),
            })
        }

        async fn avatars(&self) -> Result<Vec<Avatar>, VideoError> {
            Ok(vec![Avatar {
                avatar_id: "coach".into(),
                avatar_name: None,
                preview_image_url: None,
            }])
        }

        async fn voices(&self) -> Result<Vec<Voice>, VideoError> {
            Ok(Vec::new())
        }
    }

    fn memory() -> Arc<MemoryRecaps> {
        Arc::new(MemoryRecaps {
            games: vec![GameRow {
                season_year: 2024,
                week: 1,
                manager1_id: 1,
                manager1_name: "Alice".into(),
                manager2_id: 2,
                manager2_name: "Bob".into(),
                score1: 120.0,
                score2: 80.0,
                is_playoff: false,
            }],
            ..MemoryRecaps::default()
        })
    }

    fn options() -> VideoOptions {
        VideoOptions {
            avatar_id: "coach".into(),
            voice_id: "deep".into(),
            title: None,
        }
    }

    #[tokio::test]
    async fn recap_text_is_stored_verbatim() {
        let store = memory();
        let generator = Arc::new(EchoGenerator {
            prompts: Mutex::new(Vec::new()),
        });
        let service = RecapService::new(store.clone(), store.clone()).with_text_generator(generator.clone());

        let target = WeekKey::new(2024, 1);
        let recap = service.generate_recap(target).await.unwrap();
        assert_eq!(recap.recap_text, "  Alice rolled Bob.\n");

        let saved = store.recaps.lock().unwrap();
        let (stored, model) = saved.get(&target).unwrap();
        assert_eq!(stored.recap_text, "  Alice rolled Bob.\n");
        assert_eq!(model, "echo-1");
        assert!(generator.prompts.lock().unwrap()[0].context.contains("Alice 120.00 vs Bob 80.00"));
    }

    #[tokio::test]
    async fn missing_providers_are_reported() {
        let store = memory();
        let service = RecapService::new(store.clone(), store);
        let target = WeekKey::new(2024, 1);
        assert!(matches!(
            service.generate_recap(target).await,
            Err(RecapError::NotConfigured("text generation"))
        ));
        assert!(matches!(service.avatars().await, Err(RecapError::NotConfigured(_))));
        assert!(service.shutdown_token().is_none());
    }

    #[tokio::test]
    async fn video_requires_a_stored_recap() {
        let store = memory();
        let provider = Arc::new(InstantVideo {
            scripts: Mutex::new(Vec::new()),
        });
        let policy = PollPolicy {
            interval: Duration::from_millis(1),
            max_attempts: 3,
        };
        let service = RecapService::new(store.clone(), store.clone()).with_video(provider.clone(), store.clone(), policy);
        let target = WeekKey::new(2024, 1);

        assert!(matches!(
            service.start_video(target, options()).await,
            Err(RecapError::MissingRecap(key)) if key == target
        ));

        store
            .save_recap(
                &RecapRecord {
                    season_year: 2024,
                    week: 1,
                    recap_text: "Script body".into(),
                    generated_at: Utc::now(),
                },
                "echo-1",
            )
            .await
            .unwrap();
        let started = service.start_video(target, options()).await.unwrap();
        assert_eq!(started.video_id, "vid-42");
        assert_eq!(*store.videos.lock().unwrap(), vec![(target, "vid-42".to_string())]);

        let submitted = provider.scripts.lock().unwrap()[0].clone();
        assert_eq!(submitted.script, "Script body");
        assert_eq!(submitted.title.as_deref(), Some("Season 2024 Week 1 Recap"));

        for _ in 0..200 {
            if !store.outcomes.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(
            *store.outcomes.lock().unwrap(),
            vec![VideoOutcome::Completed {
                video_url: Some("https://cdn.example/vid-42.mp4".into()),
                attempts: 1
            }]
        );
        assert_eq!(service.avatars().await.unwrap()[0].avatar_id, "coach");
    }
}
