use crate::config::EngineConfig;
use crate::error::{Result, SilhouetteError};
use crate::render::{Silhouette, SilhouetteOptions};
use crate::segmentation::{ModelLoader, ModelWorker, OnnxModelLoader};
use crate::source::{FetchOptions, ImageSource};
use anyhow::{anyhow, ensure, Context};
use image::{ImageFormat, RgbImage};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::Instrument;

type InitOutcome = Result<Arc<ModelWorker>>;

enum EngineState {
    Uninitialized,
    /// Callers waiting on the initialization already in flight
    Initializing(Vec<oneshot::Sender<InitOutcome>>),
    Ready(Arc<ModelWorker>),
}

/// Snapshot of the engine lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStatus {
    Uninitialized,
    Initializing { waiters: usize },
    Ready,
}

/// One entry of a batch: an identifier and an image locator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchItem {
    pub id: String,
    pub locator: String,
}

impl BatchItem {
    pub fn new(id: impl Into<String>, locator: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            locator: locator.into(),
        }
    }
}

/// Result for one batch item. Exactly one of `silhouette` / `error` is set.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub id: String,
    pub silhouette: Option<Silhouette>,
    pub error: Option<String>,
}

impl BatchOutcome {
    pub fn is_success(&self) -> bool {
        self.silhouette.is_some()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub succeeded: usize,
    pub failed: usize,
}

impl BatchSummary {
    pub fn of(outcomes: &[BatchOutcome]) -> Self {
        let succeeded = outcomes.iter().filter(|o| o.is_success()).count();
        Self {
            succeeded,
            failed: outcomes.len() - succeeded,
        }
    }
}

/// Person segmentation engine producing two-color silhouettes.
///
/// The model is built lazily on first use and shared by every call. Images
/// are segmented one at a time through a single worker queue, so concurrent
/// `transform` calls are safe and simply wait their turn.
pub struct SilhouetteEngine {
    config: EngineConfig,
    loader: Arc<dyn ModelLoader>,
    state: Mutex<EngineState>,
}

impl SilhouetteEngine {
    /// Engine backed by the ONNX selfie segmentation model
    pub fn new(config: EngineConfig) -> Self {
        Self::with_loader(config, OnnxModelLoader)
    }

    pub fn with_loader(config: EngineConfig, loader: impl ModelLoader + 'static) -> Self {
        Self {
            config,
            loader: Arc::new(loader),
            state: Mutex::new(EngineState::Uninitialized),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn status(&self) -> EngineStatus {
        match &*self.state.lock() {
            EngineState::Uninitialized => EngineStatus::Uninitialized,
            EngineState::Initializing(waiters) => EngineStatus::Initializing {
                waiters: waiters.len(),
            },
            EngineState::Ready(_) => EngineStatus::Ready,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.status() == EngineStatus::Ready
    }

    /// Whether this build and environment can run the engine.
    /// Loads nothing and does not initialize.
    pub fn is_supported(&self) -> bool {
        codecs_supported() && self.loader.is_available(&self.config)
    }

    /// Build and warm up the model if that has not happened yet.
    ///
    /// Concurrent callers share one initialization and all see its outcome.
    /// On failure the engine returns to uninitialized and the next call retries.
    pub async fn initialize(&self) -> Result<()> {
        self.worker().await.map(|_| ())
    }

    async fn worker(&self) -> InitOutcome {
        let pending = {
            let mut state = self.state.lock();
            match &mut *state {
                EngineState::Ready(worker) => return Ok(Arc::clone(worker)),
                EngineState::Initializing(waiters) => {
                    let (tx, rx) = oneshot::channel();
                    waiters.push(tx);
                    Some(rx)
                }
                EngineState::Uninitialized => {
                    *state = EngineState::Initializing(Vec::new());
                    None
                }
            }
        };

        if let Some(rx) = pending {
            return rx.await.unwrap_or_else(|_| Err(cancelled()));
        }

        let guard = InitGuard {
            state: &self.state,
            armed: true,
        };
        let outcome = self.construct().await;
        guard.finish(outcome)
    }

    async fn construct(&self) -> InitOutcome {
        tracing::info!("Initializing segmentation engine");

        let result: anyhow::Result<Arc<ModelWorker>> = async {
            let loader = Arc::clone(&self.loader);
            let config = self.config.clone();
            let model = tokio::task::spawn_blocking(move || loader.load(&config))
                .await
                .context("Model loader task failed")??;

            let worker = ModelWorker::spawn(model)?;

            // Warm-up: the model must answer a trivial placeholder before we call it ready
            let mask = worker
                .segment(RgbImage::new(1, 1))
                .await
                .context("Warm-up pass failed")?;
            ensure!(!mask.is_empty(), "warm-up pass produced an empty mask");

            Ok(Arc::new(worker))
        }
        .instrument(tracing::info_span!("initialize"))
        .await;

        match result {
            Ok(worker) => {
                tracing::info!(
                    "Segmentation engine ready (model input {:?})",
                    worker.input_size()
                );
                Ok(worker)
            }
            Err(e) => {
                tracing::error!("Failed to initialize segmentation: {:#}", e);
                Err(SilhouetteError::initialization(&e))
            }
        }
    }

    /// Produce a silhouette for one image, initializing the engine first if needed
    pub async fn transform(
        &self,
        image: &RgbImage,
        options: &SilhouetteOptions,
    ) -> Result<Silhouette> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(SilhouetteError::InvalidImage { width, height });
        }

        let worker = self.worker().await?;

        let mask = worker
            .segment(image.clone())
            .await
            .map_err(|e| SilhouetteError::transform(&e))?;

        if mask.dimensions() != (width, height) {
            let e = anyhow!(
                "mask is {:?} but image is {}x{}",
                mask.dimensions(),
                width,
                height
            );
            return Err(SilhouetteError::transform(&e));
        }

        Silhouette::from_mask(&mask, options)
    }

    /// Process items strictly in order with default colors.
    ///
    /// Only an initialization failure aborts the batch. Every other failure is
    /// recorded on its item. `on_progress` receives `processed / total` after
    /// each item.
    pub async fn batch_transform(
        &self,
        items: &[BatchItem],
        on_progress: Option<&mut (dyn FnMut(f32) + Send)>,
    ) -> Result<Vec<BatchOutcome>> {
        self.batch_transform_with(items, &SilhouetteOptions::default(), on_progress)
            .await
    }

    /// [`batch_transform`](Self::batch_transform) with explicit colors
    pub async fn batch_transform_with(
        &self,
        items: &[BatchItem],
        options: &SilhouetteOptions,
        mut on_progress: Option<&mut (dyn FnMut(f32) + Send)>,
    ) -> Result<Vec<BatchOutcome>> {
        self.initialize().await?;

        let total = items.len();
        let fetch = FetchOptions {
            timeout: self.config.http_timeout,
            bearer_token: self.config.bearer_token.clone(),
        };
        let mut outcomes = Vec::with_capacity(total);

        tracing::info!("Creating silhouettes for {} images", total);

        for (index, item) in items.iter().enumerate() {
            let result = match self.decode(&item.locator, &fetch).await {
                Ok(image) => self.transform(&image, options).await,
                Err(e) => Err(e),
            };

            let outcome = match result {
                Ok(silhouette) => BatchOutcome {
                    id: item.id.clone(),
                    silhouette: Some(silhouette),
                    error: None,
                },
                Err(e) => {
                    tracing::warn!("Failed to create silhouette for {}: {}", item.id, e);
                    BatchOutcome {
                        id: item.id.clone(),
                        silhouette: None,
                        error: Some(e.to_string()),
                    }
                }
            };
            outcomes.push(outcome);

            if let Some(report) = on_progress.as_deref_mut() {
                report((index + 1) as f32 / total as f32);
            }
        }

        let summary = BatchSummary::of(&outcomes);
        tracing::info!(
            "Batch finished: {} succeeded, {} failed",
            summary.succeeded,
            summary.failed
        );

        Ok(outcomes)
    }

    async fn decode(&self, locator: &str, fetch: &FetchOptions) -> Result<RgbImage> {
        let locator = locator.to_string();
        let fetch = fetch.clone();

        tokio::task::spawn_blocking(move || ImageSource::parse(&locator)?.load(&fetch))
            .await
            .context("Image decode task failed")
            .and_then(|r| r)
            .map_err(|e| SilhouetteError::decode(&e))
    }
}

/// Image codecs the engine relies on are compiled in
pub fn codecs_supported() -> bool {
    ImageFormat::Png.reading_enabled()
        && ImageFormat::Png.writing_enabled()
        && ImageFormat::Jpeg.reading_enabled()
}

fn cancelled() -> SilhouetteError {
    SilhouetteError::Initialization("initialization was cancelled".into())
}

/// Resolves the in-flight initialization, even if its future is dropped
struct InitGuard<'a> {
    state: &'a Mutex<EngineState>,
    armed: bool,
}

impl InitGuard<'_> {
    fn finish(mut self, outcome: InitOutcome) -> InitOutcome {
        self.armed = false;
        let next = match &outcome {
            Ok(worker) => EngineState::Ready(Arc::clone(worker)),
            Err(_) => EngineState::Uninitialized,
        };
        let waiters = self.replace(next);
        for waiter in waiters {
            let _ = waiter.send(outcome.clone());
        }
        outcome
    }

    fn replace(&self, next: EngineState) -> Vec<oneshot::Sender<InitOutcome>> {
        match std::mem::replace(&mut *self.state.lock(), next) {
            EngineState::Initializing(waiters) => waiters,
            _ => Vec::new(),
        }
    }
}

impl Drop for InitGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            tracing::warn!("Segmentation initialization was cancelled");
            for waiter in self.replace(EngineState::Uninitialized) {
                let _ = waiter.send(Err(cancelled()));
            }
        }
    }
}
