use super::types::{Mask, SegmentationModel};
use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use std::panic::{self, AssertUnwindSafe};
use tokio::sync::{mpsc, oneshot};

struct Job {
    image: RgbImage,
    reply: oneshot::Sender<Result<Mask>>,
}

/// Owns a segmentation model on a dedicated thread.
///
/// Submissions queue up and are segmented one at a time; each caller awaits
/// the reply for its own image. The thread exits once every handle is dropped.
pub struct ModelWorker {
    jobs: mpsc::UnboundedSender<Job>,
    input_size: (u32, u32),
}

impl ModelWorker {
    pub fn spawn(model: Box<dyn SegmentationModel + Send>) -> Result<Self> {
        let input_size = model.input_size();
        let (jobs, queue) = mpsc::unbounded_channel();

        std::thread::Builder::new()
            .name("segmentation-worker".into())
            .spawn(move || run(model, queue))
            .context("Failed to spawn segmentation worker")?;

        Ok(Self { jobs, input_size })
    }

    /// Queue an image and wait for its mask
    pub async fn segment(&self, image: RgbImage) -> Result<Mask> {
        let (reply, response) = oneshot::channel();
        self.jobs
            .send(Job { image, reply })
            .map_err(|_| anyhow!("segmentation worker has stopped"))?;

        response
            .await
            .map_err(|_| anyhow!("segmentation worker dropped the request"))?
    }

    pub fn input_size(&self) -> (u32, u32) {
        self.input_size
    }
}

fn run(mut model: Box<dyn SegmentationModel + Send>, mut queue: mpsc::UnboundedReceiver<Job>) {
    tracing::debug!("Segmentation worker started");

    while let Some(job) = queue.blocking_recv() {
        // Caller went away before we got to it
        if job.reply.is_closed() {
            continue;
        }

        let result = panic::catch_unwind(AssertUnwindSafe(|| model.segment(&job.image)))
            .unwrap_or_else(|_| Err(anyhow!("segmentation model panicked")));
        let _ = job.reply.send(result);
    }

    tracing::debug!("Segmentation worker stopped");
}
