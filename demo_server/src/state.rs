//! State shared by the HTTP handlers and the results feed.
//!
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use common::protocol::{Facing, ResultMsg};
use image::{RgbImage, RgbaImage};
use infer_loop::{
    history::ResultHistory,
    media::SourceInfo,
    model::{LoadPolicy, ModelCache},
    overlay::ImageCanvas,
    CaptureLoop, LoopState, MediaAccessError,
};
use serde::Serialize;
use tokio::{sync::broadcast, task::JoinHandle};

use crate::{as_jpeg_stream_item, compose_jpeg};

/// Snapshot of the camera returned by the control endpoints.
#[derive(Clone, Debug, Serialize)]
pub struct CameraStatus {
    pub state: LoopState,
    pub source: Option<SourceInfo>,
    pub model_loaded: bool,
}

pub struct DemoState {
    pub capture: CaptureLoop<ImageCanvas>,
    pub models: Arc<ModelCache>,
    pub history: Arc<Mutex<ResultHistory>>,
    /// Overlaid frames as multipart stream items.
    pub frames_tx: broadcast::Sender<Bytes>,
    pub results_tx: broadcast::Sender<ResultMsg>,
}

impl DemoState {
    /// Wire the consumers of `capture` to the history and the broadcast channels.
    pub fn new(capture: CaptureLoop<ImageCanvas>, models: Arc<ModelCache>) -> Arc<Self> {
        let history = Arc::new(Mutex::new(ResultHistory::default()));
        let (frames_tx, _) = broadcast::channel(4);
        let (results_tx, _) = broadcast::channel(32);

        {
            let history = Arc::clone(&history);
            let results_tx = results_tx.clone();
            capture.on_result(move |result| {
                let msg = history
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(result.clone())
                    .clone();
                // Nobody listening is fine
                results_tx.send(msg).ok();
            });
        }

        {
            let frames_tx = frames_tx.clone();
            capture.on_overlay(move |frame, canvas| {
                spawn_overlay_encode(&frames_tx, frame, canvas.image());
            });
        }

        Arc::new(Self {
            capture,
            models,
            history,
            frames_tx,
            results_tx,
        })
    }

    /// Start the camera and load the model in the background if none is installed.
    pub async fn start(self: &Arc<Self>, facing: Facing) -> Result<CameraStatus, MediaAccessError> {
        self.capture.start(facing).await?;
        self.ensure_model();
        Ok(self.status())
    }

    pub async fn stop(&self) -> CameraStatus {
        self.release().await;
        self.status()
    }

    /// Switch to `facing`, or to the other camera when `None`.
    pub async fn switch(
        self: &Arc<Self>,
        facing: Option<Facing>,
    ) -> Result<CameraStatus, MediaAccessError> {
        let facing = facing.unwrap_or_else(|| match self.capture.source() {
            Some(source) => source.facing.toggled(),
            None => self.capture.config().default_facing,
        });

        self.release().await;
        self.start(facing).await
    }

    pub fn status(&self) -> CameraStatus {
        CameraStatus {
            state: self.capture.state(),
            source: self.capture.source(),
            model_loaded: self.capture.has_inference_fn(),
        }
    }

    pub fn results(&self) -> Vec<ResultMsg> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn clear_results(&self) {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Stop the camera and drop the model if the policy wants a fresh one per start.
    async fn release(&self) {
        self.capture.stop();
        self.models.on_stop().await;
        if self.models.policy() == LoadPolicy::EveryStart {
            self.capture.set_inference_fn(None);
        }
    }

    fn ensure_model(self: &Arc<Self>) {
        if self.capture.has_inference_fn() {
            return;
        }

        let state = Arc::clone(self);
        tokio::spawn(async move {
            match state.models.get_or_load().await {
                Ok(model) => {
                    if state.capture.state() == LoopState::Stopped {
                        log::debug!("Camera stopped while loading, model kept in cache");
                        return;
                    }
                    state.capture.set_inference_fn(Some(model));
                }
                Err(err) => log::error!("Could not load model: {err}"),
            }
        });
    }
}

/// Compose and encode an overlaid frame on the blocking pool and publish it.
///
/// Nothing is copied when no client is watching the stream.
pub fn spawn_overlay_encode(
    frames_tx: &broadcast::Sender<Bytes>,
    frame: &RgbImage,
    overlay: &RgbaImage,
) -> Option<JoinHandle<()>> {
    if frames_tx.receiver_count() == 0 {
        return None;
    }

    let frames_tx = frames_tx.clone();
    let (frame, overlay) = (frame.clone(), overlay.clone());
    Some(tokio::task::spawn_blocking(move || {
        match compose_jpeg(&frame, &overlay) {
            Ok(jpeg) => {
                frames_tx.send(as_jpeg_stream_item(&jpeg)).ok();
            }
            Err(err) => log::warn!("Could not encode overlay frame: {err}"),
        }
    }))
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn overlay_not_encoded_without_viewers() {
        let (frames_tx, _) = broadcast::channel(4);

        let (frame, overlay) = (RgbImage::new(32, 24), RgbaImage::new(32, 24));

        let encode = spawn_overlay_encode(&frames_tx, &frame, &overlay);

        assert!(encode.is_none());
    }

    #[tokio::test]
    async fn overlay_encoded_off_the_caller() {
        let (frames_tx, mut frames_rx) = broadcast::channel(4);

        let (frame, overlay) = (RgbImage::new(32, 24), RgbaImage::new(32, 24));

        let encode = spawn_overlay_encode(&frames_tx, &frame, &overlay);
        encode.unwrap().await.unwrap();

        let item = frames_rx.try_recv().unwrap();
        assert!(item.starts_with(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n"));
    }
}
