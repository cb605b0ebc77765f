//! Inference providers and model lifetime.
//!
use std::sync::Arc;

use common::protocol::InferenceResult;
use image::RgbImage;
use tokio::sync::Mutex;

use crate::error::InferenceError;

/// A loaded model ready to run on frames.
pub trait InferModel: Send + Sync {
    /// Run the model on `frame`. Blocking; the loop calls it on the blocking thread pool.
    fn infer(&self, frame: &RgbImage) -> Result<InferenceResult, InferenceError>;
}

/// Something that can produce a loaded model.
pub trait ModelLoader: Send + Sync {
    /// Load the model. Blocking.
    fn load(&self) -> Result<Arc<dyn InferModel>, InferenceError>;
}

impl<F> ModelLoader for F
where
    F: Fn() -> Result<Arc<dyn InferModel>, InferenceError> + Send + Sync,
{
    fn load(&self) -> Result<Arc<dyn InferModel>, InferenceError> {
        self()
    }
}

/// When a cached model is thrown away.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LoadPolicy {
    /// Load on first use and keep it for the lifetime of the cache.
    #[default]
    Once,
    /// Load again after every stop of the camera.
    EveryStart,
}

/// Lazily loaded model shared across start/stop cycles.
pub struct ModelCache {
    loader: Arc<dyn ModelLoader>,
    policy: LoadPolicy,
    model: Mutex<Option<Arc<dyn InferModel>>>,
}

impl ModelCache {
    pub fn new(loader: Arc<dyn ModelLoader>, policy: LoadPolicy) -> Self {
        Self {
            loader,
            policy,
            model: Mutex::new(None),
        }
    }

    pub fn policy(&self) -> LoadPolicy {
        self.policy
    }

    /// Get the cached model, loading it on the blocking pool if needed.
    ///
    /// Concurrent callers wait for the same load. A failed load is retried on the next call.
    pub async fn get_or_load(&self) -> Result<Arc<dyn InferModel>, InferenceError> {
        let mut slot = self.model.lock().await;
        if let Some(model) = slot.as_ref() {
            return Ok(Arc::clone(model));
        }

        log::info!("Loading model");
        let loader = Arc::clone(&self.loader);
        let model = tokio::task::spawn_blocking(move || loader.load())
            .await
            .map_err(|_| InferenceError::Task)??;
        log::info!("Model loaded");

        *slot = Some(Arc::clone(&model));
        Ok(model)
    }

    /// Drop the cached model if the policy asks for a fresh one on the next start.
    pub async fn on_stop(&self) {
        if self.policy == LoadPolicy::EveryStart && self.model.lock().await.take().is_some() {
            log::debug!("Dropped cached model");
        }
    }
}
