//! The capture-infer-render loop.
//!
//! A [`CaptureLoop`] owns one camera stream, one poll timer and one drawing surface. Every tick
//! it captures the latest frame, runs the injected model on it, redraws the overlay from scratch
//! and hands the result to the registered consumers.
//!
//! State machine: `Stopped -> Starting -> Active -> Stopped`. `stop` is accepted in every state.
//! Ticks never overlap; a tick that finds the previous one still running is skipped.
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
        TryLockError, Weak,
    },
    time::Duration,
};

use common::protocol::{Facing, InferenceResult};
use image::RgbImage;
use serde::Serialize;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::{
    config::LoopConfig,
    error::{InferenceError, MediaAccessError},
    media::{MediaDevices, MediaStream, SourceInfo},
    meter::Meter,
    model::InferModel,
    overlay::DrawingSurface,
    render::Renderer,
};

/// Lifecycle of the media source.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopState {
    Stopped,
    Starting,
    Active,
}

/// Why a tick did nothing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    /// The loop is not active.
    Inactive,
    /// The previous tick is still waiting for inference.
    Busy,
    /// No decodable frame was available.
    FrameNotReady,
    /// No model is installed.
    NoInferenceFn,
}

/// Result of a single tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// The overlay was redrawn and the result delivered.
    Delivered,
    Skipped(SkipReason),
    /// Inference failed; the loop keeps running.
    Failed,
    /// The loop was stopped or restarted while inference was in flight.
    Discarded,
}

type ResultConsumer = Box<dyn Fn(&InferenceResult) + Send + Sync>;
type OverlayConsumer<S> = Box<dyn Fn(&RgbImage, &S) + Send + Sync>;

struct ActiveSource {
    info: SourceInfo,
    stream: Arc<Mutex<Box<dyn MediaStream>>>,
}

struct Control {
    state: LoopState,
    /// Bumped on every start and stop, so stale work can recognize itself.
    generation: u64,
    source: Option<ActiveSource>,
    ticker: Option<CancellationToken>,
}

struct Shared<S: DrawingSurface> {
    devices: Arc<dyn MediaDevices>,
    config: LoopConfig,
    control: Mutex<Control>,
    /// Held while a device is opened and until a stale stream is released.
    open_gate: tokio::sync::Mutex<()>,
    in_flight: AtomicBool,
    model: RwLock<Option<Arc<dyn InferModel>>>,
    renderer: Box<dyn Renderer>,
    surface: Mutex<S>,
    result_consumers: RwLock<Vec<ResultConsumer>>,
    overlay_consumers: RwLock<Vec<OverlayConsumer<S>>>,
    meter: Arc<Meter>,
}

/// Handle to a capture loop. Clones share the same loop; the stream is released when the last
/// handle is dropped.
pub struct CaptureLoop<S: DrawingSurface> {
    shared: Arc<Shared<S>>,
}

impl<S: DrawingSurface> Clone for CaptureLoop<S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<S: DrawingSurface + Send + 'static> CaptureLoop<S> {
    /// Create a stopped loop. `renderer` decides how results are drawn onto `surface`.
    pub fn new(
        devices: Arc<dyn MediaDevices>,
        renderer: Box<dyn Renderer>,
        surface: S,
        config: LoopConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                devices,
                config,
                control: Mutex::new(Control {
                    state: LoopState::Stopped,
                    generation: 0,
                    source: None,
                    ticker: None,
                }),
                open_gate: tokio::sync::Mutex::new(()),
                in_flight: AtomicBool::new(false),
                model: RwLock::new(None),
                renderer,
                surface: Mutex::new(surface),
                result_consumers: RwLock::new(Vec::new()),
                overlay_consumers: RwLock::new(Vec::new()),
                meter: Arc::new(Meter::new()),
            }),
        }
    }

    /// Open the camera facing `facing` and begin polling.
    ///
    /// Does nothing if the loop is already starting or active. If `stop` is called while the
    /// camera is being opened, the new stream is released and the loop stays stopped.
    pub async fn start(&self, facing: Facing) -> Result<(), MediaAccessError> {
        let generation = {
            let mut control = lock(&self.shared.control);
            if control.state != LoopState::Stopped {
                log::debug!("Ignoring start of {} camera while {:?}", facing, control.state);
                return Ok(());
            }
            control.state = LoopState::Starting;
            control.generation += 1;
            control.generation
        };
        let mut starting = StartingGuard {
            shared: &self.shared,
            generation,
            armed: true,
        };

        // A start overtaken by stop may still be opening its device
        let _gate = self.shared.open_gate.lock().await;
        if lock(&self.shared.control).generation != generation {
            log::info!("Start of {} camera overtaken by stop", facing);
            return Ok(());
        }

        log::info!("Starting {} camera", facing);
        let devices = Arc::clone(&self.shared.devices);
        let opened = tokio::task::spawn_blocking(move || devices.open(facing))
            .await
            .map_err(|err| MediaAccessError::Task(err.to_string()))
            .and_then(|opened| opened);

        let mut stream = match opened {
            Ok(stream) => stream,
            Err(err) => {
                log::warn!("Unable to start {} camera: {}", facing, err);
                return Err(err);
            }
        };

        let token = {
            let mut control = lock(&self.shared.control);
            if control.generation != generation {
                drop(control);
                log::info!("Start of {} camera overtaken by stop", facing);
                stream.stop();
                return Ok(());
            }

            let token = CancellationToken::new();
            control.state = LoopState::Active;
            control.source = Some(ActiveSource {
                info: SourceInfo::new(facing),
                stream: Arc::new(Mutex::new(stream)),
            });
            control.ticker = Some(token.clone());
            token
        };
        starting.armed = false;

        spawn_ticker(
            Arc::downgrade(&self.shared),
            self.shared.config.interval,
            token,
        );
        log::info!("{} camera active", facing);

        Ok(())
    }

    /// Release the stream and cancel the poll timer. Safe to call in any state.
    pub fn stop(&self) {
        self.shared.stop();
    }

    /// Stop the current stream, then open the camera facing `facing`.
    pub async fn switch_source(&self, facing: Facing) -> Result<(), MediaAccessError> {
        self.stop();
        self.start(facing).await
    }

    /// Install or remove the model. Ticks are skipped while no model is installed.
    pub fn set_inference_fn(&self, model: Option<Arc<dyn InferModel>>) {
        *write(&self.shared.model) = model;
    }

    pub fn has_inference_fn(&self) -> bool {
        read(&self.shared.model).is_some()
    }

    /// Register a consumer called with every delivered result.
    pub fn on_result<F>(&self, consumer: F)
    where
        F: Fn(&InferenceResult) + Send + Sync + 'static,
    {
        write(&self.shared.result_consumers).push(Box::new(consumer));
    }

    /// Register a consumer called after each redraw with the frame and the drawn surface.
    pub fn on_overlay<F>(&self, consumer: F)
    where
        F: Fn(&RgbImage, &S) + Send + Sync + 'static,
    {
        write(&self.shared.overlay_consumers).push(Box::new(consumer));
    }

    /// Run one tick now.
    pub async fn tick(&self) -> TickOutcome {
        self.shared.tick().await
    }

    pub fn state(&self) -> LoopState {
        lock(&self.shared.control).state
    }

    /// The active source, if any.
    pub fn source(&self) -> Option<SourceInfo> {
        lock(&self.shared.control)
            .source
            .as_ref()
            .map(|source| source.info)
    }

    pub fn config(&self) -> &LoopConfig {
        &self.shared.config
    }

    pub fn meter(&self) -> Arc<Meter> {
        Arc::clone(&self.shared.meter)
    }

    /// Inspect the drawing surface.
    pub fn with_surface<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        let surface = lock(&self.shared.surface);
        f(&*surface)
    }
}

impl<S: DrawingSurface> Shared<S> {
    fn stop(&self) {
        let source = {
            let mut control = lock(&self.control);
            if control.state == LoopState::Stopped {
                return;
            }
            control.state = LoopState::Stopped;
            control.generation += 1;
            if let Some(ticker) = control.ticker.take() {
                ticker.cancel();
            }
            control.source.take()
        };

        if let Some(source) = source {
            release_stream(source.stream);
            log::info!("Stopped {} camera", source.info.facing);
        }
        lock(&self.surface).clear();
    }

    fn is_current(&self, generation: u64) -> bool {
        let control = lock(&self.control);
        control.state == LoopState::Active && control.generation == generation
    }

    fn record_dimensions(&self, generation: u64, width: u32, height: u32) {
        let mut control = lock(&self.control);
        if control.generation == generation {
            if let Some(source) = control.source.as_mut() {
                source.info.width = width;
                source.info.height = height;
            }
        }
    }
}

impl<S: DrawingSurface + Send + 'static> Shared<S> {
    async fn tick(&self) -> TickOutcome {
        let outcome = self.run_tick().await;
        match outcome {
            TickOutcome::Delivered => self.meter.tick_delivered(),
            TickOutcome::Failed => self.meter.tick_failed(),
            TickOutcome::Skipped(_) | TickOutcome::Discarded => self.meter.tick_skipped(),
        }
        outcome
    }

    async fn run_tick(&self) -> TickOutcome {
        if self.in_flight.swap(true, Ordering::AcqRel) {
            log::trace!("Previous tick still running");
            return TickOutcome::Skipped(SkipReason::Busy);
        }
        let _in_flight = InFlight(&self.in_flight);

        let (generation, stream) = {
            let control = lock(&self.control);
            match (control.state, control.source.as_ref()) {
                (LoopState::Active, Some(source)) => {
                    (control.generation, Arc::clone(&source.stream))
                }
                _ => return TickOutcome::Skipped(SkipReason::Inactive),
            }
        };

        let model = read(&self.model).clone();
        let Some(model) = model else {
            return TickOutcome::Skipped(SkipReason::NoInferenceFn);
        };

        let captured = tokio::task::spawn_blocking(move || {
            let mut stream = lock(&stream);
            stream.capture()
        })
        .await;
        let frame = match captured {
            Ok(Some(frame)) => Arc::new(frame),
            Ok(None) => return TickOutcome::Skipped(SkipReason::FrameNotReady),
            Err(err) => {
                log::warn!("Capture task failed: {}", err);
                return TickOutcome::Skipped(SkipReason::FrameNotReady);
            }
        };

        // Overlay always matches the frame it is drawn for
        let (width, height) = frame.dimensions();
        self.record_dimensions(generation, width, height);
        lock(&self.surface).resize(width, height);

        let input = Arc::clone(&frame);
        let inferred = tokio::task::spawn_blocking(move || model.infer(&input))
            .await
            .map_err(|_| InferenceError::Task)
            .and_then(|inferred| inferred);
        let result = match inferred {
            Ok(result) => result,
            Err(err) => {
                log::warn!("Skipping tick: {}", err);
                return TickOutcome::Failed;
            }
        };

        if !self.is_current(generation) {
            log::debug!("Discarding {} of a stopped stream", result.kind());
            return TickOutcome::Discarded;
        }

        {
            let mut surface = lock(&self.surface);
            surface.resize(width, height);
            surface.clear();
            self.renderer.render(&result, &mut *surface);

            for consumer in read(&self.overlay_consumers).iter() {
                consumer(frame.as_ref(), &*surface);
            }
        }

        for consumer in read(&self.result_consumers).iter() {
            consumer(&result);
        }
        log::debug!("Delivered {} {}", result.len(), result.kind());

        TickOutcome::Delivered
    }
}

impl<S: DrawingSurface> Drop for Shared<S> {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Resets a `Starting` loop to `Stopped` if `start` bails out early.
struct StartingGuard<'a, S: DrawingSurface> {
    shared: &'a Shared<S>,
    generation: u64,
    armed: bool,
}

impl<S: DrawingSurface> Drop for StartingGuard<'_, S> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut control = lock(&self.shared.control);
        if control.generation == self.generation && control.state == LoopState::Starting {
            control.state = LoopState::Stopped;
        }
    }
}

/// Clears the in-flight flag when a tick ends.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn spawn_ticker<S: DrawingSurface + Send + 'static>(
    shared: Weak<Shared<S>>,
    period: Duration,
    token: CancellationToken,
) {
    tokio::spawn(async move {
        // First tick one period after start
        let period = period.max(Duration::from_millis(1));
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    let Some(shared) = shared.upgrade() else {
                        break;
                    };
                    shared.tick().await;
                }
            }
        }

        log::debug!("Poll timer stopped");
    });
}

/// Stop `stream` without waiting for a capture in progress.
///
/// If a capture holds the stream, the stop runs on the blocking pool once the capture returns.
fn release_stream(stream: Arc<Mutex<Box<dyn MediaStream>>>) {
    let released = match stream.try_lock() {
        Ok(mut guard) => {
            guard.stop();
            true
        }
        Err(TryLockError::Poisoned(poisoned)) => {
            poisoned.into_inner().stop();
            true
        }
        Err(TryLockError::WouldBlock) => false,
    };
    if released {
        return;
    }

    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            log::debug!("Capture in progress, releasing stream in the background");
            handle.spawn_blocking(move || lock(&stream).stop());
        }
        Err(_) => lock(&stream).stop(),
    }
}

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read<T: ?Sized>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T: ?Sized>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
