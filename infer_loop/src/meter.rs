//! Tick counters of a capture loop.
//!
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use tokio::{task::JoinHandle, time::interval};

#[derive(Debug, Default)]
pub struct Meter {
    delivered: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
}

/// Counter values taken by [`Meter::get_reset`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MeterReading {
    pub delivered: u64,
    pub skipped: u64,
    pub failed: u64,
}

impl Meter {
    pub const fn new() -> Meter {
        Meter {
            delivered: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    pub fn tick_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tick_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tick_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Current counts without resetting them.
    pub fn get(&self) -> MeterReading {
        MeterReading {
            delivered: self.delivered.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    pub fn get_reset(&self) -> MeterReading {
        MeterReading {
            delivered: self.delivered.swap(0, Ordering::Relaxed),
            skipped: self.skipped.swap(0, Ordering::Relaxed),
            failed: self.failed.swap(0, Ordering::Relaxed),
        }
    }
}

/// Log tick rates of `meter` every `period`.
pub fn spawn_meter_logger(meter: Arc<Meter>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut log_interval = interval(period);
        log_interval.tick().await;

        loop {
            let start = Instant::now();
            log_interval.tick().await;

            let reading = meter.get_reset();
            let elapsed = start.elapsed().as_secs_f32();

            if reading.delivered > 0 {
                log::info!(
                    "Inferred frames per second: {:.2}",
                    reading.delivered as f32 / elapsed
                );
            }
            if reading.skipped > 0 || reading.failed > 0 {
                log::info!(
                    "Skipped {} and failed {} ticks in {:.1}s",
                    reading.skipped,
                    reading.failed,
                    elapsed
                );
            }
        }
    })
}
