//! Sampling thread: the host stand-in for the converter interrupt.
//!
//! Spawns a thread that owns the `SampleSource` and the `DiverterCore`, and
//! feeds every sample set through the core. The background context talks to
//! it only through `SharedState`. Free-running and paced variants are
//! provided; pacing holds a fixed sample-set period against a `Clock`.
//!
//! Safety: Each `Sampler` spawns exactly one thread that is automatically
//! shut down when the `Sampler` is dropped, preventing thread leaks.
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use diverter_traits::clock::Clock;
use diverter_traits::{DigitalOutputs, SampleSource};

use crate::core::DiverterCore;
use crate::hw_error::map_hw_error;

/// Counters published by the sampling thread.
#[derive(Debug, Default)]
pub struct SamplerStats {
    sample_sets: AtomicU64,
    read_errors: AtomicU32,
    late_sets: AtomicU64,
    finished: AtomicBool,
}

impl SamplerStats {
    pub fn sample_sets(&self) -> u64 {
        self.sample_sets.load(Ordering::Relaxed)
    }

    pub fn read_errors(&self) -> u32 {
        self.read_errors.load(Ordering::Relaxed)
    }

    /// Sample sets that started after their pacing deadline.
    pub fn late_sets(&self) -> u64 {
        self.late_sets.load(Ordering::Relaxed)
    }

    /// The source reported end of data.
    pub fn finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }
}

pub struct Sampler<O: DigitalOutputs> {
    stats: Arc<SamplerStats>,
    /// Shutdown flag for immediate response (atomic for lock-free check)
    shutdown: Arc<AtomicBool>,
    /// Join handle for graceful thread cleanup
    join_handle: Option<std::thread::JoinHandle<DiverterCore<O>>>,
}

impl<O: DigitalOutputs + Send + 'static> Sampler<O> {
    /// Free-running sampler: rely on the source's own timing (a blocking
    /// converter read, or as fast as possible for recorded data).
    pub fn spawn<S: SampleSource + Send + 'static>(source: S, core: DiverterCore<O>) -> Self {
        Self::spawn_inner(source, core, None)
    }

    /// Paced sampler: one sample set every `period`, measured on `clock`.
    pub fn spawn_paced<S, C>(source: S, core: DiverterCore<O>, period: Duration, clock: C) -> Self
    where
        S: SampleSource + Send + 'static,
        C: Clock + Send + Sync + 'static,
    {
        Self::spawn_inner(source, core, Some((period, Box::new(clock))))
    }

    fn spawn_inner<S: SampleSource + Send + 'static>(
        mut source: S,
        mut core: DiverterCore<O>,
        pacing: Option<(Duration, Box<dyn Clock + Send + Sync>)>,
    ) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = shutdown.clone();
        let stats = Arc::new(SamplerStats::default());
        let stats_clone = stats.clone();

        let join_handle = std::thread::spawn(move || {
            let mut deadline = pacing.as_ref().map(|(_, clock)| clock.now());
            loop {
                // Immediate shutdown check (lock-free atomic)
                if shutdown_clone.load(Ordering::Relaxed) {
                    tracing::debug!("Sampler thread received shutdown signal");
                    break;
                }

                match source.read_set() {
                    Ok(Some(set)) => {
                        core.process_sample_set(set);
                        stats_clone.sample_sets.fetch_add(1, Ordering::Relaxed);
                    }
                    Ok(None) => {
                        tracing::debug!("sample source exhausted");
                        stats_clone.finished.store(true, Ordering::Release);
                        break;
                    }
                    Err(e) => {
                        let n = stats_clone.read_errors.fetch_add(1, Ordering::Relaxed) + 1;
                        if n.is_power_of_two() {
                            let err = map_hw_error(e.as_ref());
                            tracing::warn!(error = %err, count = n, "sample read failed");
                        }
                    }
                }

                if let (Some((period, clock)), Some(next)) = (&pacing, deadline.as_mut()) {
                    *next += *period;
                    let now = clock.now();
                    if now < *next {
                        clock.sleep(*next - now);
                    } else {
                        stats_clone.late_sets.fetch_add(1, Ordering::Relaxed);
                        *next = now;
                    }
                }
            }
            tracing::trace!("Sampler thread exiting cleanly");
            core
        });

        Self {
            stats,
            shutdown,
            join_handle: Some(join_handle),
        }
    }
}

impl<O: DigitalOutputs> Sampler<O> {
    pub fn stats(&self) -> &Arc<SamplerStats> {
        &self.stats
    }

    pub fn is_finished(&self) -> bool {
        self.stats.finished()
    }

    /// Stop the thread and hand back the core, `None` if the thread panicked.
    pub fn stop(mut self) -> Option<DiverterCore<O>> {
        self.shutdown.store(true, Ordering::Relaxed);
        let handle = self.join_handle.take()?;
        match handle.join() {
            Ok(core) => Some(core),
            Err(e) => {
                tracing::warn!(?e, "Sampler thread panicked");
                None
            }
        }
    }
}

impl<O: DigitalOutputs> Drop for Sampler<O> {
    fn drop(&mut self) {
        // Signal shutdown immediately (atomic store is very fast, <10ns)
        self.shutdown.store(true, Ordering::Relaxed);

        // The thread exits at its next shutdown check, after at most one
        // source read and one pacing sleep.
        if let Some(handle) = self.join_handle.take() {
            match handle.join() {
                Ok(_) => {
                    tracing::trace!("Sampler thread joined successfully");
                }
                Err(e) => {
                    // Thread panicked; log but don't propagate (we're in Drop)
                    tracing::warn!(?e, "Sampler thread panicked during shutdown");
                }
            }
        }
    }
}
