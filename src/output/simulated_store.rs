//! Simulated Storage with Fault Injection
//!
//! DST-compatible wrapper that injects open, write and close failures into any
//! `StorageClient`. Decisions come from a seeded ChaCha RNG so a failing seed
//! replays the same fault sequence.

use crate::output::object_store::{IoFuture, ObjectWriter, StorageClient};
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::io::{Error as IoError, ErrorKind};
use std::sync::Arc;

/// Configuration for simulated fault injection
#[derive(Debug, Clone)]
pub struct SimulatedStoreConfig {
    /// Probability that opening a write stream fails
    pub open_fail_prob: f64,
    /// Probability that a write fails without accepting any bytes
    pub write_fail_prob: f64,
    /// Probability that a write accepts only part of the slice
    pub short_write_prob: f64,
    /// Probability that close fails; the object is discarded
    pub close_fail_prob: f64,
}

impl Default for SimulatedStoreConfig {
    fn default() -> Self {
        SimulatedStoreConfig {
            open_fail_prob: 0.02,
            write_fail_prob: 0.02,
            short_write_prob: 0.05,
            close_fail_prob: 0.02,
        }
    }
}

impl SimulatedStoreConfig {
    /// High chaos configuration for stress testing
    pub fn high_chaos() -> Self {
        SimulatedStoreConfig {
            open_fail_prob: 0.10,
            write_fail_prob: 0.10,
            short_write_prob: 0.20,
            close_fail_prob: 0.10,
        }
    }

    /// No faults - for baseline testing
    pub fn no_faults() -> Self {
        SimulatedStoreConfig {
            open_fail_prob: 0.0,
            write_fail_prob: 0.0,
            short_write_prob: 0.0,
            close_fail_prob: 0.0,
        }
    }
}

/// Statistics for fault injection
#[derive(Debug, Clone, Default)]
pub struct SimulatedStoreStats {
    pub open_attempts: u64,
    pub open_failures: u64,
    pub write_attempts: u64,
    pub write_failures: u64,
    pub short_writes: u64,
    pub close_attempts: u64,
    pub close_failures: u64,
}

struct SimulatedStoreInner {
    rng: ChaCha8Rng,
    stats: SimulatedStoreStats,
}

/// Storage client that wraps another client and injects faults
#[derive(Clone)]
pub struct SimulatedStorage<S: StorageClient> {
    inner_store: Arc<S>,
    config: SimulatedStoreConfig,
    state: Arc<Mutex<SimulatedStoreInner>>,
}

impl<S: StorageClient> SimulatedStorage<S> {
    pub fn new(inner_store: S, seed: u64, config: SimulatedStoreConfig) -> Self {
        SimulatedStorage {
            inner_store: Arc::new(inner_store),
            config,
            state: Arc::new(Mutex::new(SimulatedStoreInner {
                rng: ChaCha8Rng::seed_from_u64(seed),
                stats: SimulatedStoreStats::default(),
            })),
        }
    }

    /// Get current statistics
    pub fn stats(&self) -> SimulatedStoreStats {
        self.state.lock().stats.clone()
    }

    /// The wrapped client
    pub fn inner(&self) -> &S {
        &self.inner_store
    }
}

fn roll(state: &Mutex<SimulatedStoreInner>, prob: f64) -> bool {
    prob > 0.0 && state.lock().rng.gen_bool(prob.min(1.0))
}

impl<S: StorageClient> StorageClient for SimulatedStorage<S> {
    fn scheme(&self) -> &str {
        self.inner_store.scheme()
    }

    fn open_writer<'a>(
        &'a self,
        bucket: &'a str,
        path: &'a str,
    ) -> IoFuture<'a, Box<dyn ObjectWriter>> {
        Box::pin(async move {
            self.state.lock().stats.open_attempts += 1;
            if roll(&self.state, self.config.open_fail_prob) {
                self.state.lock().stats.open_failures += 1;
                return Err(IoError::new(ErrorKind::ConnectionRefused, "simulated open failure"));
            }

            let inner = self.inner_store.open_writer(bucket, path).await?;
            Ok(Box::new(SimulatedWriter {
                inner,
                config: self.config.clone(),
                state: Arc::clone(&self.state),
            }) as Box<dyn ObjectWriter>)
        })
    }
}

struct SimulatedWriter {
    inner: Box<dyn ObjectWriter>,
    config: SimulatedStoreConfig,
    state: Arc<Mutex<SimulatedStoreInner>>,
}

impl ObjectWriter for SimulatedWriter {
    fn set_chunk_size(&mut self, bytes: usize) {
        self.inner.set_chunk_size(bytes);
    }

    fn write<'a>(&'a mut self, data: &'a [u8]) -> IoFuture<'a, usize> {
        Box::pin(async move {
            self.state.lock().stats.write_attempts += 1;
            if roll(&self.state, self.config.write_fail_prob) {
                self.state.lock().stats.write_failures += 1;
                return Err(IoError::new(ErrorKind::TimedOut, "simulated write timeout"));
            }

            let mut slice = data;
            if data.len() > 1 && roll(&self.state, self.config.short_write_prob) {
                let cut = self.state.lock().rng.gen_range(1..data.len());
                self.state.lock().stats.short_writes += 1;
                slice = &data[..cut];
            }
            self.inner.write(slice).await
        })
    }

    fn close(self: Box<Self>) -> IoFuture<'static, ()> {
        Box::pin(async move {
            let SimulatedWriter { inner, config, state } = *self;
            state.lock().stats.close_attempts += 1;
            if roll(&state, config.close_fail_prob) {
                state.lock().stats.close_failures += 1;
                // The upload is abandoned; nothing becomes visible
                drop(inner);
                return Err(IoError::new(ErrorKind::Other, "simulated close failure"));
            }
            inner.close().await
        })
    }
}
