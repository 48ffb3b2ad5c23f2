//! Object Worker Deterministic Simulation Testing Harness
//!
//! Drives one worker with a seeded workload of puts, explicit commits and
//! clock advances over `SimulatedStorage`, then checks what reached the store:
//!
//! - **Whole payloads, in order**: every payload found in committed objects is
//!   complete, was acknowledged, and appears after every earlier one
//! - **Bounded overshoot**: with reliable writes no object exceeds the size
//!   threshold by more than one payload
//! - **Unique names**: no object is ever overwritten
//! - **Exact delivery**: with no faults every payload is committed exactly once
//!
//! Idle commits come from the tokio timer, so run the harness on a runtime
//! with paused time (`#[tokio::test(start_paused = true)]`) to keep it fast.

use crate::output::clock::SimulatedClock;
use crate::output::compression::Compression;
use crate::output::config::WorkerSettings;
use crate::output::object_name::ObjectNameTemplate;
use crate::output::object_store::{InMemoryStorage, StoredObject, DEFAULT_CHUNK_SIZE};
use crate::output::simulated_store::{SimulatedStorage, SimulatedStoreConfig, SimulatedStoreStats};
use crate::output::worker::{spawn_object_worker, WorkerResources};
use bytes::Bytes;
use flate2::read::MultiGzDecoder;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::HashSet;
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

const DST_BUCKET: &str = "dst-bucket";
const DST_TAG: &str = "dst.tag";
const DST_TEMPLATE: &str = "{{ tag }}/{{ timestamp }}-{{ uuid }}";
const DST_START_MS: i64 = 1_700_000_000_000;

/// Result of a single DST run
#[derive(Debug, Default)]
pub struct ObjectDSTResult {
    pub seed: u64,
    pub total_puts: usize,
    pub acknowledged_puts: usize,
    pub failed_puts: usize,
    pub explicit_commits: usize,
    pub objects_committed: usize,
    /// Objects that could not be decoded (torn gzip member after a failed write)
    pub unreadable_objects: usize,
    pub payloads_recovered: usize,
    pub store_stats: SimulatedStoreStats,
    pub passed: bool,
    pub error_message: Option<String>,
}

/// Configuration for the object worker DST harness
#[derive(Debug, Clone)]
pub struct ObjectDSTConfig {
    /// Number of workload steps per run
    pub num_operations: usize,
    /// Upper bound on filler bytes per payload
    pub max_payload_size: usize,
    pub size_threshold_bytes: u64,
    pub idle_timeout: Duration,
    pub compression: Compression,
    pub store_config: SimulatedStoreConfig,
}

impl Default for ObjectDSTConfig {
    fn default() -> Self {
        ObjectDSTConfig {
            num_operations: 200,
            max_payload_size: 200,
            size_threshold_bytes: 1024, // Small to force rollover
            idle_timeout: Duration::from_secs(5),
            compression: Compression::None,
            store_config: SimulatedStoreConfig::default(),
        }
    }
}

impl ObjectDSTConfig {
    /// No faults - baseline correctness test
    pub fn baseline() -> Self {
        ObjectDSTConfig {
            store_config: SimulatedStoreConfig::no_faults(),
            ..Default::default()
        }
    }

    /// No faults, gzip members
    pub fn gzip() -> Self {
        ObjectDSTConfig {
            compression: Compression::Gzip,
            ..Self::baseline()
        }
    }

    /// High fault rates on every storage operation
    pub fn chaos() -> Self {
        ObjectDSTConfig {
            store_config: SimulatedStoreConfig::high_chaos(),
            ..Default::default()
        }
    }

    fn faults_enabled(&self) -> bool {
        let c = &self.store_config;
        c.open_fail_prob > 0.0 || c.write_fail_prob > 0.0 || c.close_fail_prob > 0.0
    }

    fn torn_writes_possible(&self) -> bool {
        self.store_config.write_fail_prob > 0.0
    }
}

/// Object worker DST harness
pub struct ObjectDSTHarness {
    seed: u64,
    rng: ChaCha8Rng,
    config: ObjectDSTConfig,
}

impl ObjectDSTHarness {
    pub fn new(seed: u64, config: ObjectDSTConfig) -> Self {
        ObjectDSTHarness {
            seed,
            rng: ChaCha8Rng::seed_from_u64(seed),
            config,
        }
    }

    /// Run a single DST scenario
    pub async fn run(&mut self) -> ObjectDSTResult {
        let mut result = ObjectDSTResult {
            seed: self.seed,
            ..Default::default()
        };

        let template = match ObjectNameTemplate::compile(DST_TEMPLATE) {
            Ok(t) => t,
            Err(e) => {
                result.error_message = Some(format!("Template failed to compile: {}", e));
                return result;
            }
        };

        let memory = InMemoryStorage::new();
        let storage = SimulatedStorage::new(
            memory.clone(),
            self.rng.gen::<u64>(),
            self.config.store_config.clone(),
        );
        let clock = SimulatedClock::new(DST_START_MS);
        let resources = WorkerResources {
            settings: Arc::new(WorkerSettings {
                bucket: DST_BUCKET.to_string(),
                size_threshold_bytes: self.config.size_threshold_bytes,
                idle_timeout: self.config.idle_timeout,
                compression: self.config.compression,
                chunk_size: DEFAULT_CHUNK_SIZE,
            }),
            template: Arc::new(template),
            storage: Arc::new(storage.clone()),
            clock: Arc::new(clock.clone()),
        };
        let (handle, task) = spawn_object_worker(DST_TAG, resources);

        // Shadow state: every payload submitted and the indices acknowledged
        let mut payloads: Vec<String> = Vec::new();
        let mut acked: Vec<usize> = Vec::new();
        let idle_ms = self.config.idle_timeout.as_millis() as u64;

        // Phase 1: workload
        for _ in 0..self.config.num_operations {
            let roll = self.rng.gen_range(0..100);
            if roll < 70 {
                let index = payloads.len();
                let filler = self.rng.gen_range(0..=self.config.max_payload_size);
                let payload = make_payload(index, filler);
                result.total_puts += 1;
                match handle.put(Bytes::from(payload.clone())).await {
                    Ok(()) => acked.push(index),
                    Err(_) => result.failed_puts += 1,
                }
                payloads.push(payload);
            } else if roll < 80 {
                result.explicit_commits += 1;
                // Close failures are expected under chaos
                let _ = handle.commit().await;
            } else {
                let ms = self.rng.gen_range(0..=idle_ms.saturating_mul(2));
                clock.advance_ms(ms as i64);
                tokio::time::sleep(Duration::from_millis(ms)).await;
            }
        }

        // Phase 2: drain
        let _ = handle.shutdown().await;
        if let Err(e) = task.await {
            result.error_message = Some(format!("Worker task failed: {}", e));
            return result;
        }

        // Phase 3: verify
        result.acknowledged_puts = acked.len();
        result.store_stats = storage.stats();
        let objects = memory.objects();
        result.objects_committed = objects.len();

        let outcome = self.verify(&objects, memory.stats().overwritten, &payloads, &acked, &mut result);
        result.passed = outcome.is_ok();
        result.error_message = outcome.err();
        result
    }

    fn verify(
        &self,
        objects: &[StoredObject],
        overwritten: u64,
        payloads: &[String],
        acked: &[usize],
        result: &mut ObjectDSTResult,
    ) -> Result<(), String> {
        if overwritten > 0 {
            return Err(format!("INVARIANT VIOLATION: {} objects overwritten", overwritten));
        }
        let names: HashSet<&str> = objects.iter().map(|o| o.path.as_str()).collect();
        if names.len() != objects.len() {
            return Err("INVARIANT VIOLATION: duplicate object names".to_string());
        }

        // Bounded overshoot holds only when no write can leave torn bytes behind
        if !self.config.torn_writes_possible() {
            let max_member = payloads
                .iter()
                .filter_map(|p| self.config.compression.compress(p.as_bytes()).ok())
                .map(|c| c.len() as u64)
                .max()
                .unwrap_or(0);
            let limit = self.config.size_threshold_bytes + max_member;
            if let Some(o) = objects.iter().find(|o| o.data.len() as u64 >= limit) {
                return Err(format!(
                    "INVARIANT VIOLATION: object {} is {} bytes, limit {}",
                    o.path,
                    o.data.len(),
                    limit
                ));
            }
        }

        let acked_set: HashSet<usize> = acked.iter().copied().collect();
        let mut found: Vec<usize> = Vec::new();
        let mut malformed = 0;

        for object in objects {
            let content = match self.decode(&object.data) {
                Some(c) => c,
                None if self.config.torn_writes_possible() => {
                    result.unreadable_objects += 1;
                    continue;
                }
                None => {
                    return Err(format!("INVARIANT VIOLATION: object {} does not decode", object.path))
                }
            };

            for line in content.split_inclusive('\n') {
                match parse_payload_index(line) {
                    Some(index) if payloads.get(index).map(String::as_str) == Some(line) => {
                        found.push(index)
                    }
                    _ => malformed += 1,
                }
            }
        }
        result.payloads_recovered = found.len();

        if let Some(window) = found.windows(2).find(|w| w[0] >= w[1]) {
            return Err(format!(
                "INVARIANT VIOLATION: payload {} stored after payload {}",
                window[1], window[0]
            ));
        }
        if let Some(index) = found.iter().find(|i| !acked_set.contains(i)) {
            return Err(format!(
                "INVARIANT VIOLATION: payload {} stored but its put failed",
                index
            ));
        }

        if !self.config.faults_enabled() {
            if malformed > 0 {
                return Err(format!("INVARIANT VIOLATION: {} torn payloads without faults", malformed));
            }
            if found != acked || acked.len() != payloads.len() {
                return Err(format!(
                    "INVARIANT VIOLATION: {} payloads submitted, {} acknowledged, {} committed",
                    payloads.len(),
                    acked.len(),
                    found.len()
                ));
            }
        }

        Ok(())
    }

    fn decode(&self, data: &[u8]) -> Option<String> {
        let raw = match self.config.compression {
            Compression::None => data.to_vec(),
            Compression::Gzip => {
                let mut out = Vec::new();
                MultiGzDecoder::new(data).read_to_end(&mut out).ok()?;
                out
            }
        };
        String::from_utf8(raw).ok()
    }
}

/// `p<index>:<filler>\n`, one line per payload
fn make_payload(index: usize, filler: usize) -> String {
    let letter = (b'a' + (index % 26) as u8) as char;
    let mut payload = format!("p{:06}:", index);
    payload.extend(std::iter::repeat(letter).take(filler));
    payload.push('\n');
    payload
}

fn parse_payload_index(line: &str) -> Option<usize> {
    let rest = line.strip_prefix('p')?;
    let (digits, _) = rest.split_once(':')?;
    digits.parse().ok()
}

/// Run a batch of DST tests across multiple seeds
pub async fn run_object_dst_batch(
    seeds: std::ops::Range<u64>,
    config: ObjectDSTConfig,
) -> Vec<ObjectDSTResult> {
    let mut results = Vec::with_capacity(seeds.clone().count());
    for seed in seeds {
        let mut harness = ObjectDSTHarness::new(seed, config.clone());
        results.push(harness.run().await);
    }
    results
}

/// Summarize batch results
pub fn summarize_object_dst_batch(results: &[ObjectDSTResult]) -> String {
    let total = results.len();
    let passed = results.iter().filter(|r| r.passed).count();
    let failed = total - passed;

    let total_puts: usize = results.iter().map(|r| r.total_puts).sum();
    let total_acked: usize = results.iter().map(|r| r.acknowledged_puts).sum();
    let total_recovered: usize = results.iter().map(|r| r.payloads_recovered).sum();
    let total_objects: usize = results.iter().map(|r| r.objects_committed).sum();

    let mut summary = format!(
        "Object DST Batch: {}/{} passed ({} failed)\n\
         Puts: {}, Acknowledged: {}, Recovered: {}, Objects: {}",
        passed, total, failed, total_puts, total_acked, total_recovered, total_objects
    );

    if failed > 0 {
        summary.push_str("\n\nFailed seeds:");
        for r in results.iter().filter(|r| !r.passed) {
            summary.push_str(&format!(
                "\n  Seed {}: {}",
                r.seed,
                r.error_message.as_deref().unwrap_or("unknown error")
            ));
        }
    }

    summary
}
