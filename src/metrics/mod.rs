//! Atomic request-plane counters, drained into Prometheus exposition text by
//! `controller::metrics`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

static REQUESTS_TOTAL: AtomicU64 = AtomicU64::new(0);
static CACHE_HITS: AtomicU64 = AtomicU64::new(0);
static CACHE_MISSES: AtomicU64 = AtomicU64::new(0);
static UPSTREAM_ERRORS_TOTAL: AtomicU64 = AtomicU64::new(0);

static STATUS_CODE_COUNTERS: OnceLock<Vec<AtomicU64>> = OnceLock::new();

fn status_code_counters() -> &'static Vec<AtomicU64> {
    STATUS_CODE_COUNTERS.get_or_init(|| (0..600).map(|_| AtomicU64::new(0)).collect())
}

pub fn inc_requests_total() {
    REQUESTS_TOTAL.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_cache_hits() {
    CACHE_HITS.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_cache_misses() {
    CACHE_MISSES.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_upstream_errors() {
    UPSTREAM_ERRORS_TOTAL.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_status_code(code: u16) {
    if let Some(counter) = status_code_counters().get(code as usize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

pub fn requests_total() -> u64 {
    REQUESTS_TOTAL.load(Ordering::Relaxed)
}

pub fn cache_hits() -> u64 {
    CACHE_HITS.load(Ordering::Relaxed)
}

pub fn cache_misses() -> u64 {
    CACHE_MISSES.load(Ordering::Relaxed)
}

pub fn upstream_errors_total() -> u64 {
    UPSTREAM_ERRORS_TOTAL.load(Ordering::Relaxed)
}

pub fn status_code_snapshot() -> Vec<(u16, u64)> {
    status_code_counters()
        .iter()
        .enumerate()
        .map(|(code, counter)| (code as u16, counter.load(Ordering::Relaxed)))
        .filter(|(_, count)| *count > 0)
        .collect()
}
