//! # Prometheus Metrics
//!
//! Operational metrics for the node, scraped at `/metrics` on the metrics
//! port.
//!
//! The router and the producer keep their own atomic counters. Rather than
//! threading metric handles through the library, [`NodeMetrics::observe`]
//! copies those counters into Prometheus on each scrape and after each
//! block.
//!
//! All metrics are registered in a dedicated [`prometheus::Registry`] so they
//! do not collide with any default global registry consumers.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Registry, TextEncoder};
use std::sync::Arc;
use std::time::Duration;

use strata_protocol::producer::{BlockProducer, ProducerStats};
use strata_protocol::router::{RouterStats, StateRouter};

/// Holds all Prometheus metric handles for the node.
#[derive(Clone)]
pub struct NodeMetrics {
    registry: Registry,

    pub cache_hits_total: IntCounter,
    pub cache_misses_total: IntCounter,
    pub cache_entries: IntGauge,
    pub shard_fetches_total: IntCounter,
    pub coalesced_reads_total: IntCounter,
    pub shard_retries_total: IntCounter,
    pub commits_total: IntCounter,
    pub failed_commits_total: IntCounter,

    pub transactions_submitted_total: IntCounter,
    pub transactions_rejected_total: IntCounter,
    pub transactions_evaluated_total: IntCounter,
    pub transactions_faulted_total: IntCounter,
    pub transactions_pending: IntGauge,
    pub blocks_committed_total: IntCounter,
    pub block_height: IntGauge,

    /// Time spent evaluating the transactions of a produced block.
    pub block_evaluation_seconds: Histogram,
}

fn counter(registry: &Registry, name: &str, help: &str) -> prometheus::Result<IntCounter> {
    let c = IntCounter::new(name, help)?;
    registry.register(Box::new(c.clone()))?;
    Ok(c)
}

fn gauge(registry: &Registry, name: &str, help: &str) -> prometheus::Result<IntGauge> {
    let g = IntGauge::new(name, help)?;
    registry.register(Box::new(g.clone()))?;
    Ok(g)
}

/// Bring a Prometheus counter up to an externally kept total.
fn sync(counter: &IntCounter, total: u64) {
    let current = counter.get();
    if total > current {
        counter.inc_by(total - current);
    }
}

impl NodeMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new_custom(Some("strata".into()), None)?;
        let r = &registry;

        let block_evaluation_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "block_evaluation_seconds",
                "Wall time spent evaluating a produced block's transactions",
            )
            .buckets(vec![
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
            ]),
        )?;
        registry.register(Box::new(block_evaluation_seconds.clone()))?;

        Ok(Self {
            cache_hits_total: counter(r, "cache_hits_total", "State reads answered by the cache")?,
            cache_misses_total: counter(r, "cache_misses_total", "State reads that missed the cache")?,
            cache_entries: gauge(r, "cache_entries", "Entries currently held by the state cache")?,
            shard_fetches_total: counter(r, "shard_fetches_total", "Reads sent to a shard")?,
            coalesced_reads_total: counter(
                r,
                "coalesced_reads_total",
                "Reads that joined an in-flight fetch of the same address",
            )?,
            shard_retries_total: counter(r, "shard_retries_total", "Shard calls retried after a transient failure")?,
            commits_total: counter(r, "commits_total", "Block commits applied to every shard")?,
            failed_commits_total: counter(r, "failed_commits_total", "Block commits aborted or left incomplete")?,
            transactions_submitted_total: counter(
                r,
                "transactions_submitted_total",
                "Transactions accepted into the pending pool",
            )?,
            transactions_rejected_total: counter(
                r,
                "transactions_rejected_total",
                "Submitted transactions refused at admission",
            )?,
            transactions_evaluated_total: counter(
                r,
                "transactions_evaluated_total",
                "Transaction evaluations run while building blocks",
            )?,
            transactions_faulted_total: counter(
                r,
                "transactions_faulted_total",
                "Transactions dropped because an action faulted",
            )?,
            transactions_pending: gauge(r, "transactions_pending", "Transactions waiting in the pending pool")?,
            blocks_committed_total: counter(r, "blocks_committed_total", "Blocks appended to the chain")?,
            block_height: gauge(r, "block_height", "Index of the chain tip")?,
            block_evaluation_seconds,
            registry,
        })
    }

    pub fn observe_router(&self, stats: &RouterStats) {
        sync(&self.cache_hits_total, stats.cache_hits);
        sync(&self.cache_misses_total, stats.cache_misses);
        self.cache_entries.set(stats.cache_len as i64);
        sync(&self.shard_fetches_total, stats.fetches);
        sync(&self.coalesced_reads_total, stats.coalesced);
        sync(&self.shard_retries_total, stats.retries);
        sync(&self.commits_total, stats.commits);
        sync(&self.failed_commits_total, stats.failed_commits);
    }

    pub fn observe_producer(&self, stats: &ProducerStats) {
        sync(&self.transactions_submitted_total, stats.submitted);
        sync(&self.transactions_rejected_total, stats.rejected);
        sync(&self.transactions_evaluated_total, stats.evaluated);
        sync(&self.transactions_faulted_total, stats.faulted);
        sync(&self.blocks_committed_total, stats.blocks);
        self.transactions_pending.set(stats.pending as i64);
    }

    /// Refresh everything that mirrors library counters.
    pub fn observe(&self, router: &StateRouter, producer: &BlockProducer) {
        self.observe_router(&router.stats());
        self.observe_producer(&producer.stats());
        if let Some(tip) = producer.chain().read().blocks().last() {
            self.block_height.set(tip.index as i64);
        }
    }

    pub fn observe_evaluation(&self, elapsed: Duration) {
        self.block_evaluation_seconds.observe(elapsed.as_secs_f64());
    }

    /// Encodes all registered metrics into the Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// What the `/metrics` handler needs.
#[derive(Clone)]
pub struct MetricsState {
    pub metrics: Arc<NodeMetrics>,
    pub router: StateRouter,
    pub producer: Arc<BlockProducer>,
}

/// Axum handler that renders `/metrics` in Prometheus text format.
pub async fn metrics_handler(State(state): State<MetricsState>) -> impl IntoResponse {
    state.metrics.observe(&state.router, &state.producer);
    match state.metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}
