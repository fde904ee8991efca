//! Sink layer
//!
//! This module provides:
//! - The `Sink` trait (one connected tabular destination)
//! - The `SinkStore` trait (connects a configured sink)
//! - `SinkFanout`, which writes one record to every active sink
//!
//! Sink-specific logic lives in the dedicated submodules.

pub mod csv_file;
pub mod redis_list;
pub mod webhook;

use std::sync::Arc;
use std::sync::atomic::Ordering;

use crate::config::SinkConfig;
use crate::metrics::{METRICS, RuntimeMetrics};
use crate::schema::{FieldSchema, JobRecord};

/// A connected destination capable of appending one row.
///
/// THREAD SAFETY:
/// - Must be Send + Sync
/// - Rows are written sequentially by the fanout
#[async_trait::async_trait]
pub trait Sink: Send + Sync {
    /// Identifier from configuration, used for logging.
    fn id(&self) -> &str;

    /// Appends one row; values are in schema order.
    async fn append_row(&self, row: &[String]) -> anyhow::Result<()>;
}

/// Connects configured sinks.
#[async_trait::async_trait]
pub trait SinkStore: Send + Sync {
    async fn connect(&self, cfg: &SinkConfig, schema: &FieldSchema) -> anyhow::Result<Box<dyn Sink>>;
}

/// Connects the built-in sink kinds.
///
/// DESIGN:
/// - Keeps sink creation in one place
/// - Adding a kind means a `SinkConfig` variant plus one arm here
pub struct DefaultSinkStore;

#[async_trait::async_trait]
impl SinkStore for DefaultSinkStore {
    async fn connect(&self, cfg: &SinkConfig, schema: &FieldSchema) -> anyhow::Result<Box<dyn Sink>> {
        let sink: Box<dyn Sink> = match cfg {
            SinkConfig::Csv { id, path } => {
                Box::new(csv_file::CsvSink::open(id, path, schema).await?)
            }
            SinkConfig::Redis { id, url, key } => {
                Box::new(redis_list::RedisListSink::connect(id, url, key).await?)
            }
            SinkConfig::Webhook { id, url, token } => {
                Box::new(webhook::WebhookSink::new(id, url, token.clone())?)
            }
        };
        Ok(sink)
    }
}

/// Connects every configured sink, dropping the ones that fail.
///
/// Failed sinks are never retried.
pub async fn connect_all(
    store: &dyn SinkStore,
    configs: &[SinkConfig],
    schema: &FieldSchema,
) -> Vec<Box<dyn Sink>> {
    let mut sinks = Vec::with_capacity(configs.len());

    for cfg in configs {
        match store.connect(cfg, schema).await {
            Ok(sink) => {
                log::info!("Connected sink: {}", cfg.id());
                sinks.push(sink);
            }
            Err(e) => {
                log::error!("Skipping sink {} due to errors: {:#}", cfg.id(), e);
            }
        }
    }

    METRICS.sinks_active.store(sinks.len(), Ordering::Relaxed);
    sinks
}

/// Result of writing one record to all sinks.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FanoutReport {
    pub written: Vec<String>,
    pub failed: Vec<String>,
}

// ------------------------------------------------------------
// Sink fanout
// ------------------------------------------------------------
//
// The active set is fixed at construction. A write failure is
// logged and skipped for that record only; the sink stays active
// for the next record.
//
pub struct SinkFanout {
    sinks: Vec<Box<dyn Sink>>,
    schema: FieldSchema,
    metrics: Arc<RuntimeMetrics>,
}

impl SinkFanout {
    pub fn new(sinks: Vec<Box<dyn Sink>>, schema: FieldSchema) -> Self {
        Self::with_metrics(sinks, schema, METRICS.clone())
    }

    pub fn with_metrics(
        sinks: Vec<Box<dyn Sink>>,
        schema: FieldSchema,
        metrics: Arc<RuntimeMetrics>,
    ) -> Self {
        Self {
            sinks,
            schema,
            metrics,
        }
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub async fn append(&self, record: &JobRecord) -> FanoutReport {
        let row = record.row(&self.schema);
        let mut report = FanoutReport::default();

        for sink in &self.sinks {
            match sink.append_row(&row).await {
                Ok(()) => {
                    log::info!("Appended data to sink: {}", sink.id());
                    RuntimeMetrics::incr(&self.metrics.records_written);
                    report.written.push(sink.id().to_string());
                }
                Err(e) => {
                    log::error!("Failed to append data to sink {}: {:#}", sink.id(), e);
                    RuntimeMetrics::incr(&self.metrics.sink_write_failures);
                    report.failed.push(sink.id().to_string());
                }
            }
        }

        report
    }
}

#[cfg(test)]
pub mod testing {
    //! Recording sinks and a scripted store for fanout/pipeline tests.

    use std::sync::{Arc, Mutex};

    use anyhow::anyhow;

    use super::{Sink, SinkStore};
    use crate::config::SinkConfig;
    use crate::schema::FieldSchema;

    pub type Rows = Arc<Mutex<Vec<Vec<String>>>>;

    pub struct MemorySink {
        pub id: String,
        pub rows: Rows,
        pub fail: bool,
    }

    impl MemorySink {
        pub fn new(id: &str, fail: bool) -> (Self, Rows) {
            let rows = Rows::default();
            let sink = Self {
                id: id.to_string(),
                rows: rows.clone(),
                fail,
            };
            (sink, rows)
        }
    }

    #[async_trait::async_trait]
    impl Sink for MemorySink {
        fn id(&self) -> &str {
            &self.id
        }

        async fn append_row(&self, row: &[String]) -> anyhow::Result<()> {
            if self.fail {
                return Err(anyhow!("quota exceeded"));
            }
            self.rows.lock().unwrap().push(row.to_vec());
            Ok(())
        }
    }

    /// Connects only sinks whose id is listed; all write to `rows`.
    #[derive(Default)]
    pub struct ScriptedStore {
        pub reachable: Vec<String>,
        pub rows: Rows,
    }

    #[async_trait::async_trait]
    impl SinkStore for ScriptedStore {
        async fn connect(&self, cfg: &SinkConfig, _schema: &FieldSchema) -> anyhow::Result<Box<dyn Sink>> {
            if !self.reachable.iter().any(|id| id == cfg.id()) {
                return Err(anyhow!("credentials rejected"));
            }
            Ok(Box::new(MemorySink {
                id: cfg.id().to_string(),
                rows: self.rows.clone(),
                fail: false,
            }))
        }
    }
}
