//! Message source abstraction
//!
//! This module provides:
//! - The `MessageSource` trait, the only way the pipeline talks
//!   to a channel-messaging backend
//! - A factory building the configured source
//!
//! All transport-specific logic must live in dedicated modules.

pub mod relay;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::stream::BoxStream;
use tokio::sync::mpsc;

use crate::config::SourceConfig;
use crate::schema::{ChannelHandle, RawMessage};

/// Lazy, finite, oldest-first sequence of historical messages.
pub type MessageStream = BoxStream<'static, anyhow::Result<RawMessage>>;

/// MessageSource is the abstraction layer between:
/// - The pipeline (catalog, replayer, live subscriber)
/// - A concrete channel-messaging backend
///
/// THREAD SAFETY:
/// - Must be Send + Sync
/// - One instance is shared by every stage
///
#[async_trait::async_trait]
pub trait MessageSource: Send + Sync {
    /// Short backend name, used for logging.
    fn name(&self) -> &'static str;

    /// Resolves one configured identifier into a channel handle.
    ///
    /// Errors are per identifier; the caller decides whether to skip.
    async fn resolve(&self, identifier: &str) -> anyhow::Result<ChannelHandle>;

    /// Returns the messages of `channel` delivered on or after `since`.
    ///
    /// CONTRACT:
    /// - Oldest first
    /// - Finite; one forward scan, not restartable
    /// - A mid-scan failure is yielded as an `Err` item
    async fn replay_messages(
        &self,
        channel: &ChannelHandle,
        since: DateTime<Utc>,
    ) -> anyhow::Result<MessageStream>;

    /// Attaches one listener across `channels`.
    ///
    /// Messages arrive on the returned queue in arrival order.
    /// The queue closing means the transport disconnected.
    async fn subscribe(
        &self,
        channels: &[ChannelHandle],
    ) -> anyhow::Result<mpsc::Receiver<RawMessage>>;
}

/// Builds the configured message source.
pub fn build_source(cfg: &SourceConfig) -> anyhow::Result<Arc<dyn MessageSource>> {
    Ok(Arc::new(relay::RelaySource::new(cfg)?))
}
