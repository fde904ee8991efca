use std::sync::Arc;

use futures_util::StreamExt;

use crate::metrics::{METRICS, RuntimeMetrics};
use crate::pipeline::MessageHandler;
use crate::schema::{ChannelHandle, MessageOrigin, ReplayWindow};
use crate::source::MessageSource;

/// Per-run backfill totals.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReplaySummary {
    pub channels_completed: usize,
    pub channels_abandoned: usize,
    pub messages: usize,
}

/// Historical replayer
///
/// Scans each channel once, oldest first, from the replay window
/// start, and hands every non-blank message to the handler.
///
/// DESIGN:
/// - Channels are processed sequentially, one message at a time
/// - A fetch error abandons the remainder of that channel only
/// - No partial retry
pub struct HistoricalReplayer {
    source: Arc<dyn MessageSource>,
}

impl HistoricalReplayer {
    pub fn new(source: Arc<dyn MessageSource>) -> Self {
        Self { source }
    }

    pub async fn run(
        &self,
        channels: &[ChannelHandle],
        window: ReplayWindow,
        handler: &mut dyn MessageHandler,
    ) -> ReplaySummary {
        log::info!("Fetching messages delivered since: {}", window.since);

        let mut summary = ReplaySummary::default();
        for channel in channels {
            match self.replay_channel(channel, window, handler).await {
                Ok(count) => {
                    log::info!("Replayed {} messages from {}", count, channel.display_name);
                    summary.channels_completed += 1;
                    summary.messages += count;
                }
                Err((count, e)) => {
                    log::error!(
                        "Error fetching messages from {} after {} messages: {:#}",
                        channel.display_name,
                        count,
                        e
                    );
                    RuntimeMetrics::incr(&METRICS.replay_failures);
                    summary.channels_abandoned += 1;
                    summary.messages += count;
                }
            }
        }

        summary
    }

    /// Drains one channel. On failure returns how many messages were
    /// handled before the error.
    async fn replay_channel(
        &self,
        channel: &ChannelHandle,
        window: ReplayWindow,
        handler: &mut dyn MessageHandler,
    ) -> Result<usize, (usize, anyhow::Error)> {
        let mut stream = self
            .source
            .replay_messages(channel, window.since)
            .await
            .map_err(|e| (0, e))?;

        let mut count = 0;
        while let Some(item) = stream.next().await {
            let msg = item.map_err(|e| (count, e))?;

            if msg.text.trim().is_empty() || !window.contains(msg.timestamp) {
                continue;
            }

            RuntimeMetrics::incr(&METRICS.messages_replayed);
            handler.handle(msg, MessageOrigin::Replay).await;
            count += 1;
        }

        Ok(count)
    }
}
