use std::future::Future;
use std::sync::Arc;

use crate::metrics::{METRICS, RuntimeMetrics};
use crate::pipeline::MessageHandler;
use crate::schema::{ChannelHandle, MessageOrigin};
use crate::source::MessageSource;

/// Why the live phase ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveOutcome {
    /// Operator interrupt
    Interrupted,

    /// Transport closed or could not be attached
    Disconnected,
}

/// Live subscriber
///
/// Attaches one listener across all resolved channels and feeds
/// each arriving message through the handler, in arrival order,
/// until shutdown or disconnect.
///
/// NOT RESPONSIBLE FOR:
/// - Reconnecting (a disconnect stops the pipeline)
/// - Deduplication against backfill (handler concern)
pub struct LiveSubscriber {
    source: Arc<dyn MessageSource>,
}

impl LiveSubscriber {
    pub fn new(source: Arc<dyn MessageSource>) -> Self {
        Self { source }
    }

    pub async fn run<S>(
        &self,
        channels: &[ChannelHandle],
        handler: &mut dyn MessageHandler,
        shutdown: S,
    ) -> LiveOutcome
    where
        S: Future<Output = ()>,
    {
        let mut rx = match self.source.subscribe(channels).await {
            Ok(rx) => rx,
            Err(e) => {
                log::error!("Live subscription via {} failed: {:#}", self.source.name(), e);
                return LiveOutcome::Disconnected;
            }
        };

        log::info!("Listening for new messages on {} channels...", channels.len());

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    log::info!("Program terminated by user.");
                    return LiveOutcome::Interrupted;
                }

                next = rx.recv() => {
                    let Some(msg) = next else {
                        log::error!("Live transport disconnected");
                        return LiveOutcome::Disconnected;
                    };

                    if msg.text.trim().is_empty() {
                        continue;
                    }

                    log::info!("New message received from {}", msg.channel_ref);
                    RuntimeMetrics::incr(&METRICS.messages_live);
                    handler.handle(msg, MessageOrigin::Live).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testing::Collect;
    use crate::schema::RawMessage;
    use crate::source::testing::ScriptedSource;
    use chrono::Utc;
    use tokio::sync::{mpsc, oneshot};

    fn raw(channel: &str, text: &str) -> RawMessage {
        RawMessage {
            channel_ref: channel.into(),
            timestamp: Utc::now(),
            text: text.into(),
        }
    }

    fn channels() -> Vec<ChannelHandle> {
        vec![
            ChannelHandle { channel_ref: "a".into(), display_name: "A".into() },
            ChannelHandle { channel_ref: "b".into(), display_name: "B".into() },
        ]
    }

    #[tokio::test]
    async fn delivers_in_arrival_order_until_disconnect() {
        let (tx, rx) = mpsc::channel(8);
        tx.send(raw("b", "first")).await.unwrap();
        tx.send(raw("a", "")).await.unwrap();
        tx.send(raw("a", "second")).await.unwrap();
        drop(tx);

        let source = Arc::new(ScriptedSource::default().with_live(rx));
        let mut out = Collect::default();

        let outcome = LiveSubscriber::new(source.clone())
            .run(&channels(), &mut out, std::future::pending())
            .await;

        assert_eq!(outcome, LiveOutcome::Disconnected);
        assert_eq!(out.texts(), ["first", "second"]);
        assert!(out.origins.iter().all(|o| *o == MessageOrigin::Live));
        assert_eq!(*source.subscribed.lock().unwrap(), ["a", "b"]);
    }

    #[tokio::test]
    async fn shutdown_signal_interrupts() {
        let (_tx, rx) = mpsc::channel::<RawMessage>(8);
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        stop_tx.send(()).unwrap();

        let source = Arc::new(ScriptedSource::default().with_live(rx));
        let mut out = Collect::default();

        let outcome = LiveSubscriber::new(source)
            .run(&channels(), &mut out, async {
                let _ = stop_rx.await;
            })
            .await;

        assert_eq!(outcome, LiveOutcome::Interrupted);
        assert!(out.texts().is_empty());
    }

    #[tokio::test]
    async fn failed_attach_counts_as_disconnect() {
        let source = Arc::new(ScriptedSource::default());
        let mut out = Collect::default();

        let outcome = LiveSubscriber::new(source)
            .run(&channels(), &mut out, std::future::pending())
            .await;

        assert_eq!(outcome, LiveOutcome::Disconnected);
    }
}
