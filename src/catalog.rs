use std::sync::Arc;
use std::sync::atomic::Ordering;

use crate::config::Config;
use crate::metrics::METRICS;
use crate::schema::ChannelHandle;
use crate::source::MessageSource;

/// Resolves configured channel identifiers into handles.
///
/// A failed resolution drops that identifier from the working set.
/// An empty result is not an error here; the coordinator decides
/// whether the run is viable.
pub struct ChannelCatalog {
    identifiers: Vec<String>,
    source: Arc<dyn MessageSource>,
}

impl ChannelCatalog {
    pub fn new(config: &Config, source: Arc<dyn MessageSource>) -> Self {
        Self {
            identifiers: config.channels.clone(),
            source,
        }
    }

    /// Returns the successfully resolved handles, in configured order.
    pub async fn resolve(&self) -> Vec<ChannelHandle> {
        let mut handles = Vec::with_capacity(self.identifiers.len());

        for raw in &self.identifiers {
            let identifier = raw.trim();
            if identifier.is_empty() {
                continue;
            }

            match self.source.resolve(identifier).await {
                Ok(handle) => {
                    log::info!("Added channel: {} ({})", handle.display_name, handle.channel_ref);
                    handles.push(handle);
                }
                Err(e) => {
                    log::error!("Failed to resolve channel {} via {}: {:#}", identifier, self.source.name(), e);
                }
            }
        }

        METRICS.channels_active.store(handles.len(), Ordering::Relaxed);
        handles
    }
}
