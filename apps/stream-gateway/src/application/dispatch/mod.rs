//! Message Dispatch
//!
//! Routes inbound data frames: the relevant cache key is written first,
//! then every subscription of the matching stream is notified. For one
//! frame, the cache update always happens before fan-out, so a callback
//! reading the cache sees at least its own payload.

use std::sync::Arc;

use crate::domain::streaming::StreamEvent;
use crate::domain::subscription::SubscriptionRegistry;
use crate::infrastructure::cache::{CacheStore, CacheWriteOptions};
use crate::infrastructure::socket::envelope::Envelope;

/// Shared cache of last-known stream values.
pub type StreamCache = CacheStore<StreamEvent>;

/// Classifies inbound frames, updates the cache and fans out to
/// subscribers.
pub struct MessageDispatcher {
    cache: Arc<StreamCache>,
    registry: Arc<SubscriptionRegistry>,
}

impl MessageDispatcher {
    /// Create a dispatcher over a cache and a registry.
    #[must_use]
    pub const fn new(cache: Arc<StreamCache>, registry: Arc<SubscriptionRegistry>) -> Self {
        Self { cache, registry }
    }

    /// Dispatch one inbound envelope.
    ///
    /// Returns the number of subscriber callbacks invoked for a data
    /// frame, or `None` for control frames (which carry no stream data).
    pub fn dispatch(&self, envelope: Envelope) -> Option<usize> {
        let event = envelope.payload.into_event()?;

        for (key, tag) in Self::cache_entries(&event) {
            self.cache
                .set(key, event.clone(), &CacheWriteOptions::new().with_tag(tag));
        }

        let delivered = self.registry.notify(&event);
        tracing::trace!(
            stream = event.subscription_type().as_str(),
            delivered,
            "Dispatched stream event"
        );
        Some(delivered)
    }

    /// Cache keys (and their tag) a stream event is stored under.
    fn cache_entries(event: &StreamEvent) -> Vec<(String, &'static str)> {
        match event {
            StreamEvent::Price(price) => {
                vec![(format!("price:{}", price.symbol), "prices")]
            }
            StreamEvent::Block(block) => vec![
                (format!("block:{}", block.number), "blocks"),
                ("block:latest".to_string(), "blocks"),
            ],
            StreamEvent::Transaction(tx) => vec![(format!("tx:{}", tx.hash), "transactions")],
            StreamEvent::Gas(_) => vec![("gas:latest".to_string(), "gas")],
            StreamEvent::Network(_) => vec![("network:status".to_string(), "network")],
            StreamEvent::Wallet(wallet) => {
                vec![(format!("wallet:{}", wallet.address), "wallet")]
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
