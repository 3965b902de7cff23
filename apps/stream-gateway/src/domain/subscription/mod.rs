//! Subscription Registry
//!
//! Tracks logical subscriptions independently of the physical connection.
//! A subscription survives reconnects: the registry keeps registration
//! order and hands out replay snapshots so the transport can re-send one
//! SUBSCRIBE frame per live subscription, with the original ids, after
//! every reconnect.
//!
//! # Fan-out
//!
//! `notify` delivers an event to every subscription of the matching
//! stream. Each callback is isolated: a failing subscriber is routed to
//! its own error callback (or logged) and never prevents delivery to the
//! others.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;

use super::streaming::{StreamEvent, SubscriptionType};

// =============================================================================
// Types
// =============================================================================

/// Unique identifier of a logical subscription.
pub type SubscriptionId = String;

/// Error a subscriber callback may return; delivery to other subscribers
/// is unaffected.
pub type SubscriberError = Box<dyn std::error::Error + Send + Sync>;

/// Callback invoked with each event on the subscribed stream.
pub type EventCallback = Box<dyn Fn(&StreamEvent) -> Result<(), SubscriberError> + Send + Sync>;

/// Optional callback invoked when the event callback fails.
pub type ErrorCallback = Box<dyn Fn(&SubscriberError) + Send + Sync>;

struct SubscriptionHandler {
    callback: EventCallback,
    error_callback: Option<ErrorCallback>,
}

struct SubscriptionRecord {
    id: SubscriptionId,
    stream: SubscriptionType,
    params: BTreeMap<String, String>,
    handler: Arc<SubscriptionHandler>,
}

/// Replay snapshot of one subscription: everything needed to re-send its
/// SUBSCRIBE frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionSnapshot {
    /// Original subscription id.
    pub id: SubscriptionId,
    /// Logical stream.
    pub stream: SubscriptionType,
    /// Parameters passed at registration.
    pub params: BTreeMap<String, String>,
}

// =============================================================================
// Registry
// =============================================================================

/// Registry of live subscriptions, ordered by registration.
#[derive(Default)]
pub struct SubscriptionRegistry {
    records: RwLock<Vec<SubscriptionRecord>>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscription and return its generated id.
    ///
    /// Ids are built from the stream name, the current epoch milliseconds
    /// and a random suffix, and are unique for the registry's lifetime.
    pub fn register(
        &self,
        stream: SubscriptionType,
        params: BTreeMap<String, String>,
        callback: EventCallback,
        error_callback: Option<ErrorCallback>,
    ) -> SubscriptionId {
        let mut records = self.records.write();

        let id = loop {
            let candidate = format!(
                "{}-{}-{:06x}",
                stream.as_str(),
                Utc::now().timestamp_millis(),
                rand::random::<u32>() & 0x00ff_ffff
            );
            if !records.iter().any(|record| record.id == candidate) {
                break candidate;
            }
        };

        records.push(SubscriptionRecord {
            id: id.clone(),
            stream,
            params,
            handler: Arc::new(SubscriptionHandler {
                callback,
                error_callback,
            }),
        });

        tracing::debug!(id = %id, stream = stream.as_str(), "Subscription registered");
        id
    }

    /// Remove a subscription. Returns whether it existed.
    pub fn remove(&self, id: &str) -> bool {
        let mut records = self.records.write();
        let before = records.len();
        records.retain(|record| record.id != id);
        before != records.len()
    }

    /// Whether the id is currently registered.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.records.read().iter().any(|record| record.id == id)
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Number of live subscriptions on one stream.
    #[must_use]
    pub fn count_for(&self, stream: SubscriptionType) -> usize {
        self.records
            .read()
            .iter()
            .filter(|record| record.stream == stream)
            .count()
    }

    /// Drop every subscription.
    pub fn clear(&self) {
        self.records.write().clear();
    }

    /// Replay snapshots for every live subscription, in registration order.
    #[must_use]
    pub fn replay_snapshots(&self) -> Vec<SubscriptionSnapshot> {
        self.records
            .read()
            .iter()
            .map(|record| SubscriptionSnapshot {
                id: record.id.clone(),
                stream: record.stream,
                params: record.params.clone(),
            })
            .collect()
    }

    /// Deliver an event to every subscription of the matching stream, in
    /// registration order. Returns the number of callbacks invoked.
    pub fn notify(&self, event: &StreamEvent) -> usize {
        let stream = event.subscription_type();

        // Clone handler references out of the lock so callbacks are free to
        // call back into the registry.
        let handlers: Vec<(SubscriptionId, Arc<SubscriptionHandler>)> = self
            .records
            .read()
            .iter()
            .filter(|record| record.stream == stream)
            .map(|record| (record.id.clone(), Arc::clone(&record.handler)))
            .collect();

        let delivered = handlers.len();
        for (id, handler) in handlers {
            if let Err(error) = (handler.callback)(event) {
                match &handler.error_callback {
                    Some(error_callback) => error_callback(&error),
                    None => {
                        tracing::error!(
                            subscription = %id,
                            stream = stream.as_str(),
                            error = %error,
                            "Subscriber callback failed"
                        );
                    }
                }
            }
        }
        delivered
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use rust_decimal::Decimal;

    use super::*;
    use crate::domain::streaming::PriceUpdate;

    fn price_event(symbol: &str) -> StreamEvent {
        StreamEvent::Price(PriceUpdate {
            symbol: symbol.to_string(),
            price: Decimal::from(50_000),
            change: Decimal::from(1),
            volume: Decimal::from(900),
        })
    }

    fn counting_callback(counter: Arc<AtomicUsize>) -> EventCallback {
        Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    #[test]
    fn register_assigns_unique_ids() {
        let registry = SubscriptionRegistry::new();

        let a = registry.register(
            SubscriptionType::CryptoPrices,
            BTreeMap::new(),
            Box::new(|_| Ok(())),
            None,
        );
        let b = registry.register(
            SubscriptionType::CryptoPrices,
            BTreeMap::new(),
            Box::new(|_| Ok(())),
            None,
        );

        assert_ne!(a, b);
        assert!(a.starts_with("CRYPTO_PRICES-"));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn replay_preserves_registration_order_and_ids() {
        let registry = SubscriptionRegistry::new();

        let mut params = BTreeMap::new();
        params.insert("symbol".to_string(), "BTC".to_string());

        let first = registry.register(
            SubscriptionType::CryptoPrices,
            params.clone(),
            Box::new(|_| Ok(())),
            None,
        );
        let second = registry.register(
            SubscriptionType::BlockHeaders,
            BTreeMap::new(),
            Box::new(|_| Ok(())),
            None,
        );
        let third = registry.register(
            SubscriptionType::GasPrices,
            BTreeMap::new(),
            Box::new(|_| Ok(())),
            None,
        );

        let snapshots = registry.replay_snapshots();
        assert_eq!(snapshots.len(), 3);
        assert_eq!(snapshots[0].id, first);
        assert_eq!(snapshots[0].params, params);
        assert_eq!(snapshots[1].id, second);
        assert_eq!(snapshots[2].id, third);
    }

    #[test]
    fn notify_reaches_only_matching_stream() {
        let registry = SubscriptionRegistry::new();
        let prices = Arc::new(AtomicUsize::new(0));
        let blocks = Arc::new(AtomicUsize::new(0));

        registry.register(
            SubscriptionType::CryptoPrices,
            BTreeMap::new(),
            counting_callback(Arc::clone(&prices)),
            None,
        );
        registry.register(
            SubscriptionType::BlockHeaders,
            BTreeMap::new(),
            counting_callback(Arc::clone(&blocks)),
            None,
        );

        let delivered = registry.notify(&price_event("BTC"));

        assert_eq!(delivered, 1);
        assert_eq!(prices.load(Ordering::SeqCst), 1);
        assert_eq!(blocks.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn failing_subscriber_does_not_block_others() {
        let registry = SubscriptionRegistry::new();
        let errors = Arc::new(AtomicUsize::new(0));
        let delivered_to_second = Arc::new(AtomicUsize::new(0));

        let errors_seen = Arc::clone(&errors);
        registry.register(
            SubscriptionType::CryptoPrices,
            BTreeMap::new(),
            Box::new(|_| Err("renderer exploded".into())),
            Some(Box::new(move |_| {
                errors_seen.fetch_add(1, Ordering::SeqCst);
            })),
        );
        registry.register(
            SubscriptionType::CryptoPrices,
            BTreeMap::new(),
            counting_callback(Arc::clone(&delivered_to_second)),
            None,
        );

        let delivered = registry.notify(&price_event("BTC"));

        assert_eq!(delivered, 2);
        assert_eq!(errors.load(Ordering::SeqCst), 1);
        assert_eq!(delivered_to_second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failing_subscriber_without_error_callback_is_logged_only() {
        let registry = SubscriptionRegistry::new();
        registry.register(
            SubscriptionType::CryptoPrices,
            BTreeMap::new(),
            Box::new(|_| Err("no handler".into())),
            None,
        );

        // Must not panic or propagate.
        assert_eq!(registry.notify(&price_event("BTC")), 1);
    }

    #[test]
    fn remove_unknown_id_is_noop() {
        let registry = SubscriptionRegistry::new();
        assert!(!registry.remove("CRYPTO_PRICES-0-abc"));

        let id = registry.register(
            SubscriptionType::CryptoPrices,
            BTreeMap::new(),
            Box::new(|_| Ok(())),
            None,
        );
        assert!(registry.remove(&id));
        assert!(!registry.remove(&id));
        assert!(registry.is_empty());
    }

    #[test]
    fn clear_drops_everything() {
        let registry = SubscriptionRegistry::new();
        registry.register(
            SubscriptionType::NetworkStats,
            BTreeMap::new(),
            Box::new(|_| Ok(())),
            None,
        );
        registry.register(
            SubscriptionType::GasPrices,
            BTreeMap::new(),
            Box::new(|_| Ok(())),
            None,
        );

        registry.clear();
        assert!(registry.is_empty());
        assert!(registry.replay_snapshots().is_empty());
    }

    #[test]
    fn count_for_filters_by_stream() {
        let registry = SubscriptionRegistry::new();
        registry.register(
            SubscriptionType::CryptoPrices,
            BTreeMap::new(),
            Box::new(|_| Ok(())),
            None,
        );
        registry.register(
            SubscriptionType::CryptoPrices,
            BTreeMap::new(),
            Box::new(|_| Ok(())),
            None,
        );

        assert_eq!(registry.count_for(SubscriptionType::CryptoPrices), 2);
        assert_eq!(registry.count_for(SubscriptionType::BlockHeaders), 0);
    }

    #[test]
    fn callback_may_reenter_the_registry() {
        let registry = Arc::new(SubscriptionRegistry::new());

        let reentrant = Arc::clone(&registry);
        registry.register(
            SubscriptionType::CryptoPrices,
            BTreeMap::new(),
            Box::new(move |_| {
                // Subscribing from inside a callback must not deadlock.
                reentrant.register(
                    SubscriptionType::GasPrices,
                    BTreeMap::new(),
                    Box::new(|_| Ok(())),
                    None,
                );
                Ok(())
            }),
            None,
        );

        registry.notify(&price_event("BTC"));
        assert_eq!(registry.count_for(SubscriptionType::GasPrices), 1);
    }
}
