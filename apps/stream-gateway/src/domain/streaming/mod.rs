//! Streaming Domain Types
//!
//! Core data types for the panel's logical streams: prices, blocks,
//! transactions, gas, network status and wallet activity. These carry no
//! transport concerns; the wire envelope lives in the socket
//! infrastructure.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// =============================================================================
// Stream Kinds
// =============================================================================

/// Logical stream kinds a consumer can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionType {
    /// Spot prices for configured symbols.
    CryptoPrices,
    /// New block headers as they are mined.
    BlockHeaders,
    /// Pending (mempool) transactions.
    PendingTransactions,
    /// Gas price tiers.
    GasPrices,
    /// Transactions touching a watched wallet.
    WalletTransactions,
    /// Network-wide statistics.
    NetworkStats,
}

impl SubscriptionType {
    /// Stable name used in subscription ids and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CryptoPrices => "CRYPTO_PRICES",
            Self::BlockHeaders => "BLOCK_HEADERS",
            Self::PendingTransactions => "PENDING_TRANSACTIONS",
            Self::GasPrices => "GAS_PRICES",
            Self::WalletTransactions => "WALLET_TRANSACTIONS",
            Self::NetworkStats => "NETWORK_STATS",
        }
    }

    /// All logical stream kinds.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::CryptoPrices,
            Self::BlockHeaders,
            Self::PendingTransactions,
            Self::GasPrices,
            Self::WalletTransactions,
            Self::NetworkStats,
        ]
    }
}

// =============================================================================
// Stream Data
// =============================================================================

/// Crypto price tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceUpdate {
    /// Asset symbol, e.g. "BTC".
    pub symbol: String,
    /// Spot price in the panel's quote currency.
    pub price: Decimal,
    /// 24h change in percent.
    pub change: Decimal,
    /// 24h traded volume.
    pub volume: Decimal,
}

/// New block header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockUpdate {
    /// Block height.
    pub number: u64,
    /// Block hash.
    pub hash: String,
    /// Parent block hash.
    pub parent_hash: String,
    /// Number of transactions in the block.
    pub transaction_count: u32,
    /// Total gas used.
    pub gas_used: u64,
    /// Block timestamp (epoch seconds).
    pub timestamp: i64,
}

/// Pending transaction observed in the mempool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionUpdate {
    /// Transaction hash.
    pub hash: String,
    /// Sender address.
    pub from: String,
    /// Recipient address; absent for contract creation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    /// Transferred value in native units.
    pub value: Decimal,
    /// Offered gas price in gwei.
    pub gas_price_gwei: Decimal,
}

/// Gas price tiers in gwei.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GasUpdate {
    /// Economy tier.
    pub slow_gwei: Decimal,
    /// Standard tier.
    pub standard_gwei: Decimal,
    /// Priority tier.
    pub fast_gwei: Decimal,
    /// Current base fee.
    pub base_fee_gwei: Decimal,
}

/// Network-wide status snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkStatus {
    /// Chain id of the network.
    pub chain_id: u64,
    /// Connected peer count reported by the provider.
    pub peer_count: u32,
    /// Whether the provider node is still syncing.
    pub syncing: bool,
    /// Latest block height.
    pub latest_block: u64,
}

/// Watched-wallet balance change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletUpdate {
    /// Wallet address.
    pub address: String,
    /// Balance in native units.
    pub balance: Decimal,
    /// Account nonce.
    pub nonce: u64,
}

// =============================================================================
// Stream Event
// =============================================================================

/// One data event on a logical stream, as delivered to subscribers and
/// retained in the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Crypto price tick.
    Price(PriceUpdate),
    /// New block header.
    Block(BlockUpdate),
    /// Pending transaction.
    Transaction(TransactionUpdate),
    /// Gas price tiers.
    Gas(GasUpdate),
    /// Network status snapshot.
    Network(NetworkStatus),
    /// Wallet balance change.
    Wallet(WalletUpdate),
}

impl StreamEvent {
    /// The logical stream this event belongs to.
    #[must_use]
    pub const fn subscription_type(&self) -> SubscriptionType {
        match self {
            Self::Price(_) => SubscriptionType::CryptoPrices,
            Self::Block(_) => SubscriptionType::BlockHeaders,
            Self::Transaction(_) => SubscriptionType::PendingTransactions,
            Self::Gas(_) => SubscriptionType::GasPrices,
            Self::Network(_) => SubscriptionType::NetworkStats,
            Self::Wallet(_) => SubscriptionType::WalletTransactions,
        }
    }

    /// The price tick, if this is a price event.
    #[must_use]
    pub const fn as_price(&self) -> Option<&PriceUpdate> {
        match self {
            Self::Price(price) => Some(price),
            _ => None,
        }
    }

    /// The block header, if this is a block event.
    #[must_use]
    pub const fn as_block(&self) -> Option<&BlockUpdate> {
        match self {
            Self::Block(block) => Some(block),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_know_their_stream() {
        let event = StreamEvent::Gas(GasUpdate {
            slow_gwei: Decimal::from(10),
            standard_gwei: Decimal::from(15),
            fast_gwei: Decimal::from(25),
            base_fee_gwei: Decimal::from(9),
        });
        assert_eq!(event.subscription_type(), SubscriptionType::GasPrices);
        assert!(event.as_price().is_none());
    }

    #[test]
    fn price_update_uses_camel_case_wire_names() {
        let tx = TransactionUpdate {
            hash: "0x1".to_string(),
            from: "0xa".to_string(),
            to: None,
            value: Decimal::from(1),
            gas_price_gwei: Decimal::from(20),
        };
        let json = serde_json::to_string(&tx).unwrap();
        assert!(json.contains("gasPriceGwei"));
        assert!(!json.contains("\"to\""));
    }

    #[test]
    fn subscription_type_all_covers_every_stream() {
        assert_eq!(SubscriptionType::all().len(), 6);
    }
}
