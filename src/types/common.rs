use serde::{Deserialize, Serialize};
use std::fmt;

/// Milliseconds since the unix epoch
pub type Timestamp = u64;
pub type PoolId = String;
pub type AccountId = String;

pub fn now() -> Timestamp {
    chrono::Utc::now().timestamp_millis() as u64
}

pub const ETH_SYMBOL: &str = "ETH";

// ============================================================================
// Token Information
// ============================================================================

/// Token metadata
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TokenInfo {
    pub symbol: String,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

impl TokenInfo {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            address: None,
            name: None,
        }
    }

    pub fn eth() -> Self {
        Self::new(ETH_SYMBOL).with_name("Ether")
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn is_eth(&self) -> bool {
        self.symbol == ETH_SYMBOL
    }
}

impl fmt::Display for TokenInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol)
    }
}

// ============================================================================
// Token Pair
// ============================================================================

/// Trading pair of a base token against ETH (eg DAI/ETH)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TokenPair {
    pub base: TokenInfo,  // The token being bought/sold
    pub quote: TokenInfo, // Always ETH
}

impl TokenPair {
    pub fn with_eth(base: TokenInfo) -> Self {
        Self {
            base,
            quote: TokenInfo::eth(),
        }
    }

    /// Get pair symbol (eg "DAI/ETH"), also used as the pool id
    pub fn symbol(&self) -> String {
        format!("{}/{}", self.base.symbol, self.quote.symbol)
    }

    pub fn pool_id(&self) -> PoolId {
        self.symbol()
    }
}

impl fmt::Display for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}
