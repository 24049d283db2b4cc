use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

use crate::types::{EngineError, Result, TokenInfo, TokenPair};

const ENV_PREFIX: &str = "ANCHOR_AMM";
const DEFAULT_CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Pricing constants
    pub engine: EngineConfig,

    /// Settlement settings
    pub execution: ExecutionConfig,

    /// Pools seeded at startup
    pub pools: Vec<PoolConfig>,

    /// Logging settings
    pub logging: LoggingConfig,
}

/// Pricing constants shared by every pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Time for an anchor's distance from spot to halve
    pub relaxation_half_life_secs: Decimal,

    /// Maximum price impact as a fraction
    pub impact_cap: Decimal,

    /// Multiplier on `amount / reserve`
    pub impact_sensitivity: Decimal,

    /// Anchor displacement per unit of realised impact
    pub anchor_nudge_factor: Decimal,

    /// Fee taken from the input amount
    pub fee_rate: Decimal,

    /// Allowed relative deviation of a deposit from the pool ratio
    pub deposit_ratio_tolerance: Decimal,

    /// Reserve a trade may never drain below, in whole token units
    pub min_reserve: Decimal,
    /// Reprice spot to the reserve ratio after every trade instead of
    /// leaving it to the external feed
    pub spot_follows_reserves: bool,

    /// How long a quote stays valid
    pub quote_ttl_ms: u64,

    /// Capacity of the trade event broadcast channel
    pub event_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            relaxation_half_life_secs: dec!(60),
            impact_cap: dec!(0.05),
            impact_sensitivity: Decimal::ONE,
            anchor_nudge_factor: Decimal::ONE,
            fee_rate: dec!(0.003),
            deposit_ratio_tolerance: dec!(0.01),
            min_reserve: Decimal::ONE,
            spot_follows_reserves: false,
            quote_ttl_ms: 15_000,
            event_buffer: 1024,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.relaxation_half_life_secs <= Decimal::ZERO {
            return Err(EngineError::Config("relaxation_half_life_secs must be positive".into()));
        }
        if self.impact_cap <= Decimal::ZERO || self.impact_cap >= Decimal::ONE {
            return Err(EngineError::Config("impact_cap must be in (0, 1)".into()));
        }
        if self.impact_sensitivity.is_sign_negative() {
            return Err(EngineError::Config("impact_sensitivity must not be negative".into()));
        }
        if self.anchor_nudge_factor.is_sign_negative() || self.anchor_nudge_factor * self.impact_cap >= Decimal::ONE {
            return Err(EngineError::Config(
                "anchor_nudge_factor must be non-negative and keep nudges below 100%".into(),
            ));
        }
        if self.fee_rate.is_sign_negative() || self.fee_rate >= Decimal::ONE {
            return Err(EngineError::Config("fee_rate must be in [0, 1)".into()));
        }
        if self.deposit_ratio_tolerance.is_sign_negative() {
            return Err(EngineError::Config("deposit_ratio_tolerance must not be negative".into()));
        }
        if self.min_reserve.is_sign_negative() {
            return Err(EngineError::Config("min_reserve must not be negative".into()));
        }
        if self.event_buffer == 0 {
            return Err(EngineError::Config("event_buffer must be at least 1".into()));
        }
        Ok(())
    }
}

/// When the pool applies a trade relative to settlement confirmation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementMode {
    /// Apply only once the chain confirms
    ApplyAfterConfirmation,
    /// Apply immediately and roll back if the chain rejects
    Optimistic,
}

/// Execution configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Dry run mode (settle against the in-process simulator)
    pub dry_run: bool,

    pub mode: SettlementMode,

    /// Per-attempt settlement timeout
    pub settlement_timeout_ms: u64,

    pub max_retries: u32,

    pub retry_delay_ms: u64,

    /// Account label used by the dry-run signer
    pub signer: String,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            dry_run: true,
            mode: SettlementMode::ApplyAfterConfirmation,
            settlement_timeout_ms: 30_000,
            max_retries: 3,
            retry_delay_ms: 500,
            signer: "dry-run".into(),
        }
    }
}

impl ExecutionConfig {
    pub fn settlement_timeout(&self) -> Duration {
        Duration::from_millis(self.settlement_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Pool seeded at startup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolConfig {
    pub token: TokenInfo,
    pub eth_reserve: Decimal,
    pub token_reserve: Decimal,

    /// Defaults to the reserve ratio
    #[serde(default)]
    pub spot_price: Option<Decimal>,
    #[serde(default)]
    pub buy_anchor: Option<Decimal>,
    #[serde(default)]
    pub sell_anchor: Option<Decimal>,

    /// Overrides the global half-life for this pool
    #[serde(default)]
    pub relaxation_half_life_secs: Option<Decimal>,

    /// Account credited with the initial LP supply
    pub provider: String,
}

impl PoolConfig {
    pub fn pair(&self) -> TokenPair {
        TokenPair::with_eth(self.token.clone())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub with_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            with_target: false,
        }
    }
}

impl Config {
    pub fn engine_config(&self) -> &EngineConfig {
        &self.engine
    }

    pub fn execution_config(&self) -> &ExecutionConfig {
        &self.execution
    }

    pub fn logging_config(&self) -> &LoggingConfig {
        &self.logging
    }

    /// Load defaults, then `config.toml` if present, then `ANCHOR_AMM__*` env vars
    pub fn load() -> Result<Self> {
        Self::load_from(DEFAULT_CONFIG_FILE)
    }

    pub fn load_from(path: &str) -> Result<Self> {
        dotenv::dotenv().ok();

        let defaults = config::Config::try_from(&Config::default()).map_err(config_error)?;
        let settings = config::Config::builder()
            .add_source(defaults)
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()
            .map_err(config_error)?;

        settings.try_deserialize().map_err(config_error)
    }

    /// Parse a TOML document on top of the defaults
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| EngineError::Config(e.to_string()))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.engine.validate()?;

        if self.execution.settlement_timeout_ms == 0 {
            return Err(EngineError::Config("settlement_timeout_ms must be positive".into()));
        }
        if self.execution.max_retries == 0 {
            return Err(EngineError::Config("max_retries must be at least 1".into()));
        }

        let mut seen = HashSet::new();
        for pool in &self.pools {
            let pool_id = pool.pair().pool_id();
            if !seen.insert(pool_id.clone()) {
                return Err(EngineError::Config(format!("pool {} configured twice", pool_id)));
            }
            if pool.token.is_eth() {
                return Err(EngineError::Config("base token cannot be ETH".into()));
            }
            if pool.eth_reserve.is_sign_negative() || pool.token_reserve.is_sign_negative() {
                return Err(EngineError::Config(format!("pool {} has negative reserves", pool_id)));
            }
            if matches!(pool.relaxation_half_life_secs, Some(h) if h <= Decimal::ZERO) {
                return Err(EngineError::Config(format!("pool {} half-life must be positive", pool_id)));
            }
        }

        Ok(())
    }
}

fn config_error(err: config::ConfigError) -> EngineError {
    EngineError::Config(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [engine]
        relaxation_half_life_secs = "30"
        impact_cap = "0.04"
        fee_rate = "0"

        [execution]
        mode = "optimistic"
        settlement_timeout_ms = 5000

        [[pools]]
        provider = "treasury"
        eth_reserve = "1000"
        token_reserve = "3200000"
        buy_anchor = "3250"
        sell_anchor = "3150"

        [pools.token]
        symbol = "DAI"
    "#;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.engine.validate().is_ok());
        assert_eq!(config.engine.impact_cap, dec!(0.05));
        assert_eq!(config.engine.relaxation_half_life_secs, dec!(60));
        assert_eq!(config.execution.mode, SettlementMode::ApplyAfterConfirmation);
    }

    #[test]
    fn test_parse_toml_overrides_defaults() {
        let config = Config::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.engine.relaxation_half_life_secs, dec!(30));
        assert_eq!(config.engine.impact_cap, dec!(0.04));
        assert_eq!(config.engine.deposit_ratio_tolerance, dec!(0.01));
        assert_eq!(config.execution.mode, SettlementMode::Optimistic);
        assert_eq!(config.execution.max_retries, 3);

        assert_eq!(config.pools.len(), 1);
        let pool = &config.pools[0];
        assert_eq!(pool.pair().pool_id(), "DAI/ETH");
        assert_eq!(pool.buy_anchor, Some(dec!(3250)));
        assert_eq!(pool.spot_price, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.engine.impact_cap = dec!(1.5);
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.engine.relaxation_half_life_secs = Decimal::ZERO;
        assert!(config.validate().is_err());

        let mut config = Config::from_toml_str(SAMPLE).unwrap();
        config.pools.push(config.pools[0].clone());
        assert!(matches!(config.validate(), Err(EngineError::Config(_))));
    }

    #[test]
    fn test_load_missing_file_falls_back_to_defaults() {
        let config = Config::load_from("does-not-exist.toml").unwrap();
        assert_eq!(config.engine.quote_ttl_ms, 15_000);
        assert!(config.pools.is_empty());
    }
}
