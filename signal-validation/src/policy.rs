//! Risk policy configuration
//!
//! All boundary values live here, never hard-coded in the engine. The
//! deployed TOML file is the single source of truth; the compiled defaults
//! below only back values the file omits.

use common::SignalStrength;
use serde::{Deserialize, Serialize};

/// Immutable, named policy object backing the risk engine. Several
/// policies can run side by side (e.g. A/B backtesting) without cross-talk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskPolicy {
    /// Policy name, used in logs and the execution ledger
    #[serde(default = "default_policy_name")]
    pub name: String,

    /// Minimum model confidence for any signal (0.0 to 1.0)
    #[serde(default = "default_confidence_min")]
    pub confidence_min: f64,

    /// Score boundaries mapping to strength tiers
    #[serde(default)]
    pub tiers: StrengthTiers,

    /// Maximum position size as a fraction of account equity
    #[serde(default = "default_max_position_size")]
    pub max_position_size: f64,

    /// Maximum capital risked between entry and stop, as a fraction of equity
    #[serde(default = "default_max_risk_per_trade")]
    pub max_risk_per_trade: f64,

    /// Stop distance in ATR multiples
    #[serde(default = "default_stop_loss_atr_multiplier")]
    pub stop_loss_atr_multiplier: f64,

    /// Take-profit distance in ATR multiples
    #[serde(default = "default_take_profit_atr_multiplier")]
    pub take_profit_atr_multiplier: f64,

    /// Market quality filters
    #[serde(default)]
    pub market_filters: MarketFilters,

    /// Trailing stop parameters, disabled unless configured
    #[serde(default)]
    pub trailing_stop: TrailingStopConfig,
}

impl Default for RiskPolicy {
    fn default() -> Self {
        Self {
            name: default_policy_name(),
            confidence_min: default_confidence_min(),
            tiers: StrengthTiers::default(),
            max_position_size: default_max_position_size(),
            max_risk_per_trade: default_max_risk_per_trade(),
            stop_loss_atr_multiplier: default_stop_loss_atr_multiplier(),
            take_profit_atr_multiplier: default_take_profit_atr_multiplier(),
            market_filters: MarketFilters::default(),
            trailing_stop: TrailingStopConfig::default(),
        }
    }
}

impl RiskPolicy {
    /// Check boundary values before the policy is put into service. The
    /// engine assumes positive multipliers and fractions within (0, 1].
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(0.0..=1.0).contains(&self.confidence_min) {
            anyhow::bail!("confidence_min must be within [0, 1]");
        }
        if self.max_position_size <= 0.0 || self.max_position_size > 1.0 {
            anyhow::bail!("max_position_size must be within (0, 1]");
        }
        if self.max_risk_per_trade <= 0.0 || self.max_risk_per_trade > 1.0 {
            anyhow::bail!("max_risk_per_trade must be within (0, 1]");
        }
        if self.stop_loss_atr_multiplier <= 0.0 {
            anyhow::bail!("stop_loss_atr_multiplier must be positive");
        }
        if self.take_profit_atr_multiplier <= 0.0 {
            anyhow::bail!("take_profit_atr_multiplier must be positive");
        }
        if self.tiers.buy <= self.tiers.sell {
            anyhow::bail!("buy boundary must sit above the sell boundary");
        }
        if self.tiers.strong_buy < self.tiers.buy || self.tiers.strong_sell > self.tiers.sell {
            anyhow::bail!("strong tiers must sit outside their base tiers");
        }
        let filters = &self.market_filters;
        if filters.min_volatility < 0.0 || filters.max_volatility <= filters.min_volatility {
            anyhow::bail!("volatility bounds must satisfy 0 <= min < max");
        }
        if filters.min_volume_usd < 0.0 {
            anyhow::bail!("min_volume_usd must not be negative");
        }
        if self.trailing_stop.enabled
            && (self.trailing_stop.activation_atr_multiplier <= 0.0
                || self.trailing_stop.distance_atr_multiplier <= 0.0)
        {
            anyhow::bail!("trailing stop multipliers must be positive");
        }
        Ok(())
    }
}

fn default_policy_name() -> String {
    "default".to_string()
}

fn default_confidence_min() -> f64 {
    0.70
}

fn default_max_position_size() -> f64 {
    0.02
}

fn default_max_risk_per_trade() -> f64 {
    0.01
}

fn default_stop_loss_atr_multiplier() -> f64 {
    2.0
}

fn default_take_profit_atr_multiplier() -> f64 {
    3.0
}

/// Score boundaries for strength tiers. Scores between `sell` and `buy`
/// (the dead zone) are indecisive and rejected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrengthTiers {
    #[serde(default = "default_strong_buy")]
    pub strong_buy: f64,
    #[serde(default = "default_buy")]
    pub buy: f64,
    #[serde(default = "default_sell")]
    pub sell: f64,
    #[serde(default = "default_strong_sell")]
    pub strong_sell: f64,
}

impl Default for StrengthTiers {
    fn default() -> Self {
        Self {
            strong_buy: default_strong_buy(),
            buy: default_buy(),
            sell: default_sell(),
            strong_sell: default_strong_sell(),
        }
    }
}

fn default_strong_buy() -> f64 {
    0.85
}

fn default_buy() -> f64 {
    0.65
}

fn default_sell() -> f64 {
    -0.65
}

fn default_strong_sell() -> f64 {
    -0.85
}

impl StrengthTiers {
    /// Map a model score to a strength tier; None means the score sits in
    /// the indecisive dead zone.
    pub fn classify(&self, score: f64) -> Option<SignalStrength> {
        if score >= self.strong_buy {
            Some(SignalStrength::StrongBuy)
        } else if score >= self.buy {
            Some(SignalStrength::Buy)
        } else if score <= self.strong_sell {
            Some(SignalStrength::StrongSell)
        } else if score <= self.sell {
            Some(SignalStrength::Sell)
        } else {
            None
        }
    }
}

/// Instrument quality gates checked before sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketFilters {
    /// Reject below this volatility (dead market)
    #[serde(default = "default_min_volatility")]
    pub min_volatility: f64,

    /// Reject above this volatility
    #[serde(default = "default_max_volatility")]
    pub max_volatility: f64,

    /// Minimum 24h traded volume in USD
    #[serde(default = "default_min_volume_usd")]
    pub min_volume_usd: f64,
}

impl Default for MarketFilters {
    fn default() -> Self {
        Self {
            min_volatility: default_min_volatility(),
            max_volatility: default_max_volatility(),
            min_volume_usd: default_min_volume_usd(),
        }
    }
}

fn default_min_volatility() -> f64 {
    0.001
}

fn default_max_volatility() -> f64 {
    0.08
}

fn default_min_volume_usd() -> f64 {
    250_000.0
}

/// Trailing stop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrailingStopConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Profit distance (ATR multiples) at which the trail activates
    #[serde(default = "default_trailing_activation")]
    pub activation_atr_multiplier: f64,

    /// Trail distance in ATR multiples once active
    #[serde(default = "default_trailing_distance")]
    pub distance_atr_multiplier: f64,
}

impl Default for TrailingStopConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            activation_atr_multiplier: default_trailing_activation(),
            distance_atr_multiplier: default_trailing_distance(),
        }
    }
}

fn default_trailing_activation() -> f64 {
    1.5
}

fn default_trailing_distance() -> f64 {
    1.0
}

/// Load a policy from a TOML file
pub fn load_policy(path: &str) -> anyhow::Result<RiskPolicy> {
    let content = std::fs::read_to_string(path)?;
    let policy: RiskPolicy = toml::from_str(&content)?;
    policy.validate()?;
    Ok(policy)
}

/// Save a policy to a TOML file
pub fn save_policy(policy: &RiskPolicy, path: &str) -> anyhow::Result<()> {
    let content = toml::to_string_pretty(policy)?;
    std::fs::write(path, content)?;
    Ok(())
}
