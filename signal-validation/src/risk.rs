// Risk Engine
// Pure function from (signal, account/market snapshot, policy) to a
// RiskAssessment. No I/O and no mutable state, so re-evaluating the same
// inputs always yields the same assessment.

use chrono::{DateTime, Utc};
use common::{Direction, RejectionReason, RiskAssessment, Signal, TrailingStop};
use rust_decimal::prelude::*;
use tracing::debug;

use crate::policy::RiskPolicy;

/// Point-in-time market state for one instrument
#[derive(Debug, Clone)]
pub struct MarketState {
    pub last_price: Decimal,
    /// Average True Range for the signal's timeframe
    pub atr: Decimal,
    /// Realized volatility as a fraction (e.g. 0.03 = 3%)
    pub volatility: f64,
    pub volume_usd_24h: f64,
    /// End of an active news-blackout window, if one is in effect
    pub news_blackout_until: Option<DateTime<Utc>>,
}

/// Point-in-time account state
#[derive(Debug, Clone)]
pub struct AccountState {
    pub equity: Decimal,
}

/// Everything the engine needs besides the signal and the policy
#[derive(Debug, Clone)]
pub struct EvaluationContext {
    pub market: MarketState,
    pub account: AccountState,
}

/// Stateless policy evaluator
#[derive(Debug, Clone)]
pub struct RiskEngine {
    policy: RiskPolicy,
}

impl RiskEngine {
    pub fn new(policy: RiskPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RiskPolicy {
        &self.policy
    }

    /// Evaluate a signal against the policy and the current snapshot
    pub fn evaluate(&self, signal: &Signal, ctx: &EvaluationContext) -> RiskAssessment {
        // 1. Confidence gate
        if signal.confidence < self.policy.confidence_min {
            debug!(
                "Signal {} rejected: confidence {:.2} < {:.2}",
                signal.id, signal.confidence, self.policy.confidence_min
            );
            return RiskAssessment::rejected(RejectionReason::LowConfidence);
        }

        // 2. Market filters
        let filters = &self.policy.market_filters;
        if ctx.market.volatility < filters.min_volatility
            || ctx.market.volatility > filters.max_volatility
        {
            return RiskAssessment::rejected(RejectionReason::VolatilityOutOfRange);
        }
        if ctx.market.volume_usd_24h < filters.min_volume_usd {
            return RiskAssessment::rejected(RejectionReason::InsufficientVolume);
        }

        // 3. News blackout window
        if let Some(until) = ctx.market.news_blackout_until {
            if until > Utc::now() {
                return RiskAssessment::rejected(RejectionReason::NewsBlackout);
            }
        }

        // 4. Strength tier; dead-zone scores are indecisive
        let strength = match self.policy.tiers.classify(signal.score) {
            Some(strength) => strength,
            None => return RiskAssessment::rejected(RejectionReason::IndecisiveScore),
        };

        // Degenerate snapshots cannot be sized
        let price = ctx.market.last_price;
        let atr = ctx.market.atr;
        if price <= Decimal::ZERO || atr <= Decimal::ZERO {
            return RiskAssessment::rejected(RejectionReason::VolatilityOutOfRange);
        }

        // 5. Position sizing: the smaller of the exposure cap and the
        // risk-budget-derived size
        let stop_multiplier =
            Decimal::from_f64(self.policy.stop_loss_atr_multiplier).unwrap_or(Decimal::TWO);
        let profit_multiplier =
            Decimal::from_f64(self.policy.take_profit_atr_multiplier).unwrap_or(Decimal::TWO);
        let stop_distance = atr * stop_multiplier;

        // Sizing divides by the stop distance; a non-positive distance is a
        // misconfigured policy and cannot produce a position.
        if stop_distance <= Decimal::ZERO {
            debug!(
                "Signal {} rejected: non-positive stop distance from multiplier {}",
                signal.id, self.policy.stop_loss_atr_multiplier
            );
            return RiskAssessment::rejected(RejectionReason::VolatilityOutOfRange);
        }

        let equity = ctx.account.equity;
        let exposure_cap = equity
            * Decimal::from_f64(self.policy.max_position_size).unwrap_or(Decimal::ZERO)
            / price;
        let risk_budget =
            equity * Decimal::from_f64(self.policy.max_risk_per_trade).unwrap_or(Decimal::ZERO);
        let risk_sized = risk_budget / stop_distance;

        let quantity = exposure_cap.min(risk_sized).round_dp(8);
        let risk_per_trade = (quantity * stop_distance).round_dp(8);

        // 6. Stop/take-profit from ATR multiples, side-aware
        let (stop_loss_price, take_profit_price) = match signal.direction {
            Direction::Buy => (price - stop_distance, price + atr * profit_multiplier),
            Direction::Sell => (price + stop_distance, price - atr * profit_multiplier),
        };

        let trailing = &self.policy.trailing_stop;
        let trailing_stop = if trailing.enabled {
            let activation_distance =
                atr * Decimal::from_f64(trailing.activation_atr_multiplier).unwrap_or(Decimal::ONE);
            let distance =
                atr * Decimal::from_f64(trailing.distance_atr_multiplier).unwrap_or(Decimal::ONE);
            let activation_price = match signal.direction {
                Direction::Buy => price + activation_distance,
                Direction::Sell => price - activation_distance,
            };
            Some(TrailingStop {
                activation_price,
                distance,
            })
        } else {
            None
        };

        RiskAssessment {
            strength: Some(strength),
            max_position_size: quantity,
            risk_per_trade,
            stop_loss_price: Some(stop_loss_price),
            take_profit_price: Some(take_profit_price),
            trailing_stop,
            filters_passed: true,
            rejection_reason: None,
        }
    }
}
