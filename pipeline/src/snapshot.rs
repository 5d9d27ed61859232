// Snapshot provider
// Market-data collection lives outside the pipeline; this trait is its
// boundary. The static provider backs tests and paper trading.

use async_trait::async_trait;
use dashmap::DashMap;
use rust_decimal::Decimal;
use signal_validation::risk::{AccountState, EvaluationContext, MarketState};

/// Supplies the account/market snapshot the risk engine evaluates against
#[async_trait]
pub trait SnapshotProvider: Send + Sync {
    async fn snapshot(&self, instrument: &str) -> anyhow::Result<EvaluationContext>;
}

/// Fixed snapshots keyed by instrument
pub struct StaticSnapshotProvider {
    equity: Decimal,
    markets: DashMap<String, MarketState>,
}

impl StaticSnapshotProvider {
    pub fn new(equity: Decimal) -> Self {
        Self {
            equity,
            markets: DashMap::new(),
        }
    }

    pub fn set_market(&self, instrument: &str, market: MarketState) {
        self.markets.insert(instrument.to_string(), market);
    }
}

#[async_trait]
impl SnapshotProvider for StaticSnapshotProvider {
    async fn snapshot(&self, instrument: &str) -> anyhow::Result<EvaluationContext> {
        let market = self
            .markets
            .get(instrument)
            .map(|m| m.clone())
            .ok_or_else(|| anyhow::anyhow!("no market data for instrument {}", instrument))?;

        Ok(EvaluationContext {
            market,
            account: AccountState {
                equity: self.equity,
            },
        })
    }
}
