//! Signal validation: dedupe cache, risk policy evaluation and the
//! validator that turns scored signals into decisions.

pub mod cache;
pub mod policy;
pub mod risk;
pub mod validator;

pub use cache::{InMemorySignalCache, SignalCache};
pub use policy::RiskPolicy;
pub use risk::{AccountState, EvaluationContext, MarketState, RiskEngine};
pub use validator::SignalValidator;
