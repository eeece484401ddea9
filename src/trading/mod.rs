//! Trading logic: follow sizing, decision engine, order execution.

mod balance;
mod config;
mod engine;
mod executor;
mod sizing;

pub use config::{DecreaseMode, FollowConfig, RatioMode};
pub use engine::{FollowDecision, FollowEngine, FollowResult, StopLossHit};
pub use executor::OrderExecutor;
