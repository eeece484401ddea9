//! Venue clients: Hyperliquid for reading source wallets, Lighter for execution.

mod hyperliquid_client;
mod lighter_client;
mod paper;
mod retry;
mod types;
mod venue;

#[cfg(test)]
pub mod testing;

pub use hyperliquid_client::HyperliquidClient;
pub use lighter_client::{
    env_flag, normalize_symbol, tradable_size, LighterClient, LighterConfig,
};
pub use paper::PaperVenue;
pub use retry::{with_retry, RetryPolicy};
pub use venue::{ExecutionVenue, MarketOrder, SnapshotSource, VenueError};
