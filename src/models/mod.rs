//! Data models for snapshots, events, wallets, positions, and orders.

mod event;
mod order;
mod position;
mod snapshot;
mod wallet;

pub use event::{EventKind, PositionEvent, Side};
pub use order::{OrderResult, OrderSide, TradeRecord};
pub use position::{MirroredPosition, VenuePosition};
pub use snapshot::{SnapshotPosition, WalletSnapshot};
pub use wallet::{is_valid_address, short_address, TrackedWalletConfig};
