pub mod candles;
pub mod snapshot;

// Re-export the snapshot types for convenient access
// (e.g. `use crate::market_data::MarketSnapshot`).
pub use candles::Candle;
pub use snapshot::{MarketSnapshot, SnapshotAssembler, SymbolSnapshot};
