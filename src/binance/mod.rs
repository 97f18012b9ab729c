pub mod client;
pub mod filters;
pub mod retry;

// Re-export the client and filter types for convenient access.
pub use client::{BinanceFuturesClient, OrderAck, OrderRequest, OrderType};
pub use filters::{FilterCache, SymbolFilters};
pub use retry::RetryPolicy;
