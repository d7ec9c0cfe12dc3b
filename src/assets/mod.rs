//! Offline asset layer.
//!
//! Static assets live in named cache generations stored in their own SQLite
//! database. A generation is installed from a manifest, then activated, which
//! purges every generation the configuration no longer expects. Once active,
//! the [`Interceptor`] answers asset requests cache-first and degrades to a
//! placeholder image or an offline notice when the network is gone.

mod cache;
mod fetch;
mod interceptor;
mod lifecycle;

pub use cache::AssetCache;
pub use fetch::{AssetFetcher, AssetRequest, AssetResponse, HttpFetcher, ResponseKind};
pub use interceptor::{InstallReport, Interception, Interceptor, ServedFrom, OFFLINE_NOTICE};
pub use lifecycle::GenerationState;
