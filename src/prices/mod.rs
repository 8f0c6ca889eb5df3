//! USD price cache with a background refresher

pub mod cache;
pub mod source;

pub use cache::{PriceCache, PriceQuote};
pub use source::{CoinGeckoSource, PriceFetchError, PriceSource};
