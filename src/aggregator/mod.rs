pub mod client;
pub mod tokens;

pub use client::{JupiterClient, QuoteParams, SwapAggregator, TokenMetadata};
pub use tokens::TokenCache;
