pub mod funding;
pub mod pipeline;

pub use funding::{FundingOutcome, FundingPolicy, FUNDING_FEE_RESERVE};
pub use pipeline::{
    SwapOutcome, SwapPipeline, SwapRequest, SwapStatus, TokenRef, NATIVE_MINT, SWAP_FEE_RESERVE,
};
