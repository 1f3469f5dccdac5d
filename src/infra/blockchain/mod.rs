//! Blockchain client implementations.
//!
//! Signing keys are decoded by [`keys`]; [`solana`] talks to the cluster.

pub mod keys;
pub mod solana;

pub use keys::{KeyDecoder, decode_signing_key};
pub use solana::{
    HttpSolanaRpcProvider, RpcClientConfig, SolanaChainAdapter, SolanaRpcProvider,
};
