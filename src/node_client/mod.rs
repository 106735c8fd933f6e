//! Component C1: Node Client.

pub mod circuit;
pub mod client;
pub mod rate_limit;

pub use client::{NodeApi, RpcBlock, RpcClient, RpcClientConfig, RpcTransaction, RpcTxIn, RpcTxOut};
