//! Synthesis-server side: the datagram-channel call registry over OSC.

pub mod rpc;

pub use rpc::{RpcClient, RpcConfig};
