//! pyps IPC Protocol and Client/Server
//!
//! This crate provides the IPC protocol definitions and Unix socket
//! client/server implementations for querying the pyps daemon.

mod client;
mod codec;
mod error;
mod protocol;
mod server;

pub use client::{ConnectedClient, IpcClient};
pub use codec::MAX_FRAME_SIZE;
pub use error::IpcError;
pub use protocol::*;
pub use server::{IpcServer, RequestHandler};
