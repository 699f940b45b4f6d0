//! Overlay runtime for the envelop protocol.
//!
//! This crate provides:
//! - The peer/address registry and the hybrid route table
//! - The pooled QUIC send path and the inbound node
//! - The envelope router and the application socket
//! - A host facade assembling a complete node
//! - A request/response RPC layer above the socket

pub mod host;
pub mod kademlia;
pub mod node;
pub mod peer_manager;
pub mod registry;
pub mod route;
pub mod router;
pub mod rpc;
pub mod socket;
pub mod tls;

pub use host::{Host, HostBuilder, HostError};
pub use kademlia::KademliaTable;
pub use node::{Node, NodeError};
pub use peer_manager::{PeerManager, SendError};
pub use registry::AddressRegistry;
pub use route::RouteTable;
pub use router::Router;
pub use rpc::{RpcEndpoint, RpcError, RpcMessage};
pub use socket::{EnvelopeSender, IncomingMessage, Socket, SocketError};
