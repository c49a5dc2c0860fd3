//! Content-oriented publish/subscribe (COPSS) over a named-data substrate.
//!
//! Hosts subscribe to content descriptors (CDs) and publish multicast
//! messages tagged with CDs. Routers keep a subscription table, tunnel
//! first-hop messages and subscription changes to rendezvous points through
//! the substrate, and fan delivered messages out to subscribers.

pub mod tlv;

pub mod name;

pub mod tables;

pub mod packet;

pub mod protocol;

pub mod substrate;

pub mod platform;

pub mod face;

pub mod rp;

pub mod config;

pub mod router;

pub mod command;

pub mod client;

pub use client::CopssClient;
pub use config::RouterConfig;
pub use name::ContentName;
pub use protocol::{Control, ControlType, Multicast};
pub use router::{Router, RouterError};
