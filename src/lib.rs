//! # S7 Link
//!
//! Connection supervision and cyclic data exchange for Siemens S7 PLCs.
//!
//! This is an **orchestration** library — it does not implement the wire
//! protocol. An external protocol client is plugged in behind the
//! [`Transport`] trait, and this crate keeps the connection alive and
//! moves typed values between controller memory and the application:
//!
//! - **Supervision** — [`PlcLink`] connects with retries, probes
//!   reachability before each attempt, detects a dropped connection from
//!   a background monitoring loop, and reconnects automatically.
//! - **Scheduling** — registered [`PlcAction`]s run in order on every
//!   monitoring tick while the link is online; a failing action is
//!   isolated and reported without starving the others.
//! - **Typed exchange** — [`DataItem`]s describe where a value lives and
//!   what wire type it has; [`DataGroup`]s batch their reads into one
//!   multi-read transaction per tick and write staged values back.
//! - **Notifications** — every outcome (connect attempts, loss, data
//!   ticks, value changes) is published as a [`LinkEvent`]; nothing in
//!   the exchange path panics or throws across the public boundary.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use s7_link::{
//!     AccessMode, DataGroup, DataItem, EventBus, MemoryArea, PlcConfig, PlcLink, PlcValue,
//!     VarType,
//! };
//! # use s7_link::{MemoryArea as Area, Result, Transport};
//! # struct ProtocolClient;
//! # #[async_trait::async_trait]
//! # impl Transport for ProtocolClient {
//! #     async fn open(&mut self) -> Result<()> { Ok(()) }
//! #     async fn close(&mut self) -> Result<()> { Ok(()) }
//! #     fn is_connected(&self) -> bool { true }
//! #     async fn read_bytes(&mut self, _: Area, _: u16, _: usize, len: usize) -> Result<Vec<u8>> {
//! #         Ok(vec![0; len])
//! #     }
//! #     async fn write_bytes(&mut self, _: Area, _: u16, _: usize, _: &[u8]) -> Result<()> {
//! #         Ok(())
//! #     }
//! # }
//!
//! #[tokio::main]
//! async fn main() -> s7_link::Result<()> {
//!     let events = EventBus::default();
//!     let mut updates = events.subscribe();
//!
//!     let config = PlcConfig::new("press", "192.168.0.10")?;
//!     let link = PlcLink::new(config, ProtocolClient, events.clone())?;
//!
//!     // Declare the variables to exchange
//!     let start_button = DataItem::new("start_button", MemoryArea::Input, 2, VarType::Bit)
//!         .with_bit(3)
//!         .into_shared();
//!     let speed = DataItem::new("speed", MemoryArea::DataBlock, 0, VarType::Real)
//!         .with_block(1)
//!         .with_mode(AccessMode::ReadWrite)
//!         .into_shared();
//!
//!     let group = Arc::new(DataGroup::new("line", link.transport(), events.clone()));
//!     group.push(start_button.clone());
//!     group.push(speed.clone());
//!     link.registry().register(group).await;
//!
//!     // Bring the link up; the monitoring loop now exchanges data cyclically
//!     link.connect(3).await;
//!
//!     // Stage a value for the next write cycle
//!     speed.lock().unwrap().set_pending(PlcValue::Real(12.5))?;
//!
//!     // Observe what the loop does
//!     while let Ok(event) = updates.recv().await {
//!         println!("{:?}", event);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Addressing
//!
//! A variable is located by its [`MemoryArea`], a data-block number (DB
//! area only), a byte offset, and — for bits — a bit offset within the
//! byte. Twelve wire types are supported, from [`VarType::Bit`] through
//! [`VarType::LReal`] and length-prefixed strings; see [`convert`] for
//! the exact byte layouts.
//!
//! ## Failure model
//!
//! Errors never escape the supervision path:
//!
//! - Configuration problems (bad address, duplicate address) are rejected
//!   when they are supplied, before anything touches the wire.
//! - Transport failures become notifications and trigger the retry or
//!   reconnect policies.
//! - A conversion failure leaves the item's cached value untouched and
//!   skips that item for the cycle.
//! - An action failure is reported and the remaining actions still run.
//!
//! ## Cancellation
//!
//! Connect and ping share one cancellation context per link; starting a
//! new operation replaces the context, so the newest request wins.
//! Cancellation is cooperative: it is observed between protocol round
//! trips, never by interrupting dispatched I/O.

#![warn(clippy::all)]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

mod connection;
pub mod convert;
mod directory;
mod error;
mod events;
mod group;
mod io;
mod item;
mod memory;
mod registry;
mod transport;
pub mod utils;
mod value;

// Public re-exports
pub use connection::{
    validate_ip, CpuVariant, LinkStatus, PlcConfig, PlcLink, Prober, TcpProbe,
    DEFAULT_MONITOR_INTERVAL, ISO_TSAP_PORT,
};
pub use directory::PlcDirectory;
pub use error::{LinkError, Result};
pub use events::{EventBus, LinkEvent, DEFAULT_EVENT_CAPACITY};
pub use group::DataGroup;
pub use io::{DiscreteInputBank, DiscreteOutputBank, BANK_CHANNELS};
pub use item::{AccessMode, DataItem, SharedItem};
pub use memory::MemoryArea;
pub use registry::{ActionRegistry, PlcAction};
pub use transport::{shared_transport, ReadRequest, SharedTransport, Transport};
pub use value::{PlcValue, VarType};
