//! Bluetooth Module
//!
//! Keeps a resilient BLE connection to a heating mat and drives its control
//! protocol.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                       MatService                         │
//! │  (connection loop + public API for the consumer)         │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │
//!         ┌─────────────┼──────────────┬──────────────┐
//!         │             │              │              │
//!         ▼             ▼              ▼              ▼
//! ┌───────────┐  ┌────────────┐  ┌───────────┐  ┌────────────┐
//! │  Scanner  │  │ Connection │  │ Scheduler │  │ Dispatcher │
//! │           │  │            │  │           │  │            │
//! │ - cached  │  │ - GATT     │  │ - debounce│  │ - decode   │
//! │   lookup  │  │   handles  │  │ - retries │  │ - snapshot │
//! │ - scan    │  │ - notify   │  │ - timer   │  │   updates  │
//! └───────────┘  └────────────┘  └───────────┘  └────────────┘
//!                       │              │              ▲
//!                       ▼              ▼              │
//!               reader / keepalive ─► Session ◄── Inbound
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - Control packet codec and ATT error parsing
//! - [`transport`] - Adapter/device traits the rest of the module talks to
//! - [`btle`] - btleplug implementation of the transport
//! - [`scanner`] - Device discovery
//! - [`connection`] - Characteristic resolution, init write and subscriptions
//! - [`session`] - Shared connection state, snapshot and link handles
//! - [`writer`] - Serialized writes with retry
//! - [`scheduler`] - Debounced temperature and immediate timer commands
//! - [`reader`] - Sequenced reads
//! - [`keepalive`] - Periodic init packet while connected
//! - [`dispatcher`] - Inbound payloads to snapshot updates
//! - [`service`] - Main service coordinator

pub mod btle;
pub mod connection;
pub mod dispatcher;
pub mod keepalive;
pub mod protocol;
pub mod reader;
pub mod scanner;
pub mod scheduler;
pub mod service;
pub mod session;
pub mod task;
pub mod transport;
pub mod writer;

#[cfg(test)]
pub(crate) mod mock;

// Re-export main service for convenience
pub use service::MatService;
