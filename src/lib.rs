//! Resilient BLE control of a single heating mat.
//!
//! The [`infrastructure::bluetooth::MatService`] facade owns the connection
//! lifecycle and exposes temperature/timer requests plus a snapshot of the
//! last known device state.

pub mod domain;
pub mod infrastructure;
