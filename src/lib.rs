//! Ambilight Bridge
//!
//! Local control server that keeps Philips Hue and Nanoleaf lights in step
//! with music played from a local directory.
//!
//! This library provides:
//! - Hue bridge and Nanoleaf panel sessions with state reconciliation
//! - LAN discovery of both device families (SSDP, mDNS)
//! - Sequential music playback through a command-line player
//! - Server-Sent Events for real-time updates

pub mod adapters;
pub mod api;
pub mod bus;
pub mod color;
pub mod config;
pub mod coordinator;
pub mod discovery;
pub mod error;
pub mod playback;
