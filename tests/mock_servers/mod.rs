//! Mock servers for adapter integration testing
//!
//! These mock servers simulate the device REST APIs (Hue bridge, Nanoleaf panel)
//! allowing full integration testing without real hardware.

#![allow(dead_code)]

pub mod hue;
pub mod nanoleaf;

pub use hue::MockHueBridge;
pub use nanoleaf::MockNanoleaf;

/// A local port with nothing listening on it
pub async fn closed_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}
