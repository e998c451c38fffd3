//! Light device adapters (Philips Hue bridge, Nanoleaf panel)

pub mod hue;
pub mod nanoleaf;
pub mod traits;

pub use traits::{DeviceAddress, DeviceFamily, DeviceSession, DeviceState};
