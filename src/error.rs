//! Request-scoped error kinds
//!
//! Validation errors (`InvalidAddress`, `InvalidColor`, `InvalidLightId`) are
//! raised before any device I/O. Device errors carry the family they came from
//! so the API layer can report which half of a two-device request failed.

use std::path::PathBuf;

use thiserror::Error;

use crate::adapters::DeviceFamily;

#[derive(Debug, Error)]
pub enum LightError {
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid color: {0}")]
    InvalidColor(String),

    #[error("invalid light id: {0}")]
    InvalidLightId(String),

    #[error("{0} session is not connected")]
    NotConnected(DeviceFamily),

    #[error("{family} device unreachable: {reason}")]
    DeviceUnreachable { family: DeviceFamily, reason: String },

    /// Pairing button was never pressed, or the credential was revoked
    #[error("{0} device has not authorized this server (press the pairing button, then reconnect)")]
    DeviceAuthError(DeviceFamily),

    /// The device's own status payload flagged a fault; the payload is kept verbatim
    #[error("{family} device reported an error")]
    DeviceReportedError {
        family: DeviceFamily,
        payload: serde_json::Value,
    },

    #[error("light group not found: {0}")]
    GroupNotFound(String),

    #[error("{family} device has no light {id}")]
    LightNotFound { family: DeviceFamily, id: String },
}

impl LightError {
    pub fn unreachable(family: DeviceFamily, err: impl std::fmt::Display) -> Self {
        LightError::DeviceUnreachable {
            family,
            reason: err.to_string(),
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            LightError::InvalidAddress(_)
                | LightError::InvalidColor(_)
                | LightError::InvalidLightId(_)
        )
    }
}

#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("music directory not found: {}", .0.display())]
    MissingDirectory(PathBuf),

    #[error("playback already in progress")]
    AlreadyPlaying,

    #[error("audio backend error: {0}")]
    Backend(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
