//! Audio output capability
//!
//! `ProcessBackend` hands each track to a command-line player. The child
//! process is the "loaded and playing" resource: busy while it runs, killed
//! and reaped on stop.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::MusicConfig;
use crate::error::PlaybackError;

#[async_trait]
pub trait AudioBackend: Send + Sync {
    /// Make `track` the current resource, replacing any previous one
    async fn load(&self, track: &Path) -> Result<(), PlaybackError>;

    /// Start the loaded resource
    async fn play(&self) -> Result<(), PlaybackError>;

    /// Whether the current resource is still sounding
    async fn is_busy(&self) -> bool;

    /// 0.0 (silent) to 1.0 (full)
    async fn set_volume(&self, volume: f32);

    /// Halt output. No-op when nothing plays.
    async fn stop(&self) -> Result<(), PlaybackError>;

    /// Release the loaded resource
    async fn unload(&self);
}

#[derive(Default)]
struct ProcessState {
    loaded: Option<PathBuf>,
    child: Option<Child>,
    volume: f32,
}

pub struct ProcessBackend {
    player: String,
    args: Vec<String>,
    state: Mutex<ProcessState>,
}

impl ProcessBackend {
    pub fn new(player: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            player: player.into(),
            args,
            state: Mutex::new(ProcessState {
                volume: 1.0,
                ..Default::default()
            }),
        }
    }

    pub fn from_config(config: &MusicConfig) -> Self {
        Self::new(config.player.clone(), config.player_args.clone())
    }
}

async fn kill_child(child: &mut Child) -> Result<(), PlaybackError> {
    if let Ok(Some(_)) = child.try_wait() {
        return Ok(());
    }
    child.kill().await?;
    Ok(())
}

#[async_trait]
impl AudioBackend for ProcessBackend {
    async fn load(&self, track: &Path) -> Result<(), PlaybackError> {
        if !track.is_file() {
            return Err(PlaybackError::Backend(format!(
                "not a playable file: {}",
                track.display()
            )));
        }
        let mut state = self.state.lock().await;
        if let Some(mut previous) = state.child.take() {
            kill_child(&mut previous).await?;
        }
        state.loaded = Some(track.to_path_buf());
        Ok(())
    }

    async fn play(&self) -> Result<(), PlaybackError> {
        let mut state = self.state.lock().await;
        let track = state
            .loaded
            .clone()
            .ok_or_else(|| PlaybackError::Backend("no track loaded".to_string()))?;

        // Players take their volume at launch; muted output means nothing to start
        if state.volume <= 0.0 {
            debug!("Volume is zero, not starting {}", track.display());
            return Ok(());
        }

        let child = Command::new(&self.player)
            .args(&self.args)
            .arg(&track)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| PlaybackError::Backend(format!("failed to start {}: {}", self.player, e)))?;

        debug!(pid = ?child.id(), "Started {} for {}", self.player, track.display());
        state.child = Some(child);
        Ok(())
    }

    async fn is_busy(&self) -> bool {
        let mut state = self.state.lock().await;
        let Some(child) = state.child.as_mut() else {
            return false;
        };
        match child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                if !status.success() {
                    warn!("{} exited with {}", self.player, status);
                }
                state.child = None;
                false
            }
            Err(e) => {
                warn!("Could not poll {}: {}", self.player, e);
                false
            }
        }
    }

    async fn set_volume(&self, volume: f32) {
        self.state.lock().await.volume = volume.clamp(0.0, 1.0);
    }

    async fn stop(&self) -> Result<(), PlaybackError> {
        let mut state = self.state.lock().await;
        if let Some(mut child) = state.child.take() {
            kill_child(&mut child).await?;
        }
        Ok(())
    }

    async fn unload(&self) {
        self.state.lock().await.loaded = None;
    }
}
