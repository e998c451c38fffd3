//! PlaybackController - sequential playback of a music directory
//!
//! A run plays every matching track in name order and only returns once the
//! last one has finished or `stop` was called. The run lives on its own task,
//! so light commands keep flowing while music plays.

pub mod backend;

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::bus::{BusEvent, SharedBus};
use crate::config::MusicConfig;
use crate::error::PlaybackError;

pub use backend::{AudioBackend, ProcessBackend};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Track {
    pub name: String,
    pub path: PathBuf,
}

/// Outcome of one `play` run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PlaybackReport {
    pub played: usize,
    /// Run ended early because of `stop`
    pub stopped: bool,
}

/// Regular files in `dir` with `extension` (case-insensitive), sorted by name
pub async fn list_tracks(dir: &Path, extension: &str) -> Result<Vec<Track>, PlaybackError> {
    if !tokio::fs::metadata(dir)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false)
    {
        return Err(PlaybackError::MissingDirectory(dir.to_path_buf()));
    }

    let mut tracks = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let matches = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case(extension));
        if !matches || !entry.file_type().await?.is_file() {
            continue;
        }
        tracks.push(Track {
            name: entry.file_name().to_string_lossy().into_owned(),
            path,
        });
    }

    tracks.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(tracks)
}

pub struct PlaybackController {
    backend: Arc<dyn AudioBackend>,
    extension: String,
    poll_interval: Duration,
    /// Cancellation handle of the run in progress
    active: Arc<Mutex<Option<CancellationToken>>>,
    bus: SharedBus,
}

impl PlaybackController {
    pub fn new(
        backend: Arc<dyn AudioBackend>,
        extension: impl Into<String>,
        poll_interval: Duration,
        bus: SharedBus,
    ) -> Self {
        Self {
            backend,
            extension: extension.into(),
            poll_interval,
            active: Arc::new(Mutex::new(None)),
            bus,
        }
    }

    pub fn from_config(config: &MusicConfig, bus: SharedBus) -> Self {
        Self::new(
            Arc::new(ProcessBackend::from_config(config)),
            config.extension.clone(),
            config.poll_interval(),
            bus,
        )
    }

    pub async fn is_playing(&self) -> bool {
        self.active.lock().await.is_some()
    }

    /// Play every track in `dir`, returning when the last one ends or on `stop`
    pub async fn play(&self, dir: &Path) -> Result<PlaybackReport, PlaybackError> {
        let tracks = list_tracks(dir, &self.extension).await?;

        let cancel = {
            let mut active = self.active.lock().await;
            if active.is_some() {
                return Err(PlaybackError::AlreadyPlaying);
            }
            let token = CancellationToken::new();
            *active = Some(token.clone());
            token
        };

        info!("Playing {} track(s) from {}", tracks.len(), dir.display());

        let backend = self.backend.clone();
        let active = self.active.clone();
        let bus = self.bus.clone();
        let poll_interval = self.poll_interval;

        // The run clears `active` itself so an abandoned caller cannot wedge the controller
        let run = tokio::spawn(async move {
            let result = run_tracks(backend.as_ref(), &tracks, poll_interval, &cancel, &bus).await;
            *active.lock().await = None;
            if let Ok(report) = &result {
                bus.publish(BusEvent::PlaybackFinished {
                    played: report.played,
                    stopped: report.stopped,
                });
            }
            result
        });

        run.await
            .map_err(|e| PlaybackError::Backend(format!("playback task failed: {}", e)))?
    }

    /// Silence and halt the current run. Safe to call when idle.
    pub async fn stop(&self) -> Result<(), PlaybackError> {
        self.backend.set_volume(0.0).await;
        if let Some(token) = self.active.lock().await.as_ref() {
            token.cancel();
        }
        self.backend.stop().await?;
        self.backend.unload().await;
        Ok(())
    }

    pub async fn shutdown(&self) {
        if let Err(e) = self.stop().await {
            warn!("Failed to stop playback on shutdown: {}", e);
        }
    }

    /// Wait for `signal`, then stop playback. Used as the server's graceful
    /// shutdown future: an open `play` request is only released by a stop.
    pub async fn shutdown_after<F>(self: Arc<Self>, signal: F)
    where
        F: Future<Output = ()>,
    {
        signal.await;
        info!("Stopping playback...");
        self.shutdown().await;
    }
}

async fn run_tracks(
    backend: &dyn AudioBackend,
    tracks: &[Track],
    poll_interval: Duration,
    cancel: &CancellationToken,
    bus: &SharedBus,
) -> Result<PlaybackReport, PlaybackError> {
    let mut report = PlaybackReport::default();

    for track in tracks {
        if cancel.is_cancelled() {
            report.stopped = true;
            break;
        }

        backend.load(&track.path).await?;
        if cancel.is_cancelled() {
            report.stopped = true;
            break;
        }
        backend.set_volume(1.0).await;
        if let Err(e) = backend.play().await {
            // stop() unloaded the track between load and play
            if cancel.is_cancelled() {
                report.stopped = true;
                break;
            }
            return Err(e);
        }
        info!("Now playing {}", track.name);
        bus.publish(BusEvent::TrackStarted {
            name: track.name.clone(),
        });
        report.played += 1;

        let mut poll = tokio::time::interval(poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    report.stopped = true;
                    break;
                }
                _ = poll.tick() => {
                    if !backend.is_busy().await {
                        break;
                    }
                }
            }
        }

        if report.stopped {
            // stop() may have raced a track that was still starting
            backend.stop().await?;
            break;
        }
    }

    info!(
        "Playback finished: {} track(s) played{}",
        report.played,
        if report.stopped { " (stopped)" } else { "" }
    );
    Ok(report)
}
