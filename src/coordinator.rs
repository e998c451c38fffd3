//! CommandCoordinator - applies light intents to the device sessions
//!
//! Every intent is reconciled against a fresh state read from the device:
//! - a device that reports an error in its status is never written to
//! - omitted targets default to every member of the device's state
//! - omitted color defaults to white
//! - power is only sent when it differs from what the device reports
//!
//! Hue and Nanoleaf differ in power semantics. Hue lights accept color while
//! off, so color is always written and power layered on top. A Nanoleaf color
//! write turns the panel on, so the panel gets either a color or a power-off.
//!
//! Commands are serialized per family; the two families never block each other.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::adapters::hue::HubCommand;
use crate::adapters::nanoleaf::PanelCommand;
use crate::adapters::{DeviceAddress, DeviceFamily, DeviceSession};
use crate::bus::{BusEvent, SharedBus};
use crate::color::{to_hub_command, to_panel_color, Rgb};
use crate::error::LightError;

/// Caller-supplied desired light state, pre-reconciliation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LightIntent {
    pub rgb: Option<Rgb>,
    pub on: Option<bool>,
    /// `None` targets every light the device currently reports
    pub target_ids: Option<BTreeSet<String>>,
}

/// Successful command summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Ack {
    pub family: DeviceFamily,
    pub targets: Vec<String>,
    /// Power state sent with the command, `None` when power was left alone
    pub power: Option<bool>,
}

/// Outcome of connecting both families in one request
#[derive(Debug)]
pub struct ConnectReport {
    pub hue: Result<(), LightError>,
    pub nanoleaf: Result<(), LightError>,
}

impl ConnectReport {
    pub fn all_ok(&self) -> bool {
        self.hue.is_ok() && self.nanoleaf.is_ok()
    }
}

/// Apply `intent` to a Hue-style session (color always, power only on change)
pub async fn apply_hub_intent<S>(session: &S, intent: &LightIntent) -> Result<Ack, LightError>
where
    S: DeviceSession<Command = HubCommand> + ?Sized,
{
    let family = session.family();
    if !session.is_connected().await {
        return Err(LightError::NotConnected(family));
    }

    // A device-reported fault propagates here, before anything is written
    let state = session.current_state().await?;

    // Unknown ids are refused up front so a command is never half-applied
    if let Some(ids) = &intent.target_ids {
        if let Some(unknown) = ids.iter().find(|id| !state.addressable.contains(*id)) {
            return Err(LightError::LightNotFound {
                family,
                id: unknown.clone(),
            });
        }
    }

    let targets = intent
        .target_ids
        .clone()
        .unwrap_or_else(|| state.members.clone());
    let rgb = intent.rgb.unwrap_or(Rgb::WHITE);
    let power = intent.on.filter(|on| *on != state.is_any_on);

    let command = HubCommand {
        color: to_hub_command(rgb),
        on: power,
    };
    debug!(?targets, ?command, any_on = state.is_any_on, "Reconciled hub intent");

    session.apply_state(&targets, &command).await?;
    log_read_back(session).await;

    Ok(Ack {
        family,
        targets: targets.into_iter().collect(),
        power,
    })
}

/// Apply `intent` to a Nanoleaf-style session (color or power-off, never both)
pub async fn apply_panel_intent<S>(session: &S, intent: &LightIntent) -> Result<Ack, LightError>
where
    S: DeviceSession<Command = PanelCommand> + ?Sized,
{
    let family = session.family();
    if !session.is_connected().await {
        return Err(LightError::NotConnected(family));
    }

    let state = session.current_state().await?;
    let rgb = intent.rgb.unwrap_or(Rgb::WHITE);

    let show_color = match intent.on {
        Some(on) => on,
        None => state.is_any_on,
    };
    let command = if show_color {
        PanelCommand::SetColor(to_panel_color(rgb))
    } else {
        PanelCommand::PowerOff
    };
    debug!(?command, is_on = state.is_any_on, "Reconciled panel intent");

    session.apply_state(&state.members, &command).await?;
    log_read_back(session).await;

    Ok(Ack {
        family,
        targets: state.members.into_iter().collect(),
        power: Some(show_color),
    })
}

/// Post-command status for the log; failures here never fail the command
async fn log_read_back<S: DeviceSession + ?Sized>(session: &S) {
    match session.read_back().await {
        Ok(status) => info!(family = %session.family(), %status, "Device state after command"),
        Err(e) => warn!(family = %session.family(), "Could not read back device state: {}", e),
    }
}

/// Owns the per-family write locks and routes intents to the right session
pub struct CommandCoordinator<H, P> {
    hue: Arc<H>,
    nanoleaf: Arc<P>,
    hue_lock: Mutex<()>,
    nanoleaf_lock: Mutex<()>,
    bus: SharedBus,
}

impl<H, P> CommandCoordinator<H, P>
where
    H: DeviceSession<Command = HubCommand>,
    P: DeviceSession<Command = PanelCommand>,
{
    pub fn new(hue: Arc<H>, nanoleaf: Arc<P>, bus: SharedBus) -> Self {
        Self {
            hue,
            nanoleaf,
            hue_lock: Mutex::new(()),
            nanoleaf_lock: Mutex::new(()),
            bus,
        }
    }

    pub fn hue(&self) -> &H {
        &self.hue
    }

    pub fn nanoleaf(&self) -> &P {
        &self.nanoleaf
    }

    pub async fn connect(
        &self,
        family: DeviceFamily,
        address: DeviceAddress,
    ) -> Result<(), LightError> {
        let result = match family {
            DeviceFamily::Hue => {
                let _guard = self.hue_lock.lock().await;
                self.hue.connect(address).await
            }
            DeviceFamily::Nanoleaf => {
                let _guard = self.nanoleaf_lock.lock().await;
                self.nanoleaf.connect(address).await
            }
        };

        match &result {
            Ok(()) => self.bus.publish(BusEvent::LightsConnected {
                family,
                address: address.to_string(),
            }),
            Err(e) => warn!("Failed to connect {} at {}: {}", family, address, e),
        }
        result
    }

    /// Connect both families concurrently; one failing does not stop the other
    pub async fn connect_all(
        &self,
        hue_address: DeviceAddress,
        nanoleaf_address: DeviceAddress,
    ) -> ConnectReport {
        let (hue, nanoleaf) = tokio::join!(
            self.connect(DeviceFamily::Hue, hue_address),
            self.connect(DeviceFamily::Nanoleaf, nanoleaf_address),
        );
        ConnectReport { hue, nanoleaf }
    }

    pub async fn apply_light_intent(
        &self,
        family: DeviceFamily,
        intent: LightIntent,
    ) -> Result<Ack, LightError> {
        let result = match family {
            DeviceFamily::Hue => {
                let _guard = self.hue_lock.lock().await;
                apply_hub_intent(self.hue.as_ref(), &intent).await
            }
            DeviceFamily::Nanoleaf => {
                let _guard = self.nanoleaf_lock.lock().await;
                apply_panel_intent(self.nanoleaf.as_ref(), &intent).await
            }
        };

        match &result {
            Ok(ack) => self.bus.publish(BusEvent::LightCommandApplied {
                family,
                targets: ack.targets.clone(),
            }),
            Err(e) => self.bus.publish(BusEvent::LightCommandFailed {
                family,
                error: e.to_string(),
            }),
        }
        result
    }
}
