//! Nanoleaf panel session (OpenAPI v1 on port 16021)
//!
//! The panel is addressed as a single unit. An auth token is only issued while
//! the power button is held (pairing mode), which, as with the Hue bridge,
//! means a connected session may still lack command authority.

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::adapters::traits::{DeviceAddress, DeviceFamily, DeviceSession, DeviceState};
use crate::color::PanelColorCommand;
use crate::config::NanoleafConfig;
use crate::error::LightError;

/// Member id reported for the single addressable panel unit
pub const PANEL_UNIT: &str = "panel";

const FAMILY: DeviceFamily = DeviceFamily::Nanoleaf;

/// Power and color are exclusive actions on the panel: setting a color turns it on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanelCommand {
    SetColor(PanelColorCommand),
    PowerOff,
}

impl PanelCommand {
    /// JSON body for `PUT /api/v1/{token}/state`
    pub fn wire_body(&self) -> Value {
        match self {
            PanelCommand::SetColor(color) => {
                let (hue, sat, brightness) = color.wire_hsb();
                json!({
                    "hue": { "value": hue },
                    "sat": { "value": sat },
                    "brightness": { "value": brightness },
                })
            }
            PanelCommand::PowerOff => json!({ "on": { "value": false } }),
        }
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    auth_token: String,
}

#[derive(Deserialize)]
struct ValueResponse<T> {
    value: T,
}

struct NanoleafConnection {
    address: DeviceAddress,
    base_url: String,
    token: Option<String>,
}

pub struct NanoleafSession {
    connection: RwLock<Option<NanoleafConnection>>,
    http: Client,
    port: u16,
    configured_token: Option<String>,
}

impl NanoleafSession {
    pub fn new(config: &NanoleafConfig, timeout: Duration) -> Self {
        Self {
            connection: RwLock::new(None),
            http: Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            port: config.port,
            configured_token: config.auth_token.clone(),
        }
    }

    pub async fn is_authorized(&self) -> bool {
        self.connection
            .read()
            .await
            .as_ref()
            .is_some_and(|c| c.token.is_some())
    }

    /// `Ok(None)` when the panel is not in pairing mode
    async fn request_token(&self, base_url: &str) -> Result<Option<String>, LightError> {
        let response = self
            .http
            .post(format!("{}/api/v1/new", base_url))
            .send()
            .await
            .map_err(|e| LightError::unreachable(FAMILY, e))?;

        match response.status() {
            StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED => {
                warn!("Nanoleaf not in pairing mode (hold the power button 5-7 seconds)");
                Ok(None)
            }
            status if status.is_success() => {
                let body: TokenResponse = response
                    .json()
                    .await
                    .map_err(|e| LightError::unreachable(FAMILY, e))?;
                info!("Nanoleaf issued an auth token");
                Ok(Some(body.auth_token))
            }
            _ => Err(reported(response).await),
        }
    }

    async fn authorized(&self) -> Result<(String, String), LightError> {
        let (address, base_url, token) = {
            let conn = self.connection.read().await;
            let conn = conn.as_ref().ok_or(LightError::NotConnected(FAMILY))?;
            (conn.address, conn.base_url.clone(), conn.token.clone())
        };

        if let Some(token) = token {
            return Ok((base_url, token));
        }

        let token = self
            .request_token(&base_url)
            .await?
            .ok_or(LightError::DeviceAuthError(FAMILY))?;

        {
            let mut conn = self.connection.write().await;
            if let Some(conn) = conn.as_mut().filter(|c| c.address == address) {
                conn.token = Some(token.clone());
            }
        }

        Ok((base_url, token))
    }

    async fn get(&self, url: &str) -> Result<Response, LightError> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| LightError::unreachable(FAMILY, e))?;
        check_status(response).await
    }
}

/// Non-success status as a device-reported fault, keeping status and body
async fn reported(response: Response) -> LightError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    LightError::DeviceReportedError {
        family: FAMILY,
        payload: json!({ "status": status, "body": body }),
    }
}

async fn check_status(response: Response) -> Result<Response, LightError> {
    match response.status() {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Err(LightError::DeviceAuthError(FAMILY))
        }
        status if status.is_success() => Ok(response),
        _ => Err(reported(response).await),
    }
}

#[async_trait]
impl DeviceSession for NanoleafSession {
    type Command = PanelCommand;

    fn family(&self) -> DeviceFamily {
        FAMILY
    }

    async fn is_connected(&self) -> bool {
        self.connection.read().await.is_some()
    }

    async fn address(&self) -> Option<DeviceAddress> {
        self.connection.read().await.as_ref().map(|c| c.address)
    }

    async fn connect(&self, address: DeviceAddress) -> Result<(), LightError> {
        let base_url = address.http_base(self.port);

        let previous = self
            .connection
            .read()
            .await
            .as_ref()
            .filter(|c| c.address == address)
            .and_then(|c| c.token.clone());

        let token = match previous.or_else(|| self.configured_token.clone()) {
            Some(token) => {
                // No token request to prove reachability; check the API root instead
                self.http
                    .get(format!("{}/api/v1/", base_url))
                    .send()
                    .await
                    .map_err(|e| LightError::unreachable(FAMILY, e))?;
                Some(token)
            }
            None => self.request_token(&base_url).await?,
        };

        info!(
            "Nanoleaf connected at {} (authorized: {})",
            address,
            token.is_some()
        );

        *self.connection.write().await = Some(NanoleafConnection {
            address,
            base_url,
            token,
        });
        Ok(())
    }

    async fn current_state(&self) -> Result<DeviceState, LightError> {
        let (base_url, token) = self.authorized().await?;
        let power: ValueResponse<bool> = self
            .get(&format!("{}/api/v1/{}/state/on", base_url, token))
            .await?
            .json()
            .await
            .map_err(|e| LightError::unreachable(FAMILY, e))?;

        let unit = BTreeSet::from([PANEL_UNIT.to_string()]);
        Ok(DeviceState {
            is_any_on: power.value,
            members: unit.clone(),
            addressable: unit,
        })
    }

    async fn apply_state(
        &self,
        _ids: &BTreeSet<String>,
        command: &PanelCommand,
    ) -> Result<(), LightError> {
        let (base_url, token) = self.authorized().await?;
        let body = command.wire_body();
        debug!(%body, "Nanoleaf state write");

        let response = self
            .http
            .put(format!("{}/api/v1/{}/state", base_url, token))
            .json(&body)
            .send()
            .await
            .map_err(|e| LightError::unreachable(FAMILY, e))?;
        check_status(response).await?;
        Ok(())
    }

    async fn read_back(&self) -> Result<Value, LightError> {
        let (base_url, token) = self.authorized().await?;
        self.get(&format!("{}/api/v1/{}/state", base_url, token))
            .await?
            .json()
            .await
            .map_err(|e| LightError::unreachable(FAMILY, e))
    }
}
