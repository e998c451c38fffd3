//! Philips Hue bridge session
//!
//! Speaks the bridge's v1 REST API over plain HTTP.
//! Documentation: https://developers.meethue.com/develop/hue-api/
//!
//! The bridge hands out a username only while its link button is pressed, so
//! `connect` can succeed without command authority. Registration is retried
//! on the next state read; until it succeeds every command fails with
//! `DeviceAuthError`.

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::adapters::traits::{DeviceAddress, DeviceFamily, DeviceSession, DeviceState};
use crate::color::HubColorCommand;
use crate::config::HueConfig;
use crate::error::LightError;

/// Bridge error type for a missing or revoked username
const ERROR_UNAUTHORIZED_USER: u64 = 1;
/// Bridge error type for registration without a link button press
const ERROR_LINK_BUTTON_NOT_PRESSED: u64 = 101;

const FAMILY: DeviceFamily = DeviceFamily::Hue;

/// Light state write: `{"hue", "sat", "bri"}` plus `"on"` only when power changes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HubCommand {
    #[serde(flatten)]
    pub color: HubColorCommand,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on: Option<bool>,
}

struct HueConnection {
    address: DeviceAddress,
    base_url: String,
    username: Option<String>,
}

pub struct HueSession {
    connection: RwLock<Option<HueConnection>>,
    http: Client,
    port: u16,
    group: String,
    device_type: String,
    configured_username: Option<String>,
}

impl HueSession {
    pub fn new(config: &HueConfig, timeout: Duration) -> Self {
        Self {
            connection: RwLock::new(None),
            http: Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            port: config.port,
            group: config.group.clone(),
            device_type: config.device_type.clone(),
            configured_username: config.username.clone(),
        }
    }

    /// Whether the held connection carries a bridge username
    pub async fn is_authorized(&self) -> bool {
        self.connection
            .read()
            .await
            .as_ref()
            .is_some_and(|c| c.username.is_some())
    }

    /// Ask the bridge for a username. `Ok(None)` means the link button was not pressed.
    async fn register(&self, base_url: &str) -> Result<Option<String>, LightError> {
        let payload = self
            .http
            .post(format!("{}/api", base_url))
            .json(&json!({ "devicetype": self.device_type }))
            .send()
            .await
            .map_err(|e| LightError::unreachable(FAMILY, e))?
            .json::<Value>()
            .await
            .map_err(|e| LightError::unreachable(FAMILY, e))?;

        debug!(response = %payload, "Hue registration response");

        let entries = payload.as_array().cloned().unwrap_or_default();
        for entry in &entries {
            if let Some(username) = entry
                .pointer("/success/username")
                .and_then(|v| v.as_str())
            {
                info!("Hue bridge granted a username");
                return Ok(Some(username.to_string()));
            }
            if error_type(entry) == Some(ERROR_LINK_BUTTON_NOT_PRESSED) {
                warn!("Hue bridge link button not pressed; commands will fail until it is");
                return Ok(None);
            }
        }

        Err(LightError::DeviceReportedError {
            family: FAMILY,
            payload,
        })
    }

    /// Base URL and username, registering first if the bridge has not granted one yet
    async fn authorized(&self) -> Result<(String, String), LightError> {
        let (address, base_url, username) = {
            let conn = self.connection.read().await;
            let conn = conn.as_ref().ok_or(LightError::NotConnected(FAMILY))?;
            (conn.address, conn.base_url.clone(), conn.username.clone())
        };

        if let Some(username) = username {
            return Ok((base_url, username));
        }

        let username = self
            .register(&base_url)
            .await?
            .ok_or(LightError::DeviceAuthError(FAMILY))?;

        {
            let mut conn = self.connection.write().await;
            // Only keep the username if no reconnect raced us to another bridge
            if let Some(conn) = conn.as_mut().filter(|c| c.address == address) {
                conn.username = Some(username.clone());
            }
        }

        Ok((base_url, username))
    }

    async fn get_json(&self, url: &str) -> Result<Value, LightError> {
        let value = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| LightError::unreachable(FAMILY, e))?
            .json::<Value>()
            .await
            .map_err(|e| LightError::unreachable(FAMILY, e))?;
        check_bridge_errors(&value)?;
        Ok(value)
    }
}

/// Light ids in ascending numeric order (`"2"` before `"10"`)
fn write_order(ids: &BTreeSet<String>) -> Vec<&String> {
    let mut ordered: Vec<&String> = ids.iter().collect();
    ordered.sort_by_key(|id| (id.parse::<u64>().ok(), *id));
    ordered
}

/// `type` of an `{"error": {...}}` entry
fn error_type(entry: &Value) -> Option<u64> {
    entry.get("error")?.get("type")?.as_u64()
}

/// The bridge reports faults inline as `[{"error": {...}}]`, with HTTP 200
fn check_bridge_errors(payload: &Value) -> Result<(), LightError> {
    let errors: Vec<&Value> = match payload {
        Value::Array(entries) => entries.iter().filter(|e| e.get("error").is_some()).collect(),
        Value::Object(map) if map.contains_key("error") => vec![payload],
        _ => Vec::new(),
    };

    if errors.is_empty() {
        return Ok(());
    }
    if errors
        .iter()
        .any(|e| error_type(e) == Some(ERROR_UNAUTHORIZED_USER))
    {
        return Err(LightError::DeviceAuthError(FAMILY));
    }
    Err(LightError::DeviceReportedError {
        family: FAMILY,
        payload: payload.clone(),
    })
}

#[async_trait]
impl DeviceSession for HueSession {
    type Command = HubCommand;

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

        // Unauthenticated endpoint, proves this is a reachable bridge
        let response = self
            .http
            .get(format!("{}/api/config", base_url))
            .send()
            .await
            .map_err(|e| LightError::unreachable(FAMILY, e))?;
        if !response.status().is_success() {
            return Err(LightError::unreachable(
                FAMILY,
                format!("unexpected status {}", response.status()),
            ));
        }

        // Keep a previously granted username when reconnecting to the same bridge
        let previous = self
            .connection
            .read()
            .await
            .as_ref()
            .filter(|c| c.address == address)
            .and_then(|c| c.username.clone());

        let username = match previous.or_else(|| self.configured_username.clone()) {
            Some(username) => Some(username),
            None => match self.register(&base_url).await {
                Ok(username) => username,
                Err(e) => {
                    warn!("Hue registration failed, will retry on first command: {}", e);
                    None
                }
            },
        };

        info!(
            "Hue bridge connected at {} (authorized: {})",
            address,
            username.is_some()
        );

        *self.connection.write().await = Some(HueConnection {
            address,
            base_url,
            username,
        });
        Ok(())
    }

    async fn current_state(&self) -> Result<DeviceState, LightError> {
        let (base_url, username) = self.authorized().await?;
        let full = self
            .get_json(&format!("{}/api/{}", base_url, username))
            .await?;

        let group = full
            .get("groups")
            .and_then(|g| g.as_object())
            .and_then(|groups| {
                groups
                    .values()
                    .find(|g| g.get("name").and_then(|n| n.as_str()) == Some(self.group.as_str()))
            })
            .ok_or_else(|| LightError::GroupNotFound(self.group.clone()))?;

        let members = group
            .get("lights")
            .and_then(|l| l.as_array())
            .map(|lights| {
                lights
                    .iter()
                    .filter_map(|id| id.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        let is_any_on = group
            .pointer("/state/any_on")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        let addressable = full
            .get("lights")
            .and_then(|l| l.as_object())
            .map(|lights| lights.keys().cloned().collect())
            .unwrap_or_default();

        Ok(DeviceState {
            is_any_on,
            members,
            addressable,
        })
    }

    async fn apply_state(
        &self,
        ids: &BTreeSet<String>,
        command: &HubCommand,
    ) -> Result<(), LightError> {
        let (base_url, username) = self.authorized().await?;

        for id in write_order(ids) {
            let url = format!("{}/api/{}/lights/{}/state", base_url, username, id);
            debug!(light = %id, ?command, "Hue light state write");

            let response = self
                .http
                .put(&url)
                .json(command)
                .send()
                .await
                .map_err(|e| LightError::unreachable(FAMILY, e))?
                .json::<Value>()
                .await
                .map_err(|e| LightError::unreachable(FAMILY, e))?;
            check_bridge_errors(&response)?;
        }

        Ok(())
    }

    async fn read_back(&self) -> Result<Value, LightError> {
        let (base_url, username) = self.authorized().await?;
        self.get_json(&format!("{}/api/{}/lights", base_url, username))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_omits_power_when_unchanged() {
        let cmd = HubCommand {
            color: HubColorCommand {
                hue: 100,
                sat: 200,
                bri: 254,
            },
            on: None,
        };
        assert_eq!(
            serde_json::to_value(cmd).unwrap(),
            json!({"hue": 100, "sat": 200, "bri": 254})
        );

        let cmd = HubCommand { on: Some(true), ..cmd };
        assert_eq!(
            serde_json::to_value(cmd).unwrap(),
            json!({"hue": 100, "sat": 200, "bri": 254, "on": true})
        );
    }

    #[test]
    fn unauthorized_user_is_an_auth_error() {
        let payload = json!([{"error": {"type": 1, "address": "/", "description": "unauthorized user"}}]);
        assert!(matches!(
            check_bridge_errors(&payload),
            Err(LightError::DeviceAuthError(DeviceFamily::Hue))
        ));
    }

    #[test]
    fn other_inline_errors_keep_the_payload() {
        let payload = json!([
            {"success": {"/lights/1/state/hue": 100}},
            {"error": {"type": 201, "description": "parameter, bri, is not modifiable. Device is set to off."}}
        ]);
        match check_bridge_errors(&payload) {
            Err(LightError::DeviceReportedError { payload: p, .. }) => assert_eq!(p, payload),
            other => panic!("expected DeviceReportedError, got {:?}", other),
        }
    }

    #[test]
    fn success_payloads_pass() {
        assert!(check_bridge_errors(&json!([{"success": {"/lights/1/state/on": true}}])).is_ok());
        assert!(check_bridge_errors(&json!({"lights": {}, "groups": {}})).is_ok());
    }

    #[test]
    fn lights_are_written_in_numeric_order() {
        let ids: BTreeSet<String> = ["10", "2", "1", "21"].iter().map(|s| s.to_string()).collect();
        let ordered: Vec<&str> = write_order(&ids).into_iter().map(String::as_str).collect();
        assert_eq!(ordered, vec!["1", "2", "10", "21"]);
    }

    #[tokio::test]
    async fn unconnected_session_refuses_commands() {
        let session = HueSession::new(&HueConfig::default(), Duration::from_millis(100));
        assert!(!session.is_connected().await);
        assert!(matches!(
            session.current_state().await,
            Err(LightError::NotConnected(DeviceFamily::Hue))
        ));
    }
}
