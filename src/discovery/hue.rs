//! Hue bridge discovery: SSDP on the LAN, optionally merged with the
//! vendor's N-UPnP cloud lookup (bridges report their LAN address there).

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use quick_xml::de::from_str as xml_from_str;
use reqwest::Client;
use serde::Deserialize;
use ssdp_client::{SearchTarget, URN};
use tracing::{debug, info, warn};
use url::{Host, Url};

use super::{Discovered, Scanner};
use crate::adapters::{DeviceAddress, DeviceFamily};
use crate::config::DiscoveryConfig;

/// Hue bridges advertise themselves as a plain basic device
const BASIC_DEVICE_URN: &str = "urn:schemas-upnp-org:device:basic:1";

pub struct HueScanner {
    http: Client,
    timeout: Duration,
    cloud_fallback: bool,
    cloud_url: String,
}

impl HueScanner {
    pub fn new(config: &DiscoveryConfig) -> Self {
        Self {
            http: Client::builder()
                .timeout(config.timeout())
                .build()
                .unwrap_or_default(),
            timeout: config.timeout(),
            cloud_fallback: config.hue_cloud_fallback,
            cloud_url: config.hue_cloud_url.clone(),
        }
    }

    async fn ssdp_scan(&self) -> anyhow::Result<Vec<Discovered>> {
        let urn: URN = BASIC_DEVICE_URN.parse()?;
        let search_target = SearchTarget::URN(urn);
        let responses = ssdp_client::search(&search_target, self.timeout, 2, None).await?;

        futures::pin_mut!(responses);

        let mut locations = BTreeSet::new();
        while let Some(response) = responses.next().await {
            match response {
                Ok(r) => {
                    locations.insert(r.location().to_string());
                }
                Err(e) => debug!("SSDP response error: {}", e),
            }
        }

        let mut bridges = Vec::new();
        for location in locations {
            match self.describe(&location).await {
                Ok(Some(bridge)) => {
                    info!("Discovered Hue bridge {} at {}", bridge.id, bridge.ip);
                    bridges.push(bridge);
                }
                Ok(None) => debug!("SSDP responder at {} is not a Hue bridge", location),
                Err(e) => debug!("Failed to read description at {}: {:#}", location, e),
            }
        }
        Ok(bridges)
    }

    async fn describe(&self, location: &str) -> anyhow::Result<Option<Discovered>> {
        let xml = self.http.get(location).send().await?.text().await?;
        parse_description(&xml, location)
    }

    async fn cloud_scan(&self) -> anyhow::Result<Vec<Discovered>> {
        let entries: Vec<CloudEntry> = self
            .http
            .get(&self.cloud_url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(from_cloud_entries(entries))
    }
}

#[async_trait]
impl Scanner for HueScanner {
    fn family(&self) -> DeviceFamily {
        DeviceFamily::Hue
    }

    /// Fails only if every lookup method failed
    async fn scan(&self) -> anyhow::Result<Vec<Discovered>> {
        let ssdp = self.ssdp_scan();
        let cloud = async {
            if self.cloud_fallback {
                Some(self.cloud_scan().await)
            } else {
                None
            }
        };
        let (ssdp, cloud) = tokio::join!(ssdp, cloud);

        let mut found: BTreeMap<String, Discovered> = BTreeMap::new();
        let mut last_error = None;
        let mut any_succeeded = false;

        for outcome in std::iter::once(ssdp).chain(cloud) {
            match outcome {
                Ok(bridges) => {
                    any_succeeded = true;
                    for bridge in bridges {
                        found.entry(bridge.id.clone()).or_insert(bridge);
                    }
                }
                Err(e) => {
                    warn!("Hue lookup failed: {:#}", e);
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if !any_succeeded => Err(e),
            _ => Ok(found.into_values().collect()),
        }
    }
}

#[derive(Deserialize)]
struct DescriptionRoot {
    device: DeviceDescription,
}

#[derive(Deserialize)]
struct DeviceDescription {
    manufacturer: Option<String>,
    #[serde(rename = "modelName")]
    model_name: Option<String>,
    #[serde(rename = "serialNumber")]
    serial_number: Option<String>,
}

/// Bridge from a UPnP description document, `None` for any other device
fn parse_description(xml: &str, location: &str) -> anyhow::Result<Option<Discovered>> {
    let root: DescriptionRoot = xml_from_str(xml)?;
    let device = root.device;

    let model = device.model_name.unwrap_or_default().to_lowercase();
    let manufacturer = device.manufacturer.unwrap_or_default().to_lowercase();
    let is_bridge = model.contains("hue bridge")
        || manufacturer.contains("philips")
        || manufacturer.contains("signify");
    if !is_bridge {
        return Ok(None);
    }

    let Some(serial) = device.serial_number else {
        return Ok(None);
    };

    let url = Url::parse(location)?;
    let ip = match url.host() {
        Some(Host::Ipv4(v4)) => DeviceAddress::from(std::net::IpAddr::V4(v4)),
        Some(Host::Ipv6(v6)) => DeviceAddress::from(std::net::IpAddr::V6(v6)),
        _ => return Ok(None),
    };

    Ok(Some(Discovered {
        id: serial.to_lowercase(),
        ip,
    }))
}

#[derive(Debug, Deserialize)]
struct CloudEntry {
    id: String,
    internalipaddress: String,
}

fn from_cloud_entries(entries: Vec<CloudEntry>) -> Vec<Discovered> {
    entries
        .into_iter()
        .filter_map(|entry| match DeviceAddress::parse(&entry.internalipaddress) {
            Ok(ip) => Some(Discovered {
                id: entry.id.to_lowercase(),
                ip,
            }),
            Err(_) => {
                debug!(
                    "Dropping cloud entry {} with address {:?}",
                    entry.id, entry.internalipaddress
                );
                None
            }
        })
        .collect()
}
