//! Device discovery on the local network
//!
//! Two independent scans (SSDP/cloud for Hue bridges, mDNS for Nanoleaf
//! panels) run concurrently and are merged into one `DiscoveryResult`.
//! A failed scan leaves its family empty and is recorded in `failures`;
//! it never fails the whole discovery.

pub mod hue;
pub mod nanoleaf;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, warn};

use crate::adapters::{DeviceAddress, DeviceFamily};
use crate::bus::{BusEvent, SharedBus};
use crate::config::DiscoveryConfig;

pub use hue::HueScanner;
pub use nanoleaf::NanoleafScanner;

/// One device found by a scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Discovered {
    pub id: String,
    pub ip: DeviceAddress,
}

/// A scan that failed outright
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanFailure {
    pub family: DeviceFamily,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiscoveryResult {
    /// Hue bridges by bridge id
    #[serde(rename = "phillips")]
    pub hubs: BTreeMap<String, DeviceAddress>,
    #[serde(rename = "nanoleaf")]
    pub panels: Vec<Discovered>,
    /// Only present when a scan failed, so an empty family can be told apart from a broken scan
    #[serde(rename = "errors", skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<ScanFailure>,
}

/// One discovery mechanism for one device family
#[async_trait]
pub trait Scanner: Send + Sync {
    fn family(&self) -> DeviceFamily;

    async fn scan(&self) -> anyhow::Result<Vec<Discovered>>;
}

pub struct DiscoveryGateway {
    hue: Box<dyn Scanner>,
    nanoleaf: Box<dyn Scanner>,
    bus: SharedBus,
}

impl DiscoveryGateway {
    pub fn new(hue: Box<dyn Scanner>, nanoleaf: Box<dyn Scanner>, bus: SharedBus) -> Self {
        Self { hue, nanoleaf, bus }
    }

    /// Gateway backed by the real network scanners
    pub fn from_config(config: &DiscoveryConfig, bus: SharedBus) -> Self {
        Self::new(
            Box::new(HueScanner::new(config)),
            Box::new(NanoleafScanner::new(config)),
            bus,
        )
    }

    pub async fn discover(&self) -> DiscoveryResult {
        let (hue, nanoleaf) = tokio::join!(self.hue.scan(), self.nanoleaf.scan());

        let mut result = DiscoveryResult::default();

        match hue {
            Ok(bridges) => {
                for bridge in bridges {
                    result.hubs.insert(bridge.id, bridge.ip);
                }
            }
            Err(e) => result.failures.push(failed(self.hue.family(), e)),
        }

        match nanoleaf {
            Ok(panels) => {
                // Same panel may answer on several interfaces
                let unique: BTreeMap<String, Discovered> =
                    panels.into_iter().map(|p| (p.id.clone(), p)).collect();
                result.panels = unique.into_values().collect();
            }
            Err(e) => result.failures.push(failed(self.nanoleaf.family(), e)),
        }

        info!(
            "Discovery complete: {} bridge(s), {} panel(s), {} failed scan(s)",
            result.hubs.len(),
            result.panels.len(),
            result.failures.len()
        );
        self.bus.publish(BusEvent::DiscoveryCompleted {
            hue: result.hubs.len(),
            nanoleaf: result.panels.len(),
        });

        result
    }
}

fn failed(family: DeviceFamily, error: anyhow::Error) -> ScanFailure {
    warn!("{} discovery failed: {:#}", family, error);
    ScanFailure {
        family,
        error: format!("{:#}", error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::create_bus;
    use serde_json::json;

    struct FixedScanner {
        family: DeviceFamily,
        found: Vec<(&'static str, &'static str)>,
        fail: bool,
    }

    #[async_trait]
    impl Scanner for FixedScanner {
        fn family(&self) -> DeviceFamily {
            self.family
        }

        async fn scan(&self) -> anyhow::Result<Vec<Discovered>> {
            if self.fail {
                anyhow::bail!("multicast socket unavailable");
            }
            Ok(self
                .found
                .iter()
                .map(|(id, ip)| Discovered {
                    id: id.to_string(),
                    ip: DeviceAddress::parse(ip).unwrap(),
                })
                .collect())
        }
    }

    fn scanner(family: DeviceFamily, found: Vec<(&'static str, &'static str)>, fail: bool) -> Box<dyn Scanner> {
        Box::new(FixedScanner { family, found, fail })
    }

    #[tokio::test]
    async fn failed_hub_scan_keeps_panel_results() {
        let gateway = DiscoveryGateway::new(
            scanner(DeviceFamily::Hue, vec![], true),
            scanner(DeviceFamily::Nanoleaf, vec![("aa:bb", "192.168.1.30")], false),
            create_bus(),
        );

        let result = gateway.discover().await;

        assert!(result.hubs.is_empty());
        assert_eq!(result.panels.len(), 1);
        assert_eq!(result.panels[0].id, "aa:bb");
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].family, DeviceFamily::Hue);
    }

    #[tokio::test]
    async fn duplicate_panels_are_merged() {
        let gateway = DiscoveryGateway::new(
            scanner(DeviceFamily::Hue, vec![("001788fffe", "192.168.1.2")], false),
            scanner(
                DeviceFamily::Nanoleaf,
                vec![("p1", "192.168.1.30"), ("p1", "192.168.1.30")],
                false,
            ),
            create_bus(),
        );

        let result = gateway.discover().await;
        assert_eq!(result.panels.len(), 1);
        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            json!({
                "phillips": {"001788fffe": "192.168.1.2"},
                "nanoleaf": [{"id": "p1", "ip": "192.168.1.30"}],
            })
        );
    }

    #[tokio::test]
    async fn failures_are_serialized_as_errors() {
        let bus = create_bus();
        let mut rx = bus.subscribe();
        let gateway = DiscoveryGateway::new(
            scanner(DeviceFamily::Hue, vec![], true),
            scanner(DeviceFamily::Nanoleaf, vec![], true),
            bus,
        );

        let json = serde_json::to_value(gateway.discover().await).unwrap();
        assert_eq!(json["phillips"], json!({}));
        assert_eq!(json["nanoleaf"], json!([]));
        assert_eq!(json["errors"][0]["family"], "hue");
        assert_eq!(json["errors"][1]["family"], "nanoleaf");

        assert!(matches!(
            rx.recv().await.unwrap(),
            BusEvent::DiscoveryCompleted { hue: 0, nanoleaf: 0 }
        ));
    }
}
