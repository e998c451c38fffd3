//! Nanoleaf panel discovery over mDNS (`_nanoleafapi._tcp`)

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use mdns_sd::{ResolvedService, ServiceDaemon, ServiceEvent};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::{Discovered, Scanner};
use crate::adapters::{DeviceAddress, DeviceFamily};
use crate::config::DiscoveryConfig;

/// Trailing dot is required by mdns-sd
const NANOLEAF_SERVICE_TYPE: &str = "_nanoleafapi._tcp.local.";

pub struct NanoleafScanner {
    browse_timeout: Duration,
}

impl NanoleafScanner {
    pub fn new(config: &DiscoveryConfig) -> Self {
        Self {
            browse_timeout: config.timeout(),
        }
    }
}

#[async_trait]
impl Scanner for NanoleafScanner {
    fn family(&self) -> DeviceFamily {
        DeviceFamily::Nanoleaf
    }

    async fn scan(&self) -> anyhow::Result<Vec<Discovered>> {
        let daemon = ServiceDaemon::new()?;
        let receiver = daemon.browse(NANOLEAF_SERVICE_TYPE)?;

        let mut found: BTreeMap<String, Discovered> = BTreeMap::new();
        let start = Instant::now();
        while start.elapsed() < self.browse_timeout {
            let remaining = self.browse_timeout.saturating_sub(start.elapsed());

            match timeout(remaining, receiver.recv_async()).await {
                Ok(Ok(ServiceEvent::ServiceResolved(info))) => {
                    if let Some(panel) = panel_from_service(&info) {
                        info!("Discovered Nanoleaf {} at {}", panel.id, panel.ip);
                        found.insert(panel.id.clone(), panel);
                    }
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    debug!("mDNS receiver closed: {:?}", e);
                    break;
                }
                // Browse window elapsed
                Err(_) => break,
            }
        }

        if let Err(e) = daemon.stop_browse(NANOLEAF_SERVICE_TYPE) {
            warn!("Failed to stop mDNS browse: {:?}", e);
        }
        if let Err(e) = daemon.shutdown() {
            debug!("mDNS daemon shutdown: {:?}", e);
        }

        Ok(found.into_values().collect())
    }
}

fn panel_from_service(info: &ResolvedService) -> Option<Discovered> {
    let ip = pick_address(info.addresses.iter().map(|addr| addr.to_ip_addr()))?;
    let id = info
        .txt_properties
        .get_property_val_str("id")
        .map(str::to_string)
        .unwrap_or_else(|| instance_name(&info.fullname).to_string());

    Some(Discovered {
        id,
        ip: DeviceAddress::from(ip),
    })
}

/// IPv4 first; panels answer on link-local IPv6 too, which is rarely routable
fn pick_address(addresses: impl IntoIterator<Item = IpAddr>) -> Option<IpAddr> {
    let mut fallback = None;
    for ip in addresses {
        if ip.is_ipv4() {
            return Some(ip);
        }
        fallback.get_or_insert(ip);
    }
    fallback
}

/// `Shapes 4A2B._nanoleafapi._tcp.local.` -> `Shapes 4A2B`
fn instance_name(fullname: &str) -> &str {
    fullname
        .strip_suffix(NANOLEAF_SERVICE_TYPE)
        .map(|name| name.trim_end_matches('.'))
        .unwrap_or(fullname)
}
