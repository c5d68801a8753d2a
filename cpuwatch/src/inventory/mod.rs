//! Host metadata from the inventories (owner, instance type, zone).
//!
//! Sources are applied in a fixed order, EC2 exports first then the HTTP
//! inventory. The first value seen for a field wins; later sources only fill
//! what is still missing. A source that fails to load is skipped.

pub mod ec2;
pub mod http;

use std::collections::HashMap;
use tracing::{info, warn};

use cpuwatch_core::{Metadata, MetadataLookup};

use crate::config::InventoryConfig;

/// Characters after the 3-char prefix that encode the zone (`TA-apne1-...`).
const HOSTNAME_ZONE_LEN: usize = 5;

#[derive(Debug, Clone, Default)]
pub struct Inventory {
    hosts: HashMap<String, Metadata>,
    /// Prefixes whose hostnames carry a zone code
    zone_prefixes: Vec<String>,
}

impl Inventory {
    pub fn new(zone_prefixes: Vec<String>) -> Self {
        Self {
            hosts: HashMap::new(),
            zone_prefixes,
        }
    }

    /// Load every configured source
    pub async fn load(config: &InventoryConfig, zone_prefixes: Vec<String>) -> Self {
        let mut inventory = Self::new(zone_prefixes);

        for path in &config.ec2_exports {
            match ec2::load_export(path, &config.owner_tag).await {
                Ok(entries) => {
                    info!("Loaded {} EC2 instances from {}", entries.len(), path.display());
                    inventory.extend(entries);
                }
                Err(e) => warn!("Skipping EC2 export {}: {:#}", path.display(), e),
            }
        }

        if let Some(url) = &config.http_url {
            match http::fetch_inventory(url, config.http_timeout).await {
                Ok(entries) => {
                    info!("Loaded {} hosts from inventory {}", entries.len(), url);
                    inventory.extend(entries);
                }
                Err(e) => warn!("Skipping HTTP inventory {}: {:#}", url, e),
            }
        }

        inventory
    }

    /// Merge one record, keeping values already known
    pub fn insert(&mut self, name: &str, metadata: Metadata) {
        self.hosts.entry(name.to_string()).or_default().merge(metadata);
    }

    pub fn extend(&mut self, entries: impl IntoIterator<Item = (String, Metadata)>) {
        for (name, metadata) in entries {
            self.insert(&name, metadata);
        }
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    fn zone_from_hostname(&self, host: &str) -> Option<String> {
        let upper = host.to_uppercase();
        let prefix = self
            .zone_prefixes
            .iter()
            .find(|p| upper.starts_with(&p.to_uppercase()))?;
        let zone: String = host.chars().skip(prefix.chars().count()).take(HOSTNAME_ZONE_LEN).collect();
        (!zone.is_empty()).then_some(zone)
    }
}

impl MetadataLookup for Inventory {
    fn get(&self, host: &str) -> Option<Metadata> {
        let mut metadata = self.hosts.get(host).cloned();
        if metadata.as_ref().map_or(true, |m| m.availability_zone.is_none()) {
            if let Some(zone) = self.zone_from_hostname(host) {
                metadata.get_or_insert_with(Metadata::default).availability_zone = Some(zone);
            }
        }
        metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(owner: Option<&str>, instance_type: Option<&str>, zone: Option<&str>) -> Metadata {
        Metadata {
            owner: owner.map(str::to_string),
            instance_type: instance_type.map(str::to_string),
            availability_zone: zone.map(str::to_string),
        }
    }

    #[test]
    fn test_first_source_wins() {
        let mut inventory = Inventory::new(vec![]);
        inventory.insert("h1", meta(Some("alice"), None, Some("us-east-1a")));
        inventory.insert("h1", meta(Some("bob"), Some("c6i.large"), Some("us-east-1b")));

        let m = inventory.get("h1").unwrap();
        assert_eq!(m.owner.as_deref(), Some("alice"));
        assert_eq!(m.instance_type.as_deref(), Some("c6i.large"));
        assert_eq!(m.availability_zone.as_deref(), Some("us-east-1a"));
        assert_eq!(inventory.len(), 1);
    }

    #[test]
    fn test_zone_fallback_from_hostname() {
        let mut inventory = Inventory::new(vec!["TA-".into(), "AC-".into()]);
        inventory.insert("TA-apne1-mm01", meta(Some("alice"), None, None));

        let m = inventory.get("TA-apne1-mm01").unwrap();
        assert_eq!(m.availability_zone.as_deref(), Some("apne1"));
        assert_eq!(m.owner.as_deref(), Some("alice"));

        // unknown host still gets a zone
        let m = inventory.get("ac-cnhk1-x").unwrap();
        assert_eq!(m.availability_zone.as_deref(), Some("cnhk1"));
        assert!(m.owner.is_none());
    }

    #[test]
    fn test_known_zone_is_kept() {
        let mut inventory = Inventory::new(vec!["TA-".into()]);
        inventory.insert("TA-apne1-mm01", meta(None, None, Some("ap-northeast-1c")));
        let m = inventory.get("TA-apne1-mm01").unwrap();
        assert_eq!(m.availability_zone.as_deref(), Some("ap-northeast-1c"));
    }

    #[test]
    fn test_unknown_host_without_prefix() {
        let inventory = Inventory::new(vec!["TA-".into()]);
        assert!(inventory.get("dev-box").is_none());
        assert!(inventory.get("TA-").is_none());
    }
}
