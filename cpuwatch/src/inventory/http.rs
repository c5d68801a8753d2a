//! HTTP inventory service: a JSON array of instances with free-form tags.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

use cpuwatch_core::Metadata;

#[derive(Debug, Deserialize)]
struct InventoryItem {
    name: Option<String>,
    instance_type: Option<String>,
    #[serde(default, alias = "zone_id")]
    zone: Option<String>,
    #[serde(default)]
    tags: Option<HashMap<String, serde_json::Value>>,
}

pub async fn fetch_inventory(url: &str, timeout: Duration) -> Result<Vec<(String, Metadata)>> {
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .context("Failed to build HTTP client")?;

    let body = client
        .get(url)
        .send()
        .await
        .context("Inventory request failed")?
        .error_for_status()
        .context("Inventory returned an error status")?
        .text()
        .await
        .context("Failed to read inventory body")?;

    parse_inventory(&body)
}

/// `(name, metadata)` per named item, in response order.
pub fn parse_inventory(body: &str) -> Result<Vec<(String, Metadata)>> {
    let items: Vec<InventoryItem> = serde_json::from_str(body).context("Invalid inventory JSON")?;

    let entries = items
        .into_iter()
        .filter_map(|item| {
            let name = item.name?;
            let tags = item.tags.unwrap_or_default();
            let owner = ["owner", "Owner"]
                .iter()
                .find_map(|key| tags.get(*key).and_then(|v| v.as_str()))
                .map(str::to_string);
            Some((
                name,
                Metadata {
                    owner,
                    instance_type: item.instance_type,
                    availability_zone: item.zone,
                },
            ))
        })
        .collect();

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_inventory() {
        let body = r#"[
            {"name": "AC-cnhk1-tao01", "instance_type": "ecs.c7.2xlarge", "status": "Running",
             "tags": {"Owner": "carol", "team": "TAO", "rack": 12}},
            {"name": "AC-cnhk1-tao02", "instance_type": "ecs.g7.xlarge", "zone_id": "cn-hongkong-b",
             "tags": {"owner": "dave", "Owner": "ignored"}},
            {"name": "AC-cnhk1-tao03", "tags": null},
            {"instance_type": "nameless"}
        ]"#;

        let entries = parse_inventory(body).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].1.owner.as_deref(), Some("carol"));
        assert_eq!(entries[0].1.instance_type.as_deref(), Some("ecs.c7.2xlarge"));
        assert_eq!(entries[1].1.owner.as_deref(), Some("dave"));
        assert_eq!(entries[1].1.availability_zone.as_deref(), Some("cn-hongkong-b"));
        assert!(entries[2].1.is_empty());
    }

    #[test]
    fn test_invalid_body() {
        assert!(parse_inventory("{\"not\": \"a list\"}").is_err());
    }

    #[tokio::test]
    async fn test_unreachable_inventory() {
        let result = fetch_inventory("http://127.0.0.1:9/ecs", Duration::from_millis(500)).await;
        assert!(result.is_err());
    }
}
