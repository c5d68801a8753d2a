//! EC2 instance exports (`aws ec2 describe-instances --output json`).
//!
//! Instances are keyed by their `Name` tag; untagged ones are ignored.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

use cpuwatch_core::Metadata;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeInstances {
    #[serde(default)]
    reservations: Vec<Reservation>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Reservation {
    #[serde(default)]
    instances: Vec<Instance>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Instance {
    instance_id: Option<String>,
    instance_type: Option<String>,
    placement: Option<Placement>,
    #[serde(default)]
    tags: Vec<Tag>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Placement {
    availability_zone: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Tag {
    key: String,
    value: String,
}

pub async fn load_export(path: &Path, owner_tag: &str) -> Result<Vec<(String, Metadata)>> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    parse_export(&text, owner_tag)
}

/// `(Name tag, metadata)` per named instance, in export order.
pub fn parse_export(text: &str, owner_tag: &str) -> Result<Vec<(String, Metadata)>> {
    let export: DescribeInstances =
        serde_json::from_str(text).context("Invalid describe-instances JSON")?;

    let entries = export
        .reservations
        .into_iter()
        .flat_map(|r| r.instances)
        .filter_map(|instance| {
            let name = tag_value(&instance.tags, "Name", false)?;
            tracing::trace!("EC2 {} -> {:?}", name, instance.instance_id);
            let metadata = Metadata {
                owner: tag_value(&instance.tags, owner_tag, true),
                instance_type: instance.instance_type,
                availability_zone: instance.placement.and_then(|p| p.availability_zone),
            };
            Some((name, metadata))
        })
        .collect();

    Ok(entries)
}

fn tag_value(tags: &[Tag], key: &str, ignore_case: bool) -> Option<String> {
    tags.iter()
        .find(|t| {
            if ignore_case {
                t.key.eq_ignore_ascii_case(key)
            } else {
                t.key == key
            }
        })
        .map(|t| t.value.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXPORT: &str = r#"{
      "Reservations": [
        {
          "Instances": [
            {
              "InstanceId": "i-0123",
              "InstanceType": "c6i.4xlarge",
              "Placement": { "AvailabilityZone": "ap-northeast-1a", "Tenancy": "default" },
              "Tags": [
                { "Key": "Name", "Value": "TA-apne1-mm01" },
                { "Key": "owner", "Value": "alice" }
              ]
            },
            {
              "InstanceId": "i-0456",
              "InstanceType": "t3.micro",
              "Tags": [ { "Key": "Owner", "Value": "bob" } ]
            }
          ]
        },
        {
          "Instances": [
            {
              "InstanceId": "i-0789",
              "InstanceType": "m5.large",
              "Placement": { "AvailabilityZone": "eu-west-1b" },
              "Tags": [ { "Key": "Name", "Value": "TA-euwe1-arb01" } ]
            }
          ]
        }
      ]
    }"#;

    #[test]
    fn test_parse_export() {
        let entries = parse_export(EXPORT, "Owner").unwrap();
        assert_eq!(entries.len(), 2);

        let (name, meta) = &entries[0];
        assert_eq!(name, "TA-apne1-mm01");
        assert_eq!(meta.owner.as_deref(), Some("alice"));
        assert_eq!(meta.instance_type.as_deref(), Some("c6i.4xlarge"));
        assert_eq!(meta.availability_zone.as_deref(), Some("ap-northeast-1a"));

        let (name, meta) = &entries[1];
        assert_eq!(name, "TA-euwe1-arb01");
        assert!(meta.owner.is_none());
    }

    #[test]
    fn test_invalid_json() {
        assert!(parse_export("not json", "Owner").is_err());
        assert!(parse_export("{}", "Owner").unwrap().is_empty());
    }
}
