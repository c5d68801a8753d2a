//! Per-team server registry (`server_list.txt`) and host selection.
//!
//! One team per line: `TEAM,['host-a', 'host-b']`. Spreadsheet exports wrap
//! the list in double quotes and double the inner ones:
//! `TEAM,"[""host-a"", ""host-b""]"`.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info, warn};

use cpuwatch_core::HostTarget;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerList {
    teams: BTreeMap<String, Vec<String>>,
}

impl ServerList {
    pub async fn load(path: &Path) -> Result<Self> {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read server list {}", path.display()))?;
        let list = Self::parse(&text);
        info!(
            "Loaded {} teams ({} hosts) from {}",
            list.teams.len(),
            list.teams.values().map(Vec::len).sum::<usize>(),
            path.display()
        );
        Ok(list)
    }

    /// Lines without a comma or with an unreadable list are skipped.
    /// Repeated teams merge, keeping first-seen order without duplicates.
    pub fn parse(text: &str) -> Self {
        let mut teams: BTreeMap<String, Vec<String>> = BTreeMap::new();

        for line in text.lines() {
            let line = line.trim();
            let Some((key, value)) = line.split_once(',') else {
                continue;
            };

            let Some(hosts) = parse_list_literal(value) else {
                debug!("Skipping unparsable server list line: {}", line);
                continue;
            };

            let entry = teams.entry(key.trim().to_uppercase()).or_default();
            for host in hosts {
                if !entry.contains(&host) {
                    entry.push(host);
                }
            }
        }

        Self { teams }
    }

    /// Team names in ascending order
    pub fn teams(&self) -> impl Iterator<Item = &str> {
        self.teams.keys().map(String::as_str)
    }

    pub fn hosts(&self, team: &str) -> Option<&[String]> {
        self.teams.get(&team.to_uppercase()).map(Vec::as_slice)
    }

    /// Hosts to audit: requested teams (all when empty), in team order, whose
    /// name starts with one of `prefixes` (case-insensitive, no filter when
    /// empty). `num` is the host's position in its team list before filtering.
    pub fn select(&self, teams: &[String], prefixes: &[String]) -> Vec<HostTarget> {
        let mut wanted: Vec<String> = if teams.is_empty() {
            self.teams.keys().cloned().collect()
        } else {
            teams.iter().map(|t| t.trim().to_uppercase()).collect()
        };
        wanted.sort();
        wanted.dedup();

        let mut targets = Vec::new();
        for team in wanted {
            let Some(hosts) = self.teams.get(&team) else {
                warn!("Team {} not found in server list", team);
                continue;
            };

            for (idx, host) in hosts.iter().enumerate() {
                if !has_prefix(host, prefixes) {
                    info!("Skipping {} ({}): no recognised prefix", host, team);
                    continue;
                }
                targets.push(HostTarget::new(idx + 1, host.clone(), team.clone()));
            }
        }

        targets
    }
}

pub fn has_prefix(host: &str, prefixes: &[String]) -> bool {
    if prefixes.is_empty() {
        return true;
    }
    let host = host.to_uppercase();
    prefixes.iter().any(|p| host.starts_with(&p.to_uppercase()))
}

/// `['a', "b"]` -> `["a", "b"]`, after undoing CSV-style quoting.
fn parse_list_literal(value: &str) -> Option<Vec<String>> {
    let mut value = value.trim();
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        value = &value[1..value.len() - 1];
    }
    let value = value.replace("\"\"", "\"");

    let inner = value.trim().strip_prefix('[')?.strip_suffix(']')?;
    let mut hosts = Vec::new();

    for item in inner.split(',') {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }
        let unquoted = item
            .strip_prefix('\'')
            .and_then(|s| s.strip_suffix('\''))
            .or_else(|| item.strip_prefix('"').and_then(|s| s.strip_suffix('"')))?;
        hosts.push(unquoted.to_string());
    }

    Some(hosts)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
mm,['TA-apne1-mm01', 'TA-apne1-mm02', 'dev-box']
ARB,"[""AC-cnhk1-arb01"", ""TA-euwe1-arb02""]"
# a comment without list
MM,['TA-apne1-mm02', 'TA-apne1-mm03']
broken,[not quoted]
EMPTY,[]
"#;

    #[test]
    fn test_parse_and_merge() {
        let list = ServerList::parse(SAMPLE);
        assert_eq!(list.teams().collect::<Vec<_>>(), vec!["ARB", "EMPTY", "MM"]);
        assert_eq!(
            list.hosts("mm").unwrap(),
            &["TA-apne1-mm01", "TA-apne1-mm02", "dev-box", "TA-apne1-mm03"]
        );
        assert_eq!(list.hosts("ARB").unwrap(), &["AC-cnhk1-arb01", "TA-euwe1-arb02"]);
        assert!(list.hosts("EMPTY").unwrap().is_empty());
        assert!(list.hosts("BROKEN").is_none());
    }

    #[test]
    fn test_select_filters_prefix_and_keeps_positions() {
        let list = ServerList::parse(SAMPLE);
        let prefixes = vec!["ta-".to_string(), "AC-".to_string()];

        let targets = list.select(&["mm".to_string(), "NOPE".to_string()], &prefixes);
        let hosts: Vec<(usize, &str)> = targets.iter().map(|t| (t.num, t.host.as_str())).collect();
        assert_eq!(hosts, vec![(1, "TA-apne1-mm01"), (2, "TA-apne1-mm02"), (4, "TA-apne1-mm03")]);
        assert!(targets.iter().all(|t| t.team == "MM"));
    }

    #[test]
    fn test_select_all_teams_in_order() {
        let list = ServerList::parse(SAMPLE);
        let targets = list.select(&[], &["TA-".to_string(), "AC-".to_string()]);
        let teams: Vec<&str> = targets.iter().map(|t| t.team.as_str()).collect();
        assert_eq!(teams, vec!["ARB", "ARB", "MM", "MM", "MM"]);
    }

    #[test]
    fn test_no_prefixes_means_no_filter() {
        assert!(has_prefix("dev-box", &[]));
        assert!(!has_prefix("dev-box", &["TA-".to_string()]));
        assert!(has_prefix("ta-apne1-x", &["TA-".to_string()]));
    }

    #[test]
    fn test_list_literal() {
        assert_eq!(parse_list_literal("['a', 'b',]"), Some(vec!["a".into(), "b".into()]));
        assert_eq!(parse_list_literal("[\"a\"]"), Some(vec!["a".into()]));
        assert_eq!(parse_list_literal("'a'"), None);
        assert_eq!(parse_list_literal("['a]"), None);
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server_list.txt");
        tokio::fs::write(&path, SAMPLE).await.unwrap();

        let list = ServerList::load(&path).await.unwrap();
        assert_eq!(list.teams().count(), 3);
    }
}
