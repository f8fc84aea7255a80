//! Fixed maintenance commands against a Proxmox host and the regex
//! parsing of their text output. Every operation is one SSH command;
//! failures carry the remote stderr verbatim.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use thiserror::Error;

use crate::ssh::{CommandOutput, SshError, SshSession};

/// Tag the upstream script framework puts on containers it creates.
pub const COMMUNITY_TAG: &str = "community-script";

#[derive(Error, Debug)]
pub enum ProxmoxError {
    #[error(transparent)]
    Ssh(#[from] SshError),
    #[error("`{command}` exited with {exit_code}: {stderr}")]
    CommandFailed {
        command: String,
        exit_code: u32,
        stderr: String,
    },
}

static IPV4_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:\d{1,3}\.){3}\d{1,3}\b").expect("ipv4 regex"));
static STORAGE_HEADER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^([a-z][a-z0-9_-]*):\s+(\S+)\s*$").expect("storage regex"));
static PCT_LIST_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*(\d+)\s+(\S+)").expect("pct list regex"));
static TAGS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^tags:\s*(.+)$").expect("tags regex"));
static HOSTNAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^hostname:\s*(\S+)").expect("hostname regex"));

#[derive(Debug, Clone, Serialize)]
pub struct StorageEntry {
    pub name: String,
    pub kind: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DetectedContainer {
    pub ctid: i32,
    pub hostname: Option<String>,
    pub slug: String,
}

/// First IPv4 address out of `hostname -I` output.
pub fn parse_first_ip(output: &str) -> Option<String> {
    IPV4_RE.find(output).map(|m| m.as_str().to_owned())
}

/// Storage names and types from `/etc/pve/storage.cfg`. Each block
/// opens with a `type: name` header; the indented body is ignored.
pub fn parse_storage_cfg(contents: &str) -> Vec<StorageEntry> {
    STORAGE_HEADER_RE
        .captures_iter(contents)
        .map(|cap| StorageEntry {
            kind: cap[1].to_owned(),
            name: cap[2].to_owned(),
        })
        .collect()
}

/// Container ids out of `pct list` (skipping the column header).
pub fn parse_pct_list(output: &str) -> Vec<i32> {
    PCT_LIST_RE
        .captures_iter(output)
        .filter_map(|cap| cap[1].parse().ok())
        .collect()
}

/// The `tags:` line of a `pct config` dump, split on `;`.
pub fn parse_config_tags(config: &str) -> Vec<String> {
    TAGS_RE
        .captures(config)
        .map(|cap| {
            cap[1]
                .split(';')
                .map(|t| t.trim().to_owned())
                .filter(|t| !t.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

pub fn parse_config_hostname(config: &str) -> Option<String> {
    HOSTNAME_RE.captures(config).map(|cap| cap[1].to_owned())
}

/// The script slug is whichever tag accompanies the framework tag.
pub fn slug_from_tags(tags: &[String]) -> Option<String> {
    if !tags.iter().any(|t| t == COMMUNITY_TAG) {
        return None;
    }
    tags.iter().find(|t| t.as_str() != COMMUNITY_TAG).cloned()
}

async fn run_checked(session: &SshSession, command: &str) -> Result<CommandOutput, ProxmoxError> {
    let output = session.exec(command).await?;
    if !output.success() {
        return Err(ProxmoxError::CommandFailed {
            command: command.to_owned(),
            exit_code: output.exit_code,
            stderr: if output.stderr.trim().is_empty() {
                output.stdout.trim().to_owned()
            } else {
                output.stderr.trim().to_owned()
            },
        });
    }
    Ok(output)
}

pub async fn start_container(session: &SshSession, ctid: i32) -> Result<(), ProxmoxError> {
    run_checked(session, &format!("pct start {ctid}")).await?;
    Ok(())
}

pub async fn stop_container(session: &SshSession, ctid: i32) -> Result<(), ProxmoxError> {
    run_checked(session, &format!("pct stop {ctid}")).await?;
    Ok(())
}

pub async fn destroy_container(session: &SshSession, ctid: i32) -> Result<(), ProxmoxError> {
    run_checked(session, &format!("pct destroy {ctid}")).await?;
    Ok(())
}

pub async fn list_storages(session: &SshSession) -> Result<Vec<StorageEntry>, ProxmoxError> {
    let output = run_checked(session, "cat /etc/pve/storage.cfg").await?;
    Ok(parse_storage_cfg(&output.stdout))
}

pub async fn create_backup(
    session: &SshSession,
    ctid: i32,
    storage: &str,
) -> Result<String, ProxmoxError> {
    let command = format!("vzdump {ctid} --storage {storage} --mode snapshot --compress zstd");
    let output = run_checked(session, &command).await?;
    Ok(output.stdout)
}

pub async fn detect_container_ip(
    session: &SshSession,
    ctid: i32,
) -> Result<Option<String>, ProxmoxError> {
    let output = run_checked(session, &format!("pct exec {ctid} -- hostname -I")).await?;
    Ok(parse_first_ip(&output.stdout))
}

/// Lists containers carrying the community-script tag. Containers
/// whose config cannot be read are skipped rather than failing the
/// whole scan.
pub async fn list_tagged_containers(
    session: &SshSession,
) -> Result<Vec<DetectedContainer>, ProxmoxError> {
    let output = run_checked(session, "pct list").await?;
    let mut detected = Vec::new();
    for ctid in parse_pct_list(&output.stdout) {
        let config = match session.exec(&format!("pct config {ctid}")).await {
            Ok(out) if out.success() => out.stdout,
            _ => continue,
        };
        let tags = parse_config_tags(&config);
        if let Some(slug) = slug_from_tags(&tags) {
            detected.push(DetectedContainer {
                ctid,
                hostname: parse_config_hostname(&config),
                slug,
            });
        }
    }
    Ok(detected)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_ip_from_hostname_output() {
        assert_eq!(
            parse_first_ip("192.168.1.50 fd00::8ff:1 \n").as_deref(),
            Some("192.168.1.50")
        );
        assert_eq!(parse_first_ip("\n"), None);
    }

    #[test]
    fn storage_cfg_blocks() {
        let cfg = "\
dir: local
\tpath /var/lib/vz
\tcontent iso,vztmpl,backup

lvmthin: local-lvm
\tthinpool data
\tcontent rootdir,images
";
        let storages = parse_storage_cfg(cfg);
        assert_eq!(storages.len(), 2);
        assert_eq!(storages[0].kind, "dir");
        assert_eq!(storages[0].name, "local");
        assert_eq!(storages[1].kind, "lvmthin");
        assert_eq!(storages[1].name, "local-lvm");
    }

    #[test]
    fn pct_list_skips_header() {
        let out = "\
VMID       Status     Lock         Name
100        running                 homarr
105        stopped                 paperless
";
        assert_eq!(parse_pct_list(out), vec![100, 105]);
    }

    #[test]
    fn tags_and_slug_extraction() {
        let config = "\
arch: amd64
hostname: homarr
tags: community-script;homarr
";
        let tags = parse_config_tags(config);
        assert_eq!(tags, vec!["community-script", "homarr"]);
        assert_eq!(slug_from_tags(&tags).as_deref(), Some("homarr"));
        assert_eq!(parse_config_hostname(config).as_deref(), Some("homarr"));
    }

    #[test]
    fn untagged_container_yields_no_slug() {
        let tags = parse_config_tags("hostname: plain\n");
        assert!(tags.is_empty());
        assert_eq!(slug_from_tags(&tags), None);
        // The framework tag alone is not enough to infer a script.
        assert_eq!(slug_from_tags(&["community-script".to_owned()]), None);
    }
}
