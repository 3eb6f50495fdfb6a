//! Container listing through the docker CLI

use std::process::Stdio;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tokio::process::Command;

use spectre_protocol::Container;

/// One row of `docker ps --format '{{json .}}'`
#[derive(Debug, Deserialize)]
struct PsRow {
    #[serde(rename = "Names", default)]
    names: String,
    #[serde(rename = "Ports", default)]
    ports: String,
}

/// Running containers with their published ports.
///
/// The child is killed if the caller stops waiting.
pub async fn list_containers() -> Result<Vec<Container>> {
    let output = Command::new("docker")
        .args(["ps", "--format", "{{json .}}"])
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .context("docker ps failed")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let detail = match stderr.trim() {
            "" => output.status.to_string(),
            detail => detail.to_string(),
        };
        bail!("docker ps failed: {}", detail);
    }

    Ok(parse_ps_output(&String::from_utf8_lossy(&output.stdout)))
}

/// Parse `docker ps` JSON lines. Malformed rows are skipped.
pub fn parse_ps_output(stdout: &str) -> Vec<Container> {
    stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match serde_json::from_str::<PsRow>(line) {
            Ok(row) => Some(Container {
                name: row.names,
                ports: row
                    .ports
                    .split(',')
                    .map(str::trim)
                    .filter(|port| !port.is_empty())
                    .map(str::to_string)
                    .collect(),
            }),
            Err(e) => {
                tracing::debug!("Skipping malformed docker ps row: {}", e);
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rows_and_ports() {
        let stdout = concat!(
            r#"{"Names":"web","Ports":"0.0.0.0:8080->80/tcp, :::8080->80/tcp","Image":"nginx"}"#,
            "\n",
            r#"{"Names":"worker","Ports":""}"#,
            "\n",
        );
        let containers = parse_ps_output(stdout);

        assert_eq!(containers.len(), 2);
        assert_eq!(containers[0].name, "web");
        assert_eq!(
            containers[0].ports,
            vec!["0.0.0.0:8080->80/tcp", ":::8080->80/tcp"]
        );
        assert!(containers[1].ports.is_empty());
    }

    #[test]
    fn test_malformed_rows_are_skipped() {
        let stdout = "not json\n{\"Names\":\"db\"}\n\n";
        let containers = parse_ps_output(stdout);
        assert_eq!(containers.len(), 1);
        assert_eq!(containers[0].name, "db");
    }

    #[test]
    fn test_empty_output() {
        assert!(parse_ps_output("").is_empty());
    }
}
