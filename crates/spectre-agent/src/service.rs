//! Init-system integration for `spectre-agent up` / `down`
//!
//! Linux gets a systemd unit, macOS a launchd daemon. Both run the current
//! executable with the listen/token/host flags given to `up`.

use std::fmt::Write as _;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{bail, Context, Result};

pub const SYSTEMD_UNIT_PATH: &str = "/etc/systemd/system/spectre-agent.service";
pub const SYSTEMD_UNIT_NAME: &str = "spectre-agent.service";
pub const LAUNCHD_PLIST_PATH: &str = "/Library/LaunchDaemons/com.spectre.agent.plist";
pub const LAUNCHD_LABEL: &str = "com.spectre.agent";

/// What the installed service runs, and as whom
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDefinition {
    pub exe: PathBuf,
    pub args: Vec<String>,
    pub user: Option<String>,
    pub group: Option<String>,
}

impl ServiceDefinition {
    /// Definition for the running executable under the invoking (sudo) user
    pub fn for_current_exe(listen: &str, token: &str, host: Option<&str>) -> Result<Self> {
        let exe = std::env::current_exe().context("resolve executable")?;
        let exe = exe.canonicalize().unwrap_or(exe);
        let (user, group) = resolve_service_account();
        Ok(Self {
            exe,
            args: exec_args(listen, token, host),
            user,
            group,
        })
    }
}

/// Flags passed to the service's agent process
pub fn exec_args(listen: &str, token: &str, host: Option<&str>) -> Vec<String> {
    let mut args = vec![format!("--listen={}", listen), format!("--token={}", token)];
    if let Some(host) = host.filter(|h| !h.is_empty()) {
        args.push(format!("--host={}", host));
    }
    args
}

/// Install and start the service
pub fn install(service: &ServiceDefinition) -> Result<()> {
    match std::env::consts::OS {
        "linux" => install_systemd(service),
        "macos" => install_launchd(service),
        other => bail!("service management is not supported on {}", other),
    }
}

/// Stop and remove the service
pub fn uninstall() -> Result<()> {
    match std::env::consts::OS {
        "linux" => uninstall_systemd(),
        "macos" => uninstall_launchd(),
        other => bail!("service management is not supported on {}", other),
    }
}

pub fn render_systemd_unit(service: &ServiceDefinition) -> String {
    let mut unit = String::new();
    unit.push_str("[Unit]\nDescription=Spectre agent\nAfter=network.target\n\n");

    unit.push_str("[Service]\nType=simple\n");
    unit.push_str("Environment=PATH=/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/bin\n");
    unit.push_str("Environment=SPECTRE_AGENT_HOME=/var/lib/spectre-agent\n");
    unit.push_str("StateDirectory=spectre-agent\n");
    if let Some(user) = &service.user {
        let _ = writeln!(unit, "User={}", user);
    }
    if let Some(group) = &service.group {
        let _ = writeln!(unit, "Group={}", group);
    }
    let _ = writeln!(unit, "ExecStart={} {}", service.exe.display(), service.args.join(" "));
    if let Some(dir) = service.exe.parent() {
        let _ = writeln!(unit, "WorkingDirectory={}", dir.display());
    }
    unit.push_str("Restart=always\nRestartSec=5\n\n");

    unit.push_str("[Install]\nWantedBy=multi-user.target\n");
    unit
}

pub fn render_launchd_plist(service: &ServiceDefinition) -> String {
    let mut arguments = format!("    <string>{}</string>\n", xml_escape(&service.exe.to_string_lossy()));
    for arg in &service.args {
        let _ = writeln!(arguments, "    <string>{}</string>", xml_escape(arg));
    }
    let user = service
        .user
        .as_deref()
        .map(|u| format!("  <key>UserName</key><string>{}</string>\n", xml_escape(u)))
        .unwrap_or_default();

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
  <key>Label</key><string>{label}</string>
  <key>ProgramArguments</key>
  <array>
{arguments}  </array>
  <key>RunAtLoad</key><true/>
  <key>KeepAlive</key><true/>
  <key>StandardOutPath</key><string>/var/log/spectre-agent.log</string>
  <key>StandardErrorPath</key><string>/var/log/spectre-agent.log</string>
{user}</dict>
</plist>
"#,
        label = LAUNCHD_LABEL,
        arguments = arguments,
        user = user,
    )
}

fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn install_systemd(service: &ServiceDefinition) -> Result<()> {
    std::fs::write(SYSTEMD_UNIT_PATH, render_systemd_unit(service))
        .with_context(|| format!("write {}", SYSTEMD_UNIT_PATH))?;
    run("systemctl", &["daemon-reload"])?;
    run("systemctl", &["enable", "--now", SYSTEMD_UNIT_NAME])?;
    // Status output helps when run interactively.
    let _ = run("systemctl", &["status", "--no-pager", SYSTEMD_UNIT_NAME]);
    Ok(())
}

fn uninstall_systemd() -> Result<()> {
    let _ = run("systemctl", &["disable", "--now", SYSTEMD_UNIT_NAME]);
    remove_if_present(Path::new(SYSTEMD_UNIT_PATH))?;
    let _ = run("systemctl", &["daemon-reload"]);
    Ok(())
}

fn install_launchd(service: &ServiceDefinition) -> Result<()> {
    std::fs::write(LAUNCHD_PLIST_PATH, render_launchd_plist(service))
        .with_context(|| format!("write {}", LAUNCHD_PLIST_PATH))?;
    let target = format!("system/{}", LAUNCHD_LABEL);
    let _ = run("launchctl", &["bootout", &target]);
    run("launchctl", &["bootstrap", "system", LAUNCHD_PLIST_PATH])?;
    let _ = run("launchctl", &["enable", &target]);
    let _ = run("launchctl", &["kickstart", "-k", &target]);
    Ok(())
}

fn uninstall_launchd() -> Result<()> {
    let _ = run("launchctl", &["bootout", &format!("system/{}", LAUNCHD_LABEL)]);
    remove_if_present(Path::new(LAUNCHD_PLIST_PATH))
}

fn remove_if_present(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("remove {}", path.display())),
    }
}

fn run(program: &str, args: &[&str]) -> Result<()> {
    let status = Command::new(program)
        .args(args)
        .status()
        .with_context(|| format!("{} {}", program, args.join(" ")))?;
    if !status.success() {
        bail!("{} {}: {}", program, args.join(" "), status);
    }
    Ok(())
}

/// The user who invoked us through sudo, else the current user; nothing
/// for root. The group is the user's primary group.
fn resolve_service_account() -> (Option<String>, Option<String>) {
    let name = std::env::var("SUDO_USER")
        .ok()
        .filter(|n| !n.is_empty())
        .or_else(|| std::env::var("USER").ok())
        .filter(|n| !n.is_empty() && n != "root");
    let Some(name) = name else {
        return (None, None);
    };

    let group = Command::new("id")
        .args(["-gn", &name])
        .output()
        .ok()
        .filter(|out| out.status.success())
        .map(|out| String::from_utf8_lossy(&out.stdout).trim().to_string())
        .filter(|g| !g.is_empty())
        .unwrap_or_else(|| name.clone());

    (Some(name), Some(group))
}
