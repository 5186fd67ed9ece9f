//! Host-side guest networking: a TAP device NAT-ed through the upstream
//! interface.
//!
//! Everything here is idempotent. The TAP existing is the canonical
//! "already configured" signal, and every firewall rule is checked with
//! `iptables -C` before it is appended, so repeated invocations never grow
//! the rule table. The TAP is deliberately left behind between
//! invocations.
use crate::cmd::{CommandError, run, run_checked};
use log::info;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct HostNetworkSpec {
    pub tap_name: String,
    /// Host-side address of the TAP, CIDR notation.
    pub host_cidr: String,
    pub guest_ip: String,
    pub guest_mac: String,
}

impl Default for HostNetworkSpec {
    fn default() -> Self {
        Self {
            tap_name: "tap0".to_string(),
            host_cidr: "172.16.0.1/24".to_string(),
            guest_ip: "172.16.0.2".to_string(),
            guest_mac: "AA:FC:00:00:00:01".to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    #[error("Io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Command(#[from] CommandError),

    #[error("no upstream interface on the default route")]
    NoUpstream,
}

/// Bring the host side of the guest network up, creating whatever is
/// missing. Partial state left by a failed earlier attempt converges on
/// retry.
pub async fn ensure_network(spec: &HostNetworkSpec) -> Result<(), NetworkError> {
    if Path::new(&format!("/sys/class/net/{}", spec.tap_name)).exists() {
        // Kept from an earlier invocation; it only needs to be up.
        info!("tap {} already present", spec.tap_name);
        let _ = run("ip", ["link", "set", &spec.tap_name, "up"]).await;
        return Ok(());
    }

    info!("configuring host network on {}", spec.tap_name);
    run_checked(
        "ip",
        ["tuntap", "add", "dev", &spec.tap_name, "mode", "tap"],
    )
    .await?;
    run_checked("ip", ["addr", "add", &spec.host_cidr, "dev", &spec.tap_name]).await?;
    run_checked("ip", ["link", "set", &spec.tap_name, "up"]).await?;
    run_checked("sysctl", ["-w", "net.ipv4.ip_forward=1"]).await?;

    // Re-detected on every call; the default route can move under us.
    let upstream = detect_upstream().await?;
    info!("upstream interface: {upstream}");

    ensure_rule(
        Some("nat"),
        "POSTROUTING",
        &["-o", &upstream, "-j", "MASQUERADE"],
    )
    .await?;
    ensure_rule(
        None,
        "FORWARD",
        &["-i", &spec.tap_name, "-o", &upstream, "-j", "ACCEPT"],
    )
    .await?;
    ensure_rule(
        None,
        "FORWARD",
        &[
            "-i",
            &upstream,
            "-o",
            &spec.tap_name,
            "-m",
            "state",
            "--state",
            "RELATED,ESTABLISHED",
            "-j",
            "ACCEPT",
        ],
    )
    .await?;

    Ok(())
}

async fn detect_upstream() -> Result<String, NetworkError> {
    let output = run("ip", ["route", "show", "default"]).await?;
    parse_default_route(&String::from_utf8_lossy(&output.stdout)).ok_or(NetworkError::NoUpstream)
}

/// Pull the interface name out of `ip route show default` output, e.g.
/// `default via 192.168.1.1 dev wlp3s0 proto dhcp metric 600`.
fn parse_default_route(route: &str) -> Option<String> {
    let mut words = route.split_whitespace();
    while let Some(word) = words.next() {
        if word == "dev" {
            return words.next().map(str::to_string);
        }
    }
    None
}

/// Append an iptables rule only when an identical one is not already
/// installed (`-C` probes, `-A` appends).
async fn ensure_rule(
    table: Option<&str>,
    chain: &str,
    rule: &[&str],
) -> Result<(), NetworkError> {
    let present = run("iptables", rule_args(table, chain, "-C", rule))
        .await?
        .status
        .success();
    if !present {
        run_checked("iptables", rule_args(table, chain, "-A", rule)).await?;
    }

    Ok(())
}

fn rule_args<'a>(
    table: Option<&'a str>,
    chain: &'a str,
    flag: &'a str,
    rule: &[&'a str],
) -> Vec<&'a str> {
    let mut args = Vec::new();
    if let Some(table) = table {
        args.extend(["-t", table]);
    }
    args.push(flag);
    args.push(chain);
    args.extend_from_slice(rule);
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_typical_default_route() {
        let route = "default via 192.168.1.1 dev wlp3s0 proto dhcp metric 600\n";
        assert_eq!(parse_default_route(route), Some("wlp3s0".to_string()));
    }

    #[test]
    fn parses_first_of_multiple_routes() {
        let route = "default via 10.0.0.1 dev eth0 proto static\n\
                     default via 10.0.0.2 dev eth1 proto static metric 100\n";
        assert_eq!(parse_default_route(route), Some("eth0".to_string()));
    }

    #[test]
    fn missing_device_yields_none() {
        assert_eq!(parse_default_route("default via 10.0.0.1"), None);
        assert_eq!(parse_default_route(""), None);
    }

    #[test]
    fn nat_rule_args_carry_the_table() {
        assert_eq!(
            rule_args(
                Some("nat"),
                "POSTROUTING",
                "-C",
                &["-o", "eth0", "-j", "MASQUERADE"]
            ),
            ["-t", "nat", "-C", "POSTROUTING", "-o", "eth0", "-j", "MASQUERADE"]
        );
    }

    #[test]
    fn forward_rule_args_skip_the_table() {
        assert_eq!(
            rule_args(None, "FORWARD", "-A", &["-i", "tap0", "-j", "ACCEPT"]),
            ["-A", "FORWARD", "-i", "tap0", "-j", "ACCEPT"]
        );
    }
}
