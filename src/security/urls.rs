//! URL policy
//!
//! `open_url` accepts only public http(s) targets; loopback and private
//! ranges are rejected so a tool call cannot reach local services.

use std::net::{Ipv4Addr, Ipv6Addr};
use url::{Host, Url};

const DENIED_HOSTNAMES: &[&str] = &["localhost", "127.0.0.1", "0.0.0.0", "::1"];

/// Parse and validate a URL for the open_url function
pub fn validate_url(raw: &str) -> Result<Url, String> {
    let url = Url::parse(raw).map_err(|e| format!("invalid URL: {}", e))?;

    match url.scheme() {
        "http" | "https" => {}
        other => return Err(format!("scheme '{}' is not allowed", other)),
    }

    let host = url.host().ok_or("URL has no host")?;
    match host {
        Host::Domain(domain) => {
            let lower = domain.to_lowercase();
            if DENIED_HOSTNAMES.contains(&lower.as_str()) {
                return Err(format!("host '{}' is not allowed", domain));
            }
            // Dotted-quad hosts sometimes parse as domains
            if let Ok(ip) = lower.parse::<Ipv4Addr>() {
                check_ipv4(ip)?;
            }
        }
        Host::Ipv4(ip) => check_ipv4(ip)?,
        Host::Ipv6(ip) => check_ipv6(ip)?,
    }

    Ok(url)
}

fn check_ipv4(ip: Ipv4Addr) -> Result<(), String> {
    if ip.is_loopback() || ip.is_unspecified() || ip.is_private() {
        return Err(format!("address {} is not routable from here", ip));
    }
    Ok(())
}

fn check_ipv6(ip: Ipv6Addr) -> Result<(), String> {
    if ip.is_loopback() || ip.is_unspecified() {
        return Err(format!("address {} is not routable from here", ip));
    }
    Ok(())
}
