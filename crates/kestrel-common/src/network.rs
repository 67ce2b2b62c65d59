//! Static IPv4 network parameters for a new instance
//!
//! The HTTP layer parses and validates these before any task is enqueued,
//! so the orchestrator only ever sees a consistent configuration.

use crate::error::Error;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

/// Gateway used when a create request omits one
pub const DEFAULT_GATEWAY: &str = "192.168.1.1";

/// Netmask used when a create request omits one
pub const DEFAULT_NETMASK: &str = "255.255.255.0";

/// Longest hostname label the guest accepts
pub const MAX_HOSTNAME_LEN: usize = 63;

/// Check that an instance name can be used verbatim as the guest hostname
///
/// A single DNS label: ASCII letters, digits and `-`, at most 63 characters,
/// not starting or ending with `-`.
pub fn validate_hostname(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.len() <= MAX_HOSTNAME_LEN
        && name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
        && !name.starts_with('-')
        && !name.ends_with('-');
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidConfig(format!(
            "Invalid instance name {:?}: use 1 to {} letters, digits or '-', not starting or ending with '-'",
            name, MAX_HOSTNAME_LEN
        )))
    }
}

/// Static network configuration for the guest's primary NIC
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub static_ip: Ipv4Addr,
    pub default_gateway: Ipv4Addr,
    pub netmask: Ipv4Addr,
    /// DNS servers, in resolution order
    pub dns: Vec<Ipv4Addr>,
}

impl NetworkConfig {
    /// Parse user-supplied strings and validate the result
    pub fn parse(
        static_ip: &str,
        default_gateway: &str,
        netmask: &str,
        dns: &[String],
    ) -> Result<Self> {
        let config = Self {
            static_ip: parse_addr("static IP", static_ip)?,
            default_gateway: parse_addr("default gateway", default_gateway)?,
            netmask: parse_addr("netmask", netmask)?,
            dns: dns
                .iter()
                .map(|server| parse_addr("DNS server", server))
                .collect::<Result<Vec<_>>>()?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check that the address, gateway and netmask describe one subnet
    pub fn validate(&self) -> Result<()> {
        let prefix = self.prefix_len().ok_or_else(|| {
            Error::InvalidConfig(format!("Netmask {} is not a valid subnet mask", self.netmask))
        })?;

        if prefix == 0 {
            return Err(Error::InvalidConfig(
                "Netmask 0.0.0.0 does not describe a usable network".to_string(),
            ));
        }

        if self.static_ip == self.default_gateway {
            return Err(Error::InvalidConfig(format!(
                "Static IP {} cannot be the same as the default gateway",
                self.static_ip
            )));
        }

        if self.network_of(self.static_ip) != self.network_of(self.default_gateway) {
            return Err(Error::InvalidConfig(format!(
                "Static IP {} is not within the network of default gateway {} with netmask {}",
                self.static_ip, self.default_gateway, self.netmask
            )));
        }

        // /31 and /32 have no network or broadcast address to collide with
        if prefix < 31 {
            let host_bits = !u32::from(self.netmask);
            let host = u32::from(self.static_ip) & host_bits;
            if host == 0 {
                return Err(Error::InvalidConfig(format!(
                    "Static IP {} is the network address of its subnet",
                    self.static_ip
                )));
            }
            if host == host_bits {
                return Err(Error::InvalidConfig(format!(
                    "Static IP {} is the broadcast address of its subnet",
                    self.static_ip
                )));
            }
        }

        Ok(())
    }

    /// Prefix length of the netmask, or `None` if its bits are not contiguous
    pub fn prefix_len(&self) -> Option<u32> {
        let mask = u32::from(self.netmask);
        let prefix = mask.leading_ones();
        if mask.checked_shl(prefix).unwrap_or(0) == 0 {
            Some(prefix)
        } else {
            None
        }
    }

    fn network_of(&self, addr: Ipv4Addr) -> u32 {
        u32::from(addr) & u32::from(self.netmask)
    }
}

fn parse_addr(what: &str, value: &str) -> Result<Ipv4Addr> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::InvalidConfig(format!("Invalid {}: {}", what, value)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dns(servers: &[&str]) -> Vec<String> {
        servers.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_valid() {
        let config =
            NetworkConfig::parse("10.7.7.2", "10.7.7.1", "255.255.255.0", &dns(&["10.7.7.1"]))
                .unwrap();

        assert_eq!(config.static_ip, Ipv4Addr::new(10, 7, 7, 2));
        assert_eq!(config.dns, vec![Ipv4Addr::new(10, 7, 7, 1)]);
        assert_eq!(config.prefix_len(), Some(24));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        let err = NetworkConfig::parse("10.7.7", "10.7.7.1", "255.255.255.0", &[]).unwrap_err();
        assert!(err.to_string().contains("static IP"));

        let err = NetworkConfig::parse("10.7.7.2", "10.7.7.1", "255.255.255.0", &dns(&["nope"]))
            .unwrap_err();
        assert!(err.to_string().contains("DNS server"));
    }

    #[test]
    fn test_ip_outside_gateway_subnet() {
        let err = NetworkConfig::parse("10.7.8.2", "10.7.7.1", "255.255.255.0", &[]).unwrap_err();
        assert!(err.to_string().contains("not within the network"));
    }

    #[test]
    fn test_wider_netmask_accepts_neighbouring_subnet() {
        assert!(NetworkConfig::parse("10.7.8.2", "10.7.7.1", "255.255.0.0", &[]).is_ok());
    }

    #[test]
    fn test_non_contiguous_netmask() {
        let err = NetworkConfig::parse("10.7.7.2", "10.7.7.1", "255.0.255.0", &[]).unwrap_err();
        assert!(err.to_string().contains("not a valid subnet mask"));
    }

    #[test]
    fn test_ip_equals_gateway() {
        let err = NetworkConfig::parse("10.7.7.1", "10.7.7.1", "255.255.255.0", &[]).unwrap_err();
        assert!(err.to_string().contains("same as the default gateway"));
    }

    #[test]
    fn test_network_and_broadcast_addresses() {
        let err = NetworkConfig::parse("10.7.7.0", "10.7.7.1", "255.255.255.0", &[]).unwrap_err();
        assert!(err.to_string().contains("network address"));

        let err =
            NetworkConfig::parse("10.7.7.255", "10.7.7.1", "255.255.255.0", &[]).unwrap_err();
        assert!(err.to_string().contains("broadcast address"));
    }

    #[test]
    fn test_hostname_labels() {
        let longest = "x".repeat(MAX_HOSTNAME_LEN);
        let too_long = "x".repeat(MAX_HOSTNAME_LEN + 1);

        for name in ["box1", "Box-1", "a", longest.as_str()] {
            assert!(validate_hostname(name).is_ok(), "{}", name);
        }
        for name in [
            "",
            "-box",
            "box-",
            "box_1",
            "box 1",
            "box1;reboot",
            "box1$(id)",
            "box1`id`",
            "box.example",
            too_long.as_str(),
        ] {
            let err = validate_hostname(name).unwrap_err();
            assert_eq!(err.kind(), crate::ErrorKind::InvalidConfig, "{}", name);
        }
    }

    #[test]
    fn test_prefix_len() {
        let mut config =
            NetworkConfig::parse("192.168.1.6", "192.168.1.1", DEFAULT_NETMASK, &[]).unwrap();
        assert_eq!(config.prefix_len(), Some(24));

        config.netmask = Ipv4Addr::new(255, 255, 255, 255);
        assert_eq!(config.prefix_len(), Some(32));

        config.netmask = Ipv4Addr::new(255, 255, 0, 255);
        assert_eq!(config.prefix_len(), None);
    }
}
