//! Match criteria for flow entries.
//!
//! A [`Match`] is the set of header fields a packet has to carry to hit a flow
//! entry. Every field is optional; an absent field means "don't care". The
//! struct serializes to the controller's JSON layout directly, and criteria the
//! crate does not model are kept verbatim in [`Match::other`] so nothing read
//! from a switch is lost.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// EtherType of LLDP frames.
pub const ETHERTYPE_LLDP: u16 = 0x88CC;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MacAddress {
    pub address: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EthernetType {
    #[serde(rename = "type")]
    pub ether_type: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct EthernetMatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ethernet_source: Option<MacAddress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ethernet_destination: Option<MacAddress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ethernet_type: Option<EthernetType>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct IpMatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_protocol: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_dscp: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_ecn: Option<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Icmpv4Match {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icmpv4_type: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icmpv4_code: Option<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Icmpv6Match {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icmpv6_type: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icmpv6_code: Option<u8>,
}

/// Match criteria of a single flow entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Match {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_port: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_phy_port: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ethernet_match: Option<EthernetMatch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv4_source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv4_destination: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv6_source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv6_destination: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_match: Option<IpMatch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tcp_source_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tcp_destination_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub udp_source_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub udp_destination_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sctp_source_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sctp_destination_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icmpv4_match: Option<Icmpv4Match>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icmpv6_match: Option<Icmpv6Match>,
    /// Criteria read from a switch that have no typed field here.
    #[serde(flatten)]
    pub other: BTreeMap<String, Value>,
}

impl Match {
    pub fn builder() -> MatchBuilder {
        MatchBuilder::default()
    }

    pub fn is_empty(&self) -> bool {
        self.criteria().is_empty()
    }

    /// Labelled criteria in a stable order, nested groups flattened.
    pub fn criteria(&self) -> Vec<(String, String)> {
        let mut out: Vec<(String, String)> = Vec::new();
        let mut push = |label: &str, value: String| out.push((label.to_string(), value));

        if let Some(ref p) = self.in_port {
            push("Port In", p.clone());
        }
        if let Some(ref p) = self.in_phy_port {
            push("Port In [Physical]", p.clone());
        }
        if let Some(ref eth) = self.ethernet_match {
            if let Some(ref src) = eth.ethernet_source {
                push("Source [Ethernet]", src.address.clone());
            }
            if let Some(ref dst) = eth.ethernet_destination {
                push("Destination [Ethernet]", dst.address.clone());
            }
            if let Some(t) = eth.ethernet_type {
                push("Ethernet Frame Type", format!("{:#x}", t.ether_type));
            }
        }
        if let Some(ref ip) = self.ip_match {
            if let Some(proto) = ip.ip_protocol {
                push("IP Protocol", proto.to_string());
            }
            if let Some(dscp) = ip.ip_dscp {
                push("IP DSCP", dscp.to_string());
            }
            if let Some(ecn) = ip.ip_ecn {
                push("IP ECN", ecn.to_string());
            }
        }
        let addresses = [
            ("Source [IPv4]", &self.ipv4_source),
            ("Destination [IPv4]", &self.ipv4_destination),
            ("Source [IPv6]", &self.ipv6_source),
            ("Destination [IPv6]", &self.ipv6_destination),
        ];
        for (label, value) in addresses {
            if let Some(v) = value {
                push(label, v.clone());
            }
        }
        let ports = [
            ("Source [TCP]", self.tcp_source_port),
            ("Destination [TCP]", self.tcp_destination_port),
            ("Source [UDP]", self.udp_source_port),
            ("Destination [UDP]", self.udp_destination_port),
            ("Source [SCTP]", self.sctp_source_port),
            ("Destination [SCTP]", self.sctp_destination_port),
        ];
        for (label, value) in ports {
            if let Some(v) = value {
                push(label, v.to_string());
            }
        }
        if let Some(ref icmp) = self.icmpv4_match {
            if let Some(t) = icmp.icmpv4_type {
                push("ICMPv4 Type", t.to_string());
            }
            if let Some(c) = icmp.icmpv4_code {
                push("ICMPv4 Code", c.to_string());
            }
        }
        if let Some(ref icmp) = self.icmpv6_match {
            if let Some(t) = icmp.icmpv6_type {
                push("ICMPv6 Type", t.to_string());
            }
            if let Some(c) = icmp.icmpv6_code {
                push("ICMPv6 Code", c.to_string());
            }
        }
        for (key, value) in &self.other {
            push(key, value.to_string());
        }
        out
    }
}

impl fmt::Display for Match {
    /// One criterion per line, each prefixed with a newline and a tab.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (label, value) in self.criteria() {
            write!(f, "\n\t{label} = {value}")?;
        }
        Ok(())
    }
}

/// Layer 3 protocol selector for [`MatchBuilder::layer3`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum L3Protocol {
    Ipv4,
    Ipv6,
    /// Any other protocol, matched by its IP protocol number.
    Number(u8),
}

impl FromStr for L3Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        let number = match lower.as_str() {
            "ipv4" => return Ok(L3Protocol::Ipv4),
            "ipv6" => return Ok(L3Protocol::Ipv6),
            "icmp" => 1,
            "tcp" => 6,
            "udp" => 17,
            "icmpv6" => 58,
            "sctp" => 132,
            other => other
                .parse::<u8>()
                .map_err(|_| format!("unknown layer 3 protocol: {s}"))?,
        };
        Ok(L3Protocol::Number(number))
    }
}

/// Accumulates criteria and produces an immutable [`Match`].
#[derive(Debug, Clone, Default)]
pub struct MatchBuilder {
    data: Match,
}

impl MatchBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ingress_port(mut self, in_port: Option<&str>, in_physical_port: Option<&str>) -> Self {
        if let Some(p) = in_port {
            self.data.in_port = Some(p.to_string());
        }
        if let Some(p) = in_physical_port {
            self.data.in_phy_port = Some(p.to_string());
        }
        self
    }

    /// Replaces the ethernet criteria group.
    pub fn ethernet(
        mut self,
        ether_type: Option<u16>,
        source: Option<&str>,
        destination: Option<&str>,
    ) -> Self {
        self.data.ethernet_match = Some(EthernetMatch {
            ethernet_source: source.map(|a| MacAddress { address: a.to_string() }),
            ethernet_destination: destination.map(|a| MacAddress { address: a.to_string() }),
            ethernet_type: ether_type.map(|t| EthernetType { ether_type: t }),
        });
        self
    }

    pub fn layer3(
        mut self,
        protocol: L3Protocol,
        source: Option<&str>,
        destination: Option<&str>,
    ) -> Self {
        match protocol {
            L3Protocol::Ipv4 => {
                if let Some(s) = source {
                    self.data.ipv4_source = Some(s.to_string());
                }
                if let Some(d) = destination {
                    self.data.ipv4_destination = Some(d.to_string());
                }
            }
            L3Protocol::Ipv6 => {
                if let Some(s) = source {
                    self.data.ipv6_source = Some(s.to_string());
                }
                if let Some(d) = destination {
                    self.data.ipv6_destination = Some(d.to_string());
                }
            }
            L3Protocol::Number(n) => {
                self.data.ip_match.get_or_insert_with(IpMatch::default).ip_protocol = Some(n);
            }
        }
        self
    }

    /// Ports are only recorded for `tcp`, `udp` and `sctp`.
    pub fn layer4(mut self, protocol: &str, source: Option<u16>, destination: Option<u16>) -> Self {
        let (src_slot, dst_slot) = match protocol {
            "tcp" => (
                &mut self.data.tcp_source_port,
                &mut self.data.tcp_destination_port,
            ),
            "udp" => (
                &mut self.data.udp_source_port,
                &mut self.data.udp_destination_port,
            ),
            "sctp" => (
                &mut self.data.sctp_source_port,
                &mut self.data.sctp_destination_port,
            ),
            other => {
                debug!("Ignoring layer 4 criterion for protocol '{}'", other);
                return self;
            }
        };
        if source.is_some() {
            *src_slot = source;
        }
        if destination.is_some() {
            *dst_slot = destination;
        }
        self
    }

    /// A version token containing "6" selects ICMPv6, anything else ICMPv4.
    pub fn icmp(mut self, version: &str, icmp_type: Option<u8>, icmp_code: Option<u8>) -> Self {
        if version.contains('6') {
            self.data.icmpv6_match = Some(Icmpv6Match {
                icmpv6_type: icmp_type,
                icmpv6_code: icmp_code,
            });
        } else {
            self.data.icmpv4_match = Some(Icmpv4Match {
                icmpv4_type: icmp_type,
                icmpv4_code: icmp_code,
            });
        }
        self
    }

    pub fn build(self) -> Match {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    mod builder_tests {
        use super::*;

        #[test]
        fn test_ethernet_criteria_serialize_to_controller_layout() {
            let m = MatchBuilder::new()
                .ethernet(Some(0x0800), Some("00:00:00:00:00:01"), None)
                .build();
            assert_eq!(
                serde_json::to_value(&m).unwrap(),
                json!({
                    "ethernet-match": {
                        "ethernet-source": {"address": "00:00:00:00:00:01"},
                        "ethernet-type": {"type": 2048}
                    }
                })
            );
        }

        #[test]
        fn test_layer3_ip_versions_use_qualified_fields() {
            let m = MatchBuilder::new()
                .layer3(L3Protocol::Ipv6, Some("fe80::1/128"), Some("fe80::2/128"))
                .build();
            assert_eq!(m.ipv6_source.as_deref(), Some("fe80::1/128"));
            assert_eq!(m.ipv6_destination.as_deref(), Some("fe80::2/128"));
            assert!(m.ipv4_source.is_none());
            assert!(m.ip_match.is_none());
        }

        #[test]
        fn test_layer3_other_protocol_becomes_protocol_number() {
            let proto: L3Protocol = "tcp".parse().unwrap();
            let m = MatchBuilder::new()
                .layer3(proto, Some("10.0.0.1/32"), None)
                .build();
            assert_eq!(m.ip_match.unwrap().ip_protocol, Some(6));
            assert!(m.ipv4_source.is_none());
        }

        #[test]
        fn test_l3_protocol_parse() {
            assert_eq!("IPv4".parse::<L3Protocol>(), Ok(L3Protocol::Ipv4));
            assert_eq!("47".parse::<L3Protocol>(), Ok(L3Protocol::Number(47)));
            assert!("bogus".parse::<L3Protocol>().is_err());
        }

        #[test]
        fn test_layer4_ignores_unsupported_protocols() {
            let m = MatchBuilder::new()
                .layer4("icmp", Some(1), Some(2))
                .layer4("udp", None, Some(53))
                .build();
            assert_eq!(m.udp_destination_port, Some(53));
            assert!(m.udp_source_port.is_none());
            assert_eq!(m.criteria().len(), 1);
        }

        #[test]
        fn test_icmp_version_detection() {
            let m = MatchBuilder::new().icmp("v6", Some(128), Some(0)).build();
            assert_eq!(m.icmpv6_match.as_ref().unwrap().icmpv6_type, Some(128));
            assert!(m.icmpv4_match.is_none());

            let m = MatchBuilder::new().icmp("4", Some(8), None).build();
            assert_eq!(m.icmpv4_match.unwrap().icmpv4_type, Some(8));
        }
    }

    mod render_tests {
        use super::*;

        #[test]
        fn test_ether_type_rendered_in_hex() {
            let m = MatchBuilder::new().ethernet(Some(ETHERTYPE_LLDP), None, None).build();
            assert_eq!(m.to_string(), "\n\tEthernet Frame Type = 0x88cc");
        }

        #[test]
        fn test_unknown_criteria_survive_decoding() {
            let raw = json!({
                "in-port": "openflow:1:1",
                "vlan-match": {"vlan-id": {"vlan-id": 10}}
            });
            let m: Match = serde_json::from_value(raw.clone()).unwrap();
            assert_eq!(m.in_port.as_deref(), Some("openflow:1:1"));
            assert!(m.other.contains_key("vlan-match"));
            assert_eq!(serde_json::to_value(&m).unwrap(), raw);
        }

        #[test]
        fn test_empty_match() {
            let m = Match::default();
            assert!(m.is_empty());
            assert_eq!(m.to_string(), "");
        }
    }
}
