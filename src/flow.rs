//! Flow entries and flow tables.
//!
//! A [`Flow`] is built once through [`FlowBuilder`] (or one of the convenience
//! constructors) and then treated as an immutable value. The (match, priority)
//! pair identifies an entry on a table; two entries sharing both have undefined
//! precedence on the switch.
//!
//! [`Table`] keeps the raw flow list it was decoded from and re-derives its
//! flows on every call to [`Table::flows`].

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use tracing::warn;

use crate::criteria::{Match, MatchBuilder, ETHERTYPE_LLDP};
use crate::error::SdnError;
use crate::instruction::{ActionList, InstructionSet, InstructionSetBuilder, CONTROLLER_PORT};

/// Priority used by [`lldp_flow`].
pub const LLDP_PRIORITY: u16 = 100;

pub(crate) const FLOW_STATISTICS_KEY: &str = "opendaylight-flow-statistics:flow-statistics";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowDuration {
    pub second: u64,
    pub nanosecond: u64,
}

impl FlowDuration {
    pub fn as_secs_f64(&self) -> f64 {
        self.second as f64 + self.nanosecond as f64 * 1e-9
    }
}

/// Counters reported by the switch for an installed entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct FlowStatistics {
    #[serde(default)]
    pub packet_count: Option<u64>,
    #[serde(default)]
    pub byte_count: Option<u64>,
    #[serde(default)]
    pub duration: Option<FlowDuration>,
}

/// One flow entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Flow {
    pub id: String,
    #[serde(rename = "flow-name", default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idle_timeout: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hard_timeout: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cookie: Option<u64>,
    #[serde(rename = "table_id", default, skip_serializing_if = "Option::is_none")]
    pub table_id: Option<u8>,
    #[serde(rename = "match", default)]
    pub criteria: Match,
    #[serde(default, skip_serializing_if = "InstructionSet::is_empty")]
    pub instructions: InstructionSet,
    #[serde(
        rename = "opendaylight-flow-statistics:flow-statistics",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub statistics: Option<FlowStatistics>,
}

impl Flow {
    pub fn builder(id: impl Into<String>) -> FlowBuilder {
        FlowBuilder::new(id)
    }

    /// Display name, falling back to the id.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    /// Controller payload for this flow placed on `table_id`.
    pub fn to_payload(&self, table_id: u8) -> Result<Value, SdnError> {
        let mut value = serde_json::to_value(self)?;
        if let Value::Object(ref mut map) = value {
            map.remove(FLOW_STATISTICS_KEY);
            map.insert("table_id".into(), Value::from(table_id));
        }
        Ok(value)
    }
}

fn opt<T: fmt::Display>(value: &Option<T>) -> String {
    value.as_ref().map_or_else(|| "-".to_string(), |v| v.to_string())
}

impl fmt::Display for Flow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "-----  FLOW {:>12}  -----", self.display_name())?;
        writeln!(f, "ID           : {}", self.id)?;
        writeln!(f, "Priority     : {}", opt(&self.priority))?;
        writeln!(
            f,
            "Timeout      : [idle] {} / [hard] {}",
            opt(&self.idle_timeout),
            opt(&self.hard_timeout)
        )?;
        if let Some(ref stats) = self.statistics {
            let duration = stats.duration.map(|d| d.as_secs_f64());
            writeln!(
                f,
                "Statistics   : [Packets = {}] [Bytes = {}] [Duration = {}s]",
                opt(&stats.packet_count),
                opt(&stats.byte_count),
                opt(&duration)
            )?;
        }
        writeln!(f, "Matches      :{}", self.criteria)?;
        writeln!(f, "Instructions :")?;
        for (order, instruction) in self.instructions.iter().enumerate() {
            writeln!(f, "+ [{order:>2}]: {instruction}")?;
        }
        Ok(())
    }
}

/// Accumulates the parts of a flow entry.
#[derive(Debug, Clone)]
pub struct FlowBuilder {
    id: String,
    name: Option<String>,
    priority: Option<u16>,
    idle_timeout: Option<u16>,
    hard_timeout: Option<u16>,
    cookie: Option<u64>,
    criteria: Match,
    instructions: InstructionSetBuilder,
}

impl FlowBuilder {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            priority: None,
            idle_timeout: None,
            hard_timeout: None,
            cookie: None,
            criteria: Match::default(),
            instructions: InstructionSetBuilder::default(),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn priority(mut self, priority: u16) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn idle_timeout(mut self, seconds: u16) -> Self {
        self.idle_timeout = Some(seconds);
        self
    }

    pub fn hard_timeout(mut self, seconds: u16) -> Self {
        self.hard_timeout = Some(seconds);
        self
    }

    pub fn cookie(mut self, cookie: u64) -> Self {
        self.cookie = Some(cookie);
        self
    }

    pub fn with_match(mut self, criteria: Match) -> Self {
        self.criteria = criteria;
        self
    }

    pub fn apply_actions(mut self, actions: ActionList) -> Self {
        self.instructions = self.instructions.apply_actions(actions);
        self
    }

    pub fn clear_actions(mut self, actions: ActionList) -> Self {
        self.instructions = self.instructions.clear_actions(actions);
        self
    }

    pub fn write_actions(mut self, actions: ActionList) -> Self {
        self.instructions = self.instructions.write_actions(actions);
        self
    }

    pub fn goto_table(mut self, table_id: u8) -> Self {
        self.instructions = self.instructions.goto_table(table_id);
        self
    }

    pub fn build(self) -> Flow {
        Flow {
            id: self.id,
            name: self.name,
            priority: self.priority,
            idle_timeout: self.idle_timeout,
            hard_timeout: self.hard_timeout,
            cookie: self.cookie,
            table_id: None,
            criteria: self.criteria,
            instructions: self.instructions.build(),
            statistics: None,
        }
    }
}

/// Forwards `src_mac -> dest_mac` traffic out of `out_port`, never expiring.
pub fn basic_flow(
    id: &str,
    src_mac: &str,
    dest_mac: &str,
    out_port: impl fmt::Display,
    name: Option<&str>,
    priority: u16,
) -> Flow {
    let mut builder = FlowBuilder::new(id)
        .priority(priority)
        .idle_timeout(0)
        .hard_timeout(0)
        .with_match(
            MatchBuilder::new()
                .ethernet(None, Some(src_mac), Some(dest_mac))
                .build(),
        )
        .apply_actions(ActionList::new().output(out_port));
    if let Some(n) = name {
        builder = builder.name(n);
    }
    builder.build()
}

/// Drops traffic between the given MACs (either side may be a wildcard).
pub fn drop_flow(
    id: &str,
    src_mac: Option<&str>,
    dest_mac: Option<&str>,
    name: Option<&str>,
    priority: u16,
) -> Flow {
    let mut builder = FlowBuilder::new(id)
        .priority(priority)
        .idle_timeout(0)
        .hard_timeout(0)
        .with_match(MatchBuilder::new().ethernet(None, src_mac, dest_mac).build())
        .apply_actions(ActionList::new().drop_packet());
    if let Some(n) = name {
        builder = builder.name(n);
    }
    builder.build()
}

/// Sends LLDP frames to the controller.
pub fn lldp_flow(id: &str) -> Flow {
    FlowBuilder::new(id)
        .priority(LLDP_PRIORITY)
        .with_match(MatchBuilder::new().ethernet(Some(ETHERTYPE_LLDP), None, None).build())
        .apply_actions(ActionList::new().output(CONTROLLER_PORT))
        .build()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TableStatistics {
    #[serde(default)]
    pub active_flows: Option<u64>,
    #[serde(default)]
    pub packets_looked_up: Option<u64>,
    #[serde(default)]
    pub packets_matched: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct TableEntry {
    id: u8,
    #[serde(default)]
    name: Option<String>,
    #[serde(rename = "opendaylight-flow-table-statistics:flow-table-statistics", default)]
    statistics: Option<TableStatistics>,
    #[serde(default)]
    flow: Option<Vec<Value>>,
}

/// A switch flow table decoded from its raw inventory entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub id: u8,
    pub name: String,
    pub statistics: Option<TableStatistics>,
    raw_flows: Option<Vec<Value>>,
}

impl Table {
    pub fn from_value(value: &Value) -> Result<Self, SdnError> {
        let entry: TableEntry = serde_json::from_value(value.clone())
            .map_err(|e| SdnError::Structural(format!("table entry: {e}")))?;
        Ok(Self {
            id: entry.id,
            name: entry.name.unwrap_or_else(|| entry.id.to_string()),
            statistics: entry.statistics,
            raw_flows: entry.flow,
        })
    }

    /// True when the inventory entry carries a flow list.
    pub fn is_active(&self) -> bool {
        self.raw_flows.is_some()
    }

    /// Flows keyed by id, decoded afresh on every call.
    pub fn flows(&self) -> BTreeMap<String, Flow> {
        let mut flows = BTreeMap::new();
        for raw in self.raw_flows.iter().flatten() {
            match serde_json::from_value::<Flow>(raw.clone()) {
                Ok(flow) => {
                    flows.insert(flow.id.clone(), flow);
                }
                Err(e) => warn!("Skipping undecodable flow in table {}: {}", self.id, e),
            }
        }
        flows
    }

    pub fn flow(&self, flow_id: &str) -> Option<Flow> {
        self.flows().remove(flow_id)
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:>6} [{:>4}]: ", "TABLE", self.id)?;
        if let Some(ref stat) = self.statistics {
            write!(
                f,
                "[Active Flows = {}] [PKT Looked Up = {}] [PKT Matched = {}] ",
                opt(&stat.active_flows),
                opt(&stat.packets_looked_up),
                opt(&stat.packets_matched)
            )?;
        }
        let flows = self.flows();
        if !flows.is_empty() {
            write!(f, "Flows: {}", flows.keys().join(", "))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::{ActionKind, InstructionKind};
    use serde_json::json;

    mod constructor_tests {
        use super::*;
        use pretty_assertions::assert_eq;

        #[test]
        fn test_basic_flow_is_persistent_forwarding() {
            let flow = basic_flow("h01-h02-go", "00:00:00:00:00:01", "00:00:00:00:00:02", 3, None, 5);
            assert_eq!(flow.priority, Some(5));
            assert_eq!(flow.idle_timeout, Some(0));
            assert_eq!(flow.hard_timeout, Some(0));
            let eth = flow.criteria.ethernet_match.as_ref().unwrap();
            assert_eq!(eth.ethernet_source.as_ref().unwrap().address, "00:00:00:00:00:01");
            assert_eq!(eth.ethernet_destination.as_ref().unwrap().address, "00:00:00:00:00:02");
            let apply = flow.instructions.get(InstructionKind::ApplyActions).unwrap();
            assert_eq!(
                apply.actions()[0].kind,
                ActionKind::Output {
                    port: "3".into(),
                    max_length: 65535
                }
            );
        }

        #[test]
        fn test_drop_flow_with_wildcard_source() {
            let flow = drop_flow("drop", None, Some("00:00:00:00:00:02"), Some("block"), 7);
            assert_eq!(flow.display_name(), "block");
            let eth = flow.criteria.ethernet_match.as_ref().unwrap();
            assert!(eth.ethernet_source.is_none());
            let apply = flow.instructions.get(InstructionKind::ApplyActions).unwrap();
            assert_eq!(apply.actions()[0].kind, ActionKind::Drop {});
        }

        #[test]
        fn test_lldp_flow_targets_controller() {
            let flow = lldp_flow("hello");
            assert_eq!(flow.priority, Some(LLDP_PRIORITY));
            assert!(flow.idle_timeout.is_none());
            assert!(flow.hard_timeout.is_none());
            assert_eq!(
                flow.criteria
                    .ethernet_match
                    .as_ref()
                    .and_then(|e| e.ethernet_type)
                    .map(|t| t.ether_type),
                Some(0x88CC)
            );
            let apply = flow.instructions.get(InstructionKind::ApplyActions).unwrap();
            assert_eq!(
                apply.actions()[0].kind,
                ActionKind::Output {
                    port: "CONTROLLER".into(),
                    max_length: 65535
                }
            );
        }
    }

    mod round_trip_tests {
        use super::*;
        use pretty_assertions::assert_eq;

        #[test]
        fn test_decoded_flow_renders_like_built_flow() {
            let flow = FlowBuilder::new("f1")
                .priority(10)
                .goto_table(1)
                .write_actions(ActionList::new().decrement_ttl())
                .with_match(
                    MatchBuilder::new()
                        .ingress_port(Some("openflow:1:2"), None)
                        .layer4("tcp", Some(1000), Some(80))
                        .build(),
                )
                .apply_actions(ActionList::new().output(2))
                .build();

            let decoded: Flow = serde_json::from_value(serde_json::to_value(&flow).unwrap()).unwrap();
            assert_eq!(decoded, flow);
            assert_eq!(decoded.criteria.criteria(), flow.criteria.criteria());
            let kinds: Vec<_> = decoded.instructions.iter().map(|i| i.kind()).collect();
            assert_eq!(
                kinds,
                vec![
                    InstructionKind::ApplyActions,
                    InstructionKind::WriteActions,
                    InstructionKind::GotoTable
                ]
            );
        }

        #[test]
        fn test_payload_carries_table_and_drops_statistics() {
            let mut flow = basic_flow("x", "a", "b", 1, None, 0);
            flow.statistics = Some(FlowStatistics::default());
            let payload = flow.to_payload(4).unwrap();
            assert_eq!(payload["table_id"], json!(4));
            assert!(payload.get(FLOW_STATISTICS_KEY).is_none());
        }
    }

    mod render_tests {
        use super::*;
        use pretty_assertions::assert_eq;

        #[test]
        fn test_flow_summary() {
            let mut flow = basic_flow("h01-h02-go", "m1", "m2", 2, None, 5);
            flow.statistics = Some(FlowStatistics {
                packet_count: Some(12),
                byte_count: Some(1024),
                duration: Some(FlowDuration {
                    second: 3,
                    nanosecond: 500_000_000,
                }),
            });
            let expected = "\
-----  FLOW   h01-h02-go  -----
ID           : h01-h02-go
Priority     : 5
Timeout      : [idle] 0 / [hard] 0
Statistics   : [Packets = 12] [Bytes = 1024] [Duration = 3.5s]
Matches      :
\tSource [Ethernet] = m1
\tDestination [Ethernet] = m2
Instructions :
+ [ 0]: APPLY ACTIONS:
\t[ 0]: OUTPUT [To = 2] [Max Length = 65535]
";
            assert_eq!(flow.to_string(), expected);
        }

        #[test]
        fn test_table_summary_and_lazy_flows() {
            let raw = json!({
                "id": 0,
                "opendaylight-flow-table-statistics:flow-table-statistics": {
                    "active-flows": 2, "packets-looked-up": 40, "packets-matched": 38
                },
                "flow": [
                    {"id": "b", "priority": 1, "match": {}},
                    {"id": "a", "priority": 2, "match": {}},
                    {"priority": 3}
                ]
            });
            let table = Table::from_value(&raw).unwrap();
            assert!(table.is_active());
            assert_eq!(table.name, "0");
            assert_eq!(table.flows().len(), 2);
            assert_eq!(table.flow("a").unwrap().priority, Some(2));
            assert_eq!(
                table.to_string(),
                " TABLE [   0]: [Active Flows = 2] [PKT Looked Up = 40] [PKT Matched = 38] Flows: a, b"
            );
        }

        #[test]
        fn test_flow_with_unmodelled_action_stays_listed() {
            let raw = json!({
                "id": 0,
                "flow": [{
                    "id": "vlan",
                    "priority": 9,
                    "match": {},
                    "instructions": {"instruction": [
                        {"order": 0, "write-metadata": {"metadata": 1, "metadata-mask": 1}},
                        {"order": 1, "apply-actions": {"action": [
                            {"order": 0, "push-vlan-action": {"ethernet-type": 33024}}
                        ]}}
                    ]}
                }]
            });
            let table = Table::from_value(&raw).unwrap();
            let flow = table.flow("vlan").unwrap();
            assert_eq!(flow.instructions.len(), 2);
            let apply = flow.instructions.get(InstructionKind::ApplyActions).unwrap();
            assert!(matches!(apply.actions()[0].kind, ActionKind::Unsupported(ref m) if m.contains_key("push-vlan-action")));
        }

        #[test]
        fn test_table_without_id_is_structural_error() {
            let err = Table::from_value(&json!({"flow": []})).unwrap_err();
            assert!(matches!(err, SdnError::Structural(_)));
        }
    }
}
