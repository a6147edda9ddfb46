//! Instructions and actions attached to a flow entry.
//!
//! An instruction set holds at most one instruction of each kind, and a switch
//! executes them as Apply-Actions, Clear-Actions, Write-Actions, Goto-Table no
//! matter how they were authored. [`InstructionSet`] stores one slot per kind, so
//! that order and the one-per-kind rule hold by construction. Action lists keep
//! the order they were written in through the explicit `order` field every
//! action carries on the wire.
//!
//! Kinds this crate does not model (`set-field`, `meter`, ...) are kept as raw
//! JSON so flows read from a switch still decode and re-encode unchanged.

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::net::IpAddr;
use tracing::{debug, warn};

/// Default `max-length` of an output action.
pub const DEFAULT_MAX_LENGTH: u16 = 65535;

/// Logical port that hands a packet to the controller.
pub const CONTROLLER_PORT: &str = "CONTROLLER";

fn default_max_length() -> u16 {
    DEFAULT_MAX_LENGTH
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NextHop {
    #[serde(rename = "ipv4-address")]
    V4(String),
    #[serde(rename = "ipv6-address")]
    V6(String),
}

impl From<IpAddr> for NextHop {
    fn from(addr: IpAddr) -> Self {
        match addr {
            IpAddr::V4(a) => NextHop::V4(a.to_string()),
            IpAddr::V6(a) => NextHop::V6(a.to_string()),
        }
    }
}

/// A single packet operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionKind {
    #[serde(rename = "output-action")]
    Output {
        #[serde(rename = "output-node-connector")]
        port: String,
        #[serde(rename = "max-length", default = "default_max_length")]
        max_length: u16,
    },
    #[serde(rename = "drop-action")]
    Drop {},
    #[serde(rename = "dec-nw-ttl")]
    DecrementTtl {},
    #[serde(rename = "set-nw-ttl-action")]
    SetTtl {
        #[serde(rename = "nw-ttl")]
        ttl: u8,
    },
    #[serde(rename = "set-next-hop-action")]
    SetNextHop(NextHop),
    #[serde(rename = "loopback-action")]
    Loopback {},
    /// Any other action, as found on the wire.
    #[serde(untagged)]
    Unsupported(Map<String, Value>),
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionKind::Output { port, max_length } => {
                write!(f, "OUTPUT [To = {port}] [Max Length = {max_length}]")
            }
            ActionKind::Drop {} => write!(f, "DROP"),
            ActionKind::DecrementTtl {} => write!(f, "DECREMENT TTL"),
            ActionKind::SetTtl { ttl } => write!(f, "SET TTL [TTL = {ttl}]"),
            ActionKind::SetNextHop(NextHop::V4(a) | NextHop::V6(a)) => {
                write!(f, "SET NEXT HOP [Address = {a}]")
            }
            ActionKind::Loopback {} => write!(f, "LOOP BACK"),
            ActionKind::Unsupported(raw) => write!(f, "UNSUPPORTED [{}]", raw.keys().join(", ")),
        }
    }
}

/// An action together with its position in the enclosing list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub order: u32,
    #[serde(flatten)]
    pub kind: ActionKind,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:>2}]: {}", self.order, self.kind)
    }
}

/// Ordered list of actions under construction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionList {
    actions: Vec<ActionKind>,
}

impl ActionList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn output(self, port: impl fmt::Display) -> Self {
        self.output_with_max_length(port, DEFAULT_MAX_LENGTH)
    }

    pub fn output_with_max_length(mut self, port: impl fmt::Display, max_length: u16) -> Self {
        self.actions.push(ActionKind::Output {
            port: port.to_string(),
            max_length,
        });
        self
    }

    pub fn drop_packet(mut self) -> Self {
        self.actions.push(ActionKind::Drop {});
        self
    }

    pub fn decrement_ttl(mut self) -> Self {
        self.actions.push(ActionKind::DecrementTtl {});
        self
    }

    pub fn set_ttl(mut self, ttl: u8) -> Self {
        self.actions.push(ActionKind::SetTtl { ttl });
        self
    }

    pub fn set_next_hop(mut self, addr: IpAddr) -> Self {
        self.actions.push(ActionKind::SetNextHop(addr.into()));
        self
    }

    pub fn loopback(mut self) -> Self {
        self.actions.push(ActionKind::Loopback {});
        self
    }

    pub fn push(mut self, kind: ActionKind) -> Self {
        self.actions.push(kind);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

/// Kinds of instruction, listed in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum InstructionKind {
    ApplyActions,
    ClearActions,
    WriteActions,
    GotoTable,
    /// Instructions outside the four modelled kinds; they run after them.
    Unsupported,
}

impl InstructionKind {
    pub const EXECUTION_ORDER: [InstructionKind; 4] = [
        InstructionKind::ApplyActions,
        InstructionKind::ClearActions,
        InstructionKind::WriteActions,
        InstructionKind::GotoTable,
    ];

    pub fn label(self) -> &'static str {
        match self {
            InstructionKind::ApplyActions => "APPLY ACTIONS",
            InstructionKind::ClearActions => "CLEAR ACTIONS",
            InstructionKind::WriteActions => "WRITE ACTIONS",
            InstructionKind::GotoTable => "GO TO TABLE",
            InstructionKind::Unsupported => "UNSUPPORTED",
        }
    }
}

/// A borrowed view of one instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction<'a> {
    ApplyActions(&'a [Action]),
    ClearActions(&'a [Action]),
    WriteActions(&'a [Action]),
    GotoTable(u8),
    Unsupported(&'a Map<String, Value>),
}

impl Instruction<'_> {
    pub fn kind(&self) -> InstructionKind {
        match self {
            Instruction::ApplyActions(_) => InstructionKind::ApplyActions,
            Instruction::ClearActions(_) => InstructionKind::ClearActions,
            Instruction::WriteActions(_) => InstructionKind::WriteActions,
            Instruction::GotoTable(_) => InstructionKind::GotoTable,
            Instruction::Unsupported(_) => InstructionKind::Unsupported,
        }
    }

    pub fn actions(&self) -> &[Action] {
        match self {
            Instruction::ApplyActions(a)
            | Instruction::ClearActions(a)
            | Instruction::WriteActions(a) => *a,
            Instruction::GotoTable(_) | Instruction::Unsupported(_) => &[],
        }
    }
}

impl fmt::Display for Instruction<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::GotoTable(table) => write!(f, "{} {}", self.kind().label(), table),
            Instruction::Unsupported(raw) => {
                write!(f, "{} [{}]", self.kind().label(), raw.keys().join(", "))
            }
            _ => {
                write!(f, "{}:", self.kind().label())?;
                for action in self.actions() {
                    write!(f, "\n\t{action}")?;
                }
                Ok(())
            }
        }
    }
}

/// The instructions of one flow entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "WireInstructions", into = "WireInstructions")]
pub struct InstructionSet {
    apply: Option<Vec<Action>>,
    clear: Option<Vec<Action>>,
    write: Option<Vec<Action>>,
    goto_table: Option<u8>,
    unsupported: Vec<Map<String, Value>>,
}

impl InstructionSet {
    pub fn builder() -> InstructionSetBuilder {
        InstructionSetBuilder::default()
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn get(&self, kind: InstructionKind) -> Option<Instruction<'_>> {
        match kind {
            InstructionKind::ApplyActions => {
                self.apply.as_deref().map(Instruction::ApplyActions)
            }
            InstructionKind::ClearActions => {
                self.clear.as_deref().map(Instruction::ClearActions)
            }
            InstructionKind::WriteActions => {
                self.write.as_deref().map(Instruction::WriteActions)
            }
            InstructionKind::GotoTable => self.goto_table.map(Instruction::GotoTable),
            InstructionKind::Unsupported => self.unsupported.first().map(Instruction::Unsupported),
        }
    }

    /// Instructions in execution order, unsupported ones last in wire order.
    pub fn iter(&self) -> impl Iterator<Item = Instruction<'_>> {
        InstructionKind::EXECUTION_ORDER
            .into_iter()
            .filter_map(move |kind| self.get(kind))
            .chain(self.unsupported.iter().map(Instruction::Unsupported))
    }
}

/// Collects actions per instruction kind and assigns `order` on build.
#[derive(Debug, Clone, Default)]
pub struct InstructionSetBuilder {
    apply: Option<Vec<ActionKind>>,
    clear: Option<Vec<ActionKind>>,
    write: Option<Vec<ActionKind>>,
    goto_table: Option<u8>,
}

impl InstructionSetBuilder {
    /// Appends to the Apply-Actions instruction, creating it if needed.
    pub fn apply_actions(mut self, actions: ActionList) -> Self {
        self.apply.get_or_insert_with(Vec::new).extend(actions.actions);
        self
    }

    pub fn clear_actions(mut self, actions: ActionList) -> Self {
        self.clear.get_or_insert_with(Vec::new).extend(actions.actions);
        self
    }

    pub fn write_actions(mut self, actions: ActionList) -> Self {
        self.write.get_or_insert_with(Vec::new).extend(actions.actions);
        self
    }

    /// Replaces any previously set target table.
    pub fn goto_table(mut self, table_id: u8) -> Self {
        self.goto_table = Some(table_id);
        self
    }

    pub fn build(self) -> InstructionSet {
        fn number(kinds: Vec<ActionKind>) -> Vec<Action> {
            kinds
                .into_iter()
                .enumerate()
                .map(|(i, kind)| Action {
                    order: i as u32,
                    kind,
                })
                .collect()
        }
        InstructionSet {
            apply: self.apply.map(number),
            clear: self.clear.map(number),
            write: self.write.map(number),
            goto_table: self.goto_table,
            unsupported: Vec::new(),
        }
    }
}

// Wire layout: {"instruction": [{"order": 0, "apply-actions": {"action": [...]}}, ...]}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct WireInstructions {
    #[serde(default)]
    instruction: Vec<WireInstruction>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireInstruction {
    #[serde(default)]
    order: u32,
    #[serde(flatten)]
    body: WireInstructionBody,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct WireActionList {
    #[serde(default)]
    action: Vec<Action>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum WireInstructionBody {
    #[serde(rename = "apply-actions")]
    ApplyActions(WireActionList),
    #[serde(rename = "clear-actions")]
    ClearActions(WireActionList),
    #[serde(rename = "write-actions")]
    WriteActions(WireActionList),
    #[serde(rename = "go-to-table")]
    GotoTable {
        #[serde(rename = "table_id")]
        table_id: u8,
    },
    #[serde(untagged)]
    Unsupported(Map<String, Value>),
}

impl From<WireInstructions> for InstructionSet {
    fn from(wire: WireInstructions) -> Self {
        let mut set = InstructionSet::default();
        let sorted = |list: WireActionList| -> Vec<Action> {
            list.action.into_iter().sorted_by_key(|a| a.order).collect()
        };
        for ins in wire.instruction.into_iter().sorted_by_key(|i| i.order) {
            let slot_taken = match ins.body {
                WireInstructionBody::ApplyActions(list) => set.apply.replace(sorted(list)).is_some(),
                WireInstructionBody::ClearActions(list) => set.clear.replace(sorted(list)).is_some(),
                WireInstructionBody::WriteActions(list) => set.write.replace(sorted(list)).is_some(),
                WireInstructionBody::GotoTable { table_id } => {
                    set.goto_table.replace(table_id).is_some()
                }
                WireInstructionBody::Unsupported(raw) => {
                    debug!("Keeping unsupported instruction {:?}", raw.keys().collect::<Vec<_>>());
                    set.unsupported.push(raw);
                    false
                }
            };
            if slot_taken {
                warn!("Duplicate instruction kind at order {}, keeping the last", ins.order);
            }
        }
        set
    }
}

impl From<InstructionSet> for WireInstructions {
    fn from(set: InstructionSet) -> Self {
        let mut instruction = Vec::new();
        let bodies = [
            set.apply.map(|action| WireInstructionBody::ApplyActions(WireActionList { action })),
            set.clear.map(|action| WireInstructionBody::ClearActions(WireActionList { action })),
            set.write.map(|action| WireInstructionBody::WriteActions(WireActionList { action })),
            set.goto_table.map(|table_id| WireInstructionBody::GotoTable { table_id }),
        ];
        let unsupported = set.unsupported.into_iter().map(WireInstructionBody::Unsupported);
        for body in bodies.into_iter().flatten().chain(unsupported) {
            instruction.push(WireInstruction {
                order: instruction.len() as u32,
                body,
            });
        }
        WireInstructions { instruction }
    }
}
