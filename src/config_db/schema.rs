//! Wire schema of the configuration-database records.
//!
//! The database file is a stream of length-prefixed records (see
//! [`crate::config_db::ConfigDatabase::parse`]); each record is the bincode
//! little-endian encoding of one of the structs below. The first record is a
//! [`Header`], all following records are [`Packet`]s.

use serde::{Deserialize, Serialize};

use crate::bits::{Action, SliceAction};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub width: u32,
    pub height: u32,
    pub node_size: u64,
    pub signature: u64,
    pub action: Option<HeaderAction>,
}

/// Family-specific header extension. For the bitchain circuitry this
/// carries the total device bitstream length in bits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderAction {
    pub total_size: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Packet {
    pub blocks: Vec<BlockMsg>,
    pub placements: Vec<PlacementMsg>,
    pub edges: Vec<EdgeMsg>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockMsg {
    pub name: String,
    pub ports: Vec<PortMsg>,
    pub instances: Vec<InstanceMsg>,
    pub action: Option<BlockAction>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockAction {
    pub config_size: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMsg {
    pub name: String,
    pub bits: Vec<PortBitMsg>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortBitMsg {
    pub connections: Vec<ConnectionMsg>,
}

/// One possible driver of a port bit. `input` is the connection name as it
/// appears in packing results; `action` is absent for connections that need
/// no configuration (e.g. the only driver of a hardwired bit).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionMsg {
    pub input: String,
    pub action: Option<ConnectionAction>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionAction {
    pub actions: Vec<Action>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceMsg {
    pub name: String,
    /// Raw instance type, decoded with `InstanceType::try_from`.
    pub kind: u32,
    pub ports: Vec<PortMsg>,
    pub modes: Vec<ModeMsg>,
    pub action: Option<InstanceAction>,
}

/// LUT-only instance extension: how the rotated truth table lands in the
/// block configuration vector.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceAction {
    pub lut_actions: Vec<SliceAction>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeMsg {
    pub name: String,
    pub action: Option<ModeAction>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeAction {
    pub actions: Vec<Action>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementMsg {
    pub x: u32,
    pub y: u32,
    pub subblock: u32,
    pub action: Option<PlacementAction>,
}

/// Copies slices of a placed block-instance vector into the device
/// bitstream.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementAction {
    pub actions: Vec<SliceAction>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeMsg {
    pub src: u64,
    pub sink: u64,
    pub action: Option<RoutingAction>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingAction {
    pub actions: Vec<Action>,
}
