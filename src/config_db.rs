//! Configuration-database loader and in-memory fabric model.
//!
//! The database file describes the programmable fabric: its block types
//! (ports, port bits, sub-instances, modes), the placement actions at every
//! fabric coordinate, and the routing graph. It is parsed exactly once into
//! a [`ConfigDatabase`], which stays immutable for the rest of the run.

pub mod graph;
pub mod schema;

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use log::{error, info, trace};
use num_enum::TryFromPrimitive;
use thiserror::Error;

use crate::bits::Action;
use graph::RoutingGraph;
use schema::{
    BlockAction, BlockMsg, Header, HeaderAction, InstanceAction, InstanceMsg, Packet,
    PlacementAction, PortBitMsg, PortMsg, RoutingAction,
};

/// `prgacfgm` in little-endian byte order; the first 8 bytes of every
/// configuration database file.
pub const DATABASE_MAGIC: u64 = 0x6d67_6663_6167_7270;

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("config database file error: {0}")]
    BadFile(String),
    #[error("unable to read a packet size")]
    BadPacketSize(#[source] std::io::Error),
    #[error("incomplete packet in the config database")]
    PacketIncomplete(#[source] std::io::Error),
    #[error("packet cannot be decoded")]
    PacketDecodeFailed(#[from] bincode::Error),
    #[error("duplicated block '{0}'")]
    BlockNameConflict(String),
    #[error("invalid block '{0}'")]
    InvalidBlock(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, TryFromPrimitive)]
#[repr(u32)]
pub enum InstanceType {
    Lut = 0,
    Multimode = 1,
    NonConfigurable = 2,
}

/// One bit of a port, with the configuration actions of every connection
/// that can drive it.
#[derive(Clone, Debug)]
pub struct PortBit {
    index: u32,
    connections: BTreeMap<String, Option<Vec<Action>>>,
}

impl PortBit {
    fn populate(index: u32, msg: PortBitMsg) -> Result<Self, String> {
        let mut connections = BTreeMap::new();
        for conn in msg.connections {
            let actions = conn.action.map(|a| a.actions);
            if connections.insert(conn.input.clone(), actions).is_some() {
                return Err(format!("duplicated connection '{}' on bit no. {index}", conn.input));
            }
        }
        Ok(Self { index, connections })
    }

    /// Configuration actions selecting the named connection. `None` when
    /// the connection needs no configuration; an unknown name (other than
    /// `"open"`) is logged and treated the same.
    pub fn connection_actions(&self, name: &str) -> Option<&[Action]> {
        match self.connections.get(name) {
            Some(Some(actions)) => Some(actions),
            Some(None) => None,
            None if name == "open" => None,
            None => {
                error!("[CONFIG] Bit no. {} does not have connection '{name}'", self.index);
                None
            }
        }
    }

    /// A bit with at most one possible driver has no configurable choice.
    pub fn is_hardwired(&self) -> bool {
        self.connections.len() <= 1
    }
}

#[derive(Clone, Debug)]
pub struct Port {
    name: String,
    bits: Vec<PortBit>,
}

impl Port {
    fn populate(msg: PortMsg) -> Result<Self, String> {
        let bits = msg
            .bits
            .into_iter()
            .enumerate()
            .map(|(i, bit)| PortBit::populate(i as u32, bit))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|reason| format!("port '{}': {reason}", msg.name))?;
        Ok(Self { name: msg.name, bits })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bit(&self, index: u32) -> Option<&PortBit> {
        let bit = self.bits.get(index as usize);
        if bit.is_none() {
            error!("[CONFIG] Port '{}' does not have bit no. {index}", self.name);
        }
        bit
    }
}

#[derive(Clone, Debug)]
pub struct Instance {
    name: String,
    kind: InstanceType,
    ports: BTreeMap<String, Port>,
    modes: BTreeMap<String, Option<Vec<Action>>>,
    action: Option<InstanceAction>,
}

impl Instance {
    fn populate(msg: InstanceMsg) -> Result<Self, String> {
        let kind = InstanceType::try_from(msg.kind)
            .map_err(|_| format!("instance '{}': unknown type {}", msg.name, msg.kind))?;

        let mut ports = BTreeMap::new();
        for port in msg.ports {
            let port = Port::populate(port).map_err(|reason| format!("instance '{}': {reason}", msg.name))?;
            if ports.contains_key(port.name()) {
                return Err(format!("duplicated port '{}' in instance '{}'", port.name(), msg.name));
            }
            ports.insert(port.name().to_owned(), port);
        }

        let mut modes = BTreeMap::new();
        for mode in msg.modes {
            let actions = mode.action.map(|a| a.actions);
            if modes.insert(mode.name.clone(), actions).is_some() {
                return Err(format!("duplicated mode '{}' in instance '{}'", mode.name, msg.name));
            }
        }

        Ok(Self {
            name: msg.name,
            kind,
            ports,
            modes,
            action: msg.action,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> InstanceType {
        self.kind
    }

    pub fn port(&self, name: &str) -> Option<&Port> {
        let port = self.ports.get(name);
        if port.is_none() {
            error!("[CONFIG] Instance '{}' does not have port '{name}'", self.name);
        }
        port
    }

    /// Actions of the named mode (multi-mode instances only). `None` both
    /// for a mode without actions and, with an error log, for an unknown
    /// mode.
    pub fn mode_actions(&self, name: &str) -> Option<&[Action]> {
        match self.modes.get(name) {
            Some(actions) => actions.as_deref(),
            None => {
                error!("[CONFIG] Instance '{}' does not have mode '{name}'", self.name);
                None
            }
        }
    }

    /// LUT instances only: how the rotated truth table lands in the block
    /// configuration vector.
    pub fn action(&self) -> Option<&InstanceAction> {
        self.action.as_ref()
    }
}

#[derive(Clone, Debug)]
pub struct Block {
    name: String,
    ports: BTreeMap<String, Port>,
    instances: BTreeMap<String, Instance>,
    action: Option<BlockAction>,
}

impl Block {
    fn populate(msg: BlockMsg) -> Result<Self, String> {
        let mut ports = BTreeMap::new();
        for port in msg.ports {
            let port = Port::populate(port)?;
            if ports.contains_key(port.name()) {
                return Err(format!("duplicated port '{}'", port.name()));
            }
            ports.insert(port.name().to_owned(), port);
        }

        let mut instances = BTreeMap::new();
        for instance in msg.instances {
            let instance = Instance::populate(instance)?;
            if instances.contains_key(instance.name()) {
                return Err(format!("duplicated instance '{}'", instance.name()));
            }
            instances.insert(instance.name().to_owned(), instance);
        }

        Ok(Self {
            name: msg.name,
            ports,
            instances,
            action: msg.action,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn port(&self, name: &str) -> Option<&Port> {
        let port = self.ports.get(name);
        if port.is_none() {
            error!("[CONFIG] Block '{}' does not have port '{name}'", self.name);
        }
        port
    }

    pub fn instance(&self, name: &str) -> Option<&Instance> {
        let instance = self.instances.get(name);
        if instance.is_none() {
            error!("[CONFIG] Block '{}' does not have instance '{name}'", self.name);
        }
        instance
    }

    pub fn action(&self) -> Option<&BlockAction> {
        self.action.as_ref()
    }
}

/// The parsed configuration database. Immutable after [`parse`].
///
/// [`parse`]: ConfigDatabase::parse
#[derive(Clone, Debug)]
pub struct ConfigDatabase {
    width: u32,
    height: u32,
    signature: u64,
    action: Option<HeaderAction>,
    blocks: BTreeMap<String, Block>,
    // indexed [x][y][subblock]
    placement_actions: Vec<Vec<Vec<Vec<PlacementAction>>>>,
    graph: RoutingGraph,
}

impl ConfigDatabase {
    pub fn parse(path: impl AsRef<Path>) -> Result<Self, DatabaseError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|err| {
            error!("[CONFIG] Config database file error: {err}");
            DatabaseError::BadFile(format!("{}: {err}", path.display()))
        })?;
        Self::read(&mut BufReader::new(file))
    }

    pub fn read(input: &mut impl Read) -> Result<Self, DatabaseError> {
        let mut magic_raw = [0u8; 8];
        input.read_exact(&mut magic_raw).map_err(|err| {
            error!("[CONFIG] Unable to read 64-bit magic number");
            DatabaseError::BadFile(err.to_string())
        })?;
        let magic = u64::from_le_bytes(magic_raw);
        if magic != DATABASE_MAGIC {
            error!("[CONFIG] Not a valid configuration database (wrong magic number: {magic:#x})");
            return Err(DatabaseError::BadFile(format!("wrong magic number {magic:#x}")));
        }

        let header_size = read_record_size(input).map_err(|err| {
            error!("[CONFIG] Unable to read the header packet size");
            DatabaseError::BadPacketSize(err)
        })?;
        let buf = read_record(input, header_size)?;
        let header: Header = bincode::deserialize(&buf).map_err(|err| {
            error!("[CONFIG] Header packet cannot be decoded: {err}");
            DatabaseError::PacketDecodeFailed(err)
        })?;

        trace!(
            "[CONFIG] Size: {} x {}, node_size: {}",
            header.width,
            header.height,
            header.node_size
        );

        let mut db = Self {
            width: header.width,
            height: header.height,
            signature: header.signature,
            action: header.action,
            blocks: BTreeMap::new(),
            placement_actions: vec![vec![Vec::new(); header.height as usize]; header.width as usize],
            graph: RoutingGraph::new(header.node_size),
        };

        loop {
            let packet_size = read_record_size(input).map_err(|err| {
                error!("[CONFIG] Unexpected end of config database");
                DatabaseError::BadFile(err.to_string())
            })?;
            if packet_size == 0 {
                break;
            }
            trace!("[CONFIG] Next packet size: {packet_size}");

            let buf = read_record(input, packet_size)?;
            let packet: Packet = bincode::deserialize(&buf).map_err(|err| {
                error!("[CONFIG] Packet cannot be decoded: {err}");
                DatabaseError::PacketDecodeFailed(err)
            })?;
            db.load_packet(packet)?;
        }

        info!("[CONFIG] # blocks in config database: {}", db.blocks.len());
        info!("[CONFIG] # nodes in config database: {}", db.graph.num_nodes());
        info!("[CONFIG] # edges in config database: {}", db.graph.num_edges());

        Ok(db)
    }

    fn load_packet(&mut self, packet: Packet) -> Result<(), DatabaseError> {
        for block in packet.blocks {
            let name = block.name.clone();
            if self.blocks.contains_key(&name) {
                error!("[CONFIG] Duplicated block '{name}'");
                return Err(DatabaseError::BlockNameConflict(name));
            }
            let block = Block::populate(block).map_err(|reason| {
                error!("[CONFIG] Invalid block '{name}': {reason}");
                DatabaseError::InvalidBlock(name.clone())
            })?;
            self.blocks.insert(name, block);
        }

        for placement in packet.placements {
            if placement.x >= self.width || placement.y >= self.height {
                error!(
                    "[CONFIG] Placement rule ({}, {}) beyond the grid ({} x {})",
                    placement.x, placement.y, self.width, self.height
                );
                return Err(DatabaseError::BadFile(format!(
                    "placement ({}, {}) beyond the grid",
                    placement.x, placement.y
                )));
            }
            let slots = &mut self.placement_actions[placement.x as usize][placement.y as usize];
            if placement.subblock as usize >= slots.len() {
                slots.resize(placement.subblock as usize + 1, Vec::new());
            }
            if let Some(action) = placement.action {
                slots[placement.subblock as usize].push(action);
            }
        }

        for edge in packet.edges {
            if !self.graph.add_edge(edge.src, edge.sink, edge.action) {
                return Err(DatabaseError::BadFile(format!(
                    "routing edge ({}, {}) beyond the node count",
                    edge.src, edge.sink
                )));
            }
        }

        Ok(())
    }

    pub fn signature(&self) -> u64 {
        self.signature
    }

    pub fn header_action(&self) -> Option<&HeaderAction> {
        self.action.as_ref()
    }

    pub fn block(&self, name: &str) -> Option<&Block> {
        self.blocks.get(name)
    }

    pub fn blocks(&self) -> &BTreeMap<String, Block> {
        &self.blocks
    }

    /// Placement actions for the subblock at `(x, y)`. `None` means either
    /// an empty tile (nothing to configure) or, with an error log, a query
    /// beyond the grid or the tile's subblock count.
    pub fn placement_actions(&self, x: u32, y: u32, subblock: u32) -> Option<&[PlacementAction]> {
        if x >= self.width || y >= self.height {
            error!(
                "[CONFIG] Querying placement actions at position ({x}, {y}) beyond the grid ({} x {})",
                self.width, self.height
            );
            return None;
        }

        let slots = &self.placement_actions[x as usize][y as usize];
        if slots.is_empty() {
            // either this placement does not matter to the bitstream, or
            // this tile is empty
            return None;
        }

        if subblock as usize >= slots.len() {
            error!(
                "[CONFIG] Querying placement actions at position ({x}, {y}) for subblock {subblock} beyond number of subblocks ({})",
                slots.len()
            );
            return None;
        }
        Some(&slots[subblock as usize])
    }

    pub fn edge_actions(&self, src: u64, sink: u64) -> Option<&[RoutingAction]> {
        self.graph.edge_actions(src, sink)
    }
}

fn read_record_size(input: &mut impl Read) -> std::io::Result<u32> {
    let mut raw = [0u8; 4];
    input.read_exact(&mut raw)?;
    Ok(u32::from_le_bytes(raw))
}

fn read_record(input: &mut impl Read, size: u32) -> Result<Vec<u8>, DatabaseError> {
    let mut buf = vec![0u8; size as usize];
    input.read_exact(&mut buf).map_err(|err| {
        error!("[CONFIG] Incomplete packet in the config database");
        DatabaseError::PacketIncomplete(err)
    })?;
    Ok(buf)
}
