//! Packing-result (`.net` XML) parsing.
//!
//! The parser walks the XML event stream with a two-level state machine: a
//! primary state tracking where we are in the block/instance nesting, and an
//! orthogonal substate tracking the port sections of the current element.
//! Every element is resolved against the configuration database (and, for
//! used LUTs, against the synthesized design); the resulting configuration
//! effects are handed to a [`ConfigCircuitry`] implementation, which owns
//! the per-block bit vectors. This keeps the state-machine skeleton
//! independent of the configuration-circuitry family.

use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use log::{error, trace};
use once_cell::sync::Lazy;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use regex::Regex;
use thiserror::Error;

use crate::bits::BitVec;
use crate::config_db::{Block, ConfigDatabase, Instance, InstanceType, Port};
use crate::synth::{LutInstance, SynthResultManager};

static INSTANCE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\w+)\[(\d+)\]$").unwrap());
static CONNECTION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\w+(?:\[0\])?\.\w+\[\d+\])->.*$").unwrap());

#[derive(Debug, Error)]
pub enum PackError {
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("packing result file error")]
    File(#[source] std::io::Error),
    #[error("format error: {0}")]
    Format(String),
    #[error("internal error: {0}")]
    Internal(String),
    #[error("missing in config database: {0}")]
    MissingInConfigDb(String),
    #[error("missing in synthesized design: {0}")]
    MissingInSynthMgr(String),
    #[error("packing result parsing is incomplete")]
    Incomplete,
}

/// The configuration effects of packing, implemented per configuration
/// circuitry family. The parser resolves names against the database and
/// calls these with the resolved entities.
pub trait ConfigCircuitry {
    /// A top-level block instance was entered; allocate its bit vector.
    fn enter_block(&mut self, name: &str, block: &Block) -> Result<(), PackError>;

    /// Apply the actions of the selected mode of a multi-mode instance.
    fn select_mode(&mut self, instance: &Instance, mode: &str);

    /// Apply the connection actions of every bit of the current port.
    fn select_port_connections(
        &mut self,
        port: &Port,
        connections: &[String],
    ) -> Result<(), PackError>;

    /// Pipe a LUT truth table into the current block bit vector.
    fn configure_lut(&mut self, instance: &Instance, table: &BitVec);

    fn num_block_instances(&self) -> usize;

    /// Print the block instances through the info logger.
    fn report_block_instances(&self);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ParserState {
    Init,
    /// Waiting for the next top-level block.
    Idle,
    /// Skipping the top-level inputs/outputs/clocks.
    Ignore,
    Done,
    /// Inside a top-level block element.
    Block,
    /// Inside a LUT instance.
    Lut,
    /// Inside the inner element of a LUT instance.
    LutInner,
    /// A LUT used as a plain buffer.
    LutWire,
    /// Inside a multi-mode instance.
    Multimode,
    /// Inside the inner elements of a multi-mode instance.
    MultimodeInner,
    /// Inside a custom (non-configurable) instance.
    Custom,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SubState {
    None,
    Inputs,
    InputPort,
    Outputs,
    OutputPort,
    Clocks,
    ClockPort,
    /// LUT instances only: `<port_rotation_map>`.
    Rotation,
    /// Irrelevant child elements, with a depth counter.
    Ignore,
}

pub struct PackingManager<'d, C> {
    config_db: &'d ConfigDatabase,
    synth_mgr: &'d SynthResultManager,
    circuitry: C,
    state: ParserState,
    substate: SubState,
    cur_block: Option<&'d Block>,
    cur_instance: Option<&'d Instance>,
    cur_lut: Option<&'d LutInstance>,
    cur_port: Option<&'d Port>,
    ignore_level: u32,
    buffer: String,
    offset: u64,
}

impl<'d, C: ConfigCircuitry> PackingManager<'d, C> {
    pub fn new(
        config_db: &'d ConfigDatabase,
        synth_mgr: &'d SynthResultManager,
        circuitry: C,
    ) -> Self {
        Self {
            config_db,
            synth_mgr,
            circuitry,
            state: ParserState::Init,
            substate: SubState::None,
            cur_block: None,
            cur_instance: None,
            cur_lut: None,
            cur_port: None,
            ignore_level: 0,
            buffer: String::new(),
            offset: 0,
        }
    }

    pub fn circuitry(&self) -> &C {
        &self.circuitry
    }

    pub fn into_circuitry(self) -> C {
        self.circuitry
    }

    pub fn parse(&mut self, path: impl AsRef<Path>) -> Result<(), PackError> {
        trace!("[PACK] Packing result parsing started");
        let path = path.as_ref();
        let file = File::open(path).map_err(|err| {
            error!("[PACK] Packing result file error: {}: {err}", path.display());
            PackError::File(err)
        })?;
        let mut reader = Reader::from_reader(BufReader::new(file));
        reader.trim_text(true);

        let mut buf = Vec::new();
        loop {
            self.offset = reader.buffer_position() as u64;
            let event = reader.read_event_into(&mut buf).map_err(|err| {
                error!("[PACK] offset {}: XML error: {err}", self.offset);
                PackError::Xml(err)
            })?;
            match event {
                Event::Start(e) => {
                    let (name, attrs) = decode_element(&e)?;
                    self.start_element(&name, &attrs)?;
                }
                Event::Empty(e) => {
                    let (name, attrs) = decode_element(&e)?;
                    self.start_element(&name, &attrs)?;
                    self.end_element()?;
                }
                Event::End(_) => self.end_element()?,
                Event::Text(t) => {
                    let text = t.unescape()?;
                    self.character_data(&text);
                }
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }

        if self.state != ParserState::Done {
            error!("[PACK] Parsing stopped at an invalid state");
            return Err(PackError::Incomplete);
        }
        trace!("[PACK] Packing result parsing done");
        Ok(())
    }

    fn start_element(
        &mut self,
        name: &str,
        attrs: &HashMap<String, String>,
    ) -> Result<(), PackError> {
        trace!(
            "[PACK] offset {}: <{name}> start, state: {:?}, {:?}",
            self.offset,
            self.state,
            self.substate
        );

        // primary state machine; falls through to the substate machine for
        // elements owned by the current block/instance
        let (allow_rotation, allow_ignore) = match self.state {
            ParserState::Init => {
                if name != "block" {
                    error!("[PACK] offset {}: Expecting <block> element ({name} found)", self.offset);
                    return Err(PackError::Format(format!("expecting <block>, found <{name}>")));
                }
                self.state = ParserState::Idle;
                return Ok(());
            }
            ParserState::Idle => {
                match name {
                    "inputs" | "outputs" | "clocks" => {
                        self.state = ParserState::Ignore;
                        self.ignore_level = 1;
                    }
                    "block" => self.enter_block(attrs)?,
                    _ => {
                        error!("[PACK] offset {}: Unexpected element: {name}", self.offset);
                        return Err(PackError::Format(format!("unexpected element <{name}>")));
                    }
                }
                return Ok(());
            }
            ParserState::Block => {
                if self.substate == SubState::None && name == "block" {
                    return self.enter_instance(attrs);
                }
                (false, false)
            }
            ParserState::Lut => {
                if self.substate == SubState::None && name == "block" {
                    self.state = ParserState::LutInner;
                    return Ok(());
                }
                (false, false)
            }
            ParserState::Multimode => {
                if self.substate == SubState::None && name == "block" {
                    self.state = ParserState::MultimodeInner;
                    return Ok(());
                }
                (false, false)
            }
            ParserState::LutInner => (true, true),
            ParserState::LutWire | ParserState::MultimodeInner | ParserState::Custom => {
                (false, true)
            }
            ParserState::Ignore => {
                self.ignore_level += 1;
                return Ok(());
            }
            ParserState::Done => {
                error!("[PACK] Invalid parser state");
                return Err(PackError::Internal("element after the top-level block closed".into()));
            }
        };

        self.start_substate(name, attrs, allow_rotation, allow_ignore)
    }

    fn start_substate(
        &mut self,
        name: &str,
        attrs: &HashMap<String, String>,
        allow_rotation: bool,
        allow_ignore: bool,
    ) -> Result<(), PackError> {
        match self.substate {
            SubState::None => {
                match name {
                    "inputs" => self.substate = SubState::Inputs,
                    "outputs" => self.substate = SubState::Outputs,
                    "clocks" => self.substate = SubState::Clocks,
                    _ if allow_ignore => {
                        self.substate = SubState::Ignore;
                        self.ignore_level = 1;
                    }
                    _ => {
                        error!("[PACK] offset {}: Unexpected element: {name}", self.offset);
                        return Err(PackError::Format(format!("unexpected element <{name}>")));
                    }
                }
                Ok(())
            }
            SubState::Inputs => {
                if name == "port" {
                    self.substate = SubState::InputPort;
                    if matches!(
                        self.state,
                        ParserState::Lut
                            | ParserState::LutWire
                            | ParserState::Multimode
                            | ParserState::Custom
                    ) {
                        self.enter_port(attrs)?;
                    }
                } else if allow_rotation && name == "port_rotation_map" {
                    self.substate = SubState::Rotation;
                } else {
                    error!("[PACK] offset {}: Unexpected element: {name}", self.offset);
                    return Err(PackError::Format(format!("unexpected element <{name}>")));
                }
                self.buffer.clear();
                Ok(())
            }
            SubState::Outputs => {
                if name != "port" {
                    error!("[PACK] offset {}: Unexpected element: {name}", self.offset);
                    return Err(PackError::Format(format!("unexpected element <{name}>")));
                }
                self.substate = SubState::OutputPort;
                if self.state == ParserState::Block {
                    self.enter_port(attrs)?;
                }
                self.buffer.clear();
                Ok(())
            }
            SubState::Clocks => {
                if name != "port" {
                    error!("[PACK] offset {}: Unexpected element: {name}", self.offset);
                    return Err(PackError::Format(format!("unexpected element <{name}>")));
                }
                self.substate = SubState::ClockPort;
                if matches!(self.state, ParserState::Multimode | ParserState::Custom) {
                    self.enter_port(attrs)?;
                }
                self.buffer.clear();
                Ok(())
            }
            SubState::InputPort | SubState::OutputPort | SubState::ClockPort | SubState::Rotation => {
                error!("[PACK] offset {}: Unexpected element: {name}", self.offset);
                Err(PackError::Format(format!("unexpected element <{name}>")))
            }
            SubState::Ignore => {
                self.ignore_level += 1;
                Ok(())
            }
        }
    }

    fn end_element(&mut self) -> Result<(), PackError> {
        trace!(
            "[PACK] offset {}: element end, state: {:?}, {:?}",
            self.offset,
            self.state,
            self.substate
        );

        match self.state {
            ParserState::Idle => {
                self.state = ParserState::Done;
                return Ok(());
            }
            ParserState::Ignore => {
                self.ignore_level -= 1;
                if self.ignore_level == 0 {
                    self.state = ParserState::Idle;
                }
                return Ok(());
            }
            ParserState::Block => {
                if self.substate == SubState::None {
                    self.cur_block = None;
                    self.state = ParserState::Idle;
                    return Ok(());
                }
            }
            ParserState::Lut
            | ParserState::LutWire
            | ParserState::Multimode
            | ParserState::Custom => {
                if self.substate == SubState::None {
                    self.cur_instance = None;
                    self.cur_lut = None;
                    self.state = ParserState::Block;
                    return Ok(());
                }
            }
            ParserState::LutInner => {
                if self.substate == SubState::None {
                    self.state = ParserState::Lut;
                    return Ok(());
                }
            }
            ParserState::MultimodeInner => {
                if self.substate == SubState::None {
                    self.state = ParserState::Multimode;
                    return Ok(());
                }
            }
            ParserState::Init | ParserState::Done => {
                error!("[PACK] Invalid parser state");
                return Err(PackError::Internal("unbalanced element end".into()));
            }
        }

        self.end_substate()
    }

    fn end_substate(&mut self) -> Result<(), PackError> {
        match self.substate {
            SubState::Inputs | SubState::Outputs | SubState::Clocks => {
                self.substate = SubState::None;
                Ok(())
            }
            SubState::Ignore => {
                self.ignore_level -= 1;
                if self.ignore_level == 0 {
                    self.substate = SubState::None;
                }
                Ok(())
            }
            SubState::InputPort => {
                if matches!(
                    self.state,
                    ParserState::Lut
                        | ParserState::LutWire
                        | ParserState::Multimode
                        | ParserState::Custom
                ) {
                    let connections = self.process_port_connections()?;
                    self.select_port_connections(&connections)?;
                    if self.state == ParserState::LutWire {
                        let table = self.process_lut_wire(&connections)?;
                        self.configure_lut(&table)?;
                    }
                }
                self.cur_port = None;
                self.substate = SubState::Inputs;
                Ok(())
            }
            SubState::Rotation => {
                if let Some(table) = self.process_lut_rotation()? {
                    self.configure_lut(&table)?;
                }
                self.cur_port = None;
                self.substate = SubState::Inputs;
                Ok(())
            }
            SubState::OutputPort => {
                if self.state == ParserState::Block {
                    let connections = self.process_port_connections()?;
                    self.select_port_connections(&connections)?;
                }
                self.cur_port = None;
                self.substate = SubState::Outputs;
                Ok(())
            }
            SubState::ClockPort => {
                if matches!(self.state, ParserState::Multimode | ParserState::Custom) {
                    let connections = self.process_port_connections()?;
                    self.select_port_connections(&connections)?;
                }
                self.cur_port = None;
                self.substate = SubState::Clocks;
                Ok(())
            }
            SubState::None => {
                error!("[PACK] Invalid parser sub-state");
                Err(PackError::Internal("unbalanced element end".into()))
            }
        }
    }

    fn character_data(&mut self, data: &str) {
        match self.substate {
            SubState::InputPort
            | SubState::OutputPort
            | SubState::ClockPort
            | SubState::Rotation => {
                if !self.buffer.is_empty() {
                    self.buffer.push(' ');
                }
                self.buffer.push_str(data);
            }
            _ => {}
        }
    }

    fn enter_block(&mut self, attrs: &HashMap<String, String>) -> Result<(), PackError> {
        let kind = self.instance_kind(attrs)?;
        let block = self.config_db.block(&kind).ok_or_else(|| {
            error!("[PACK] offset {}: No config database for block '{kind}'", self.offset);
            PackError::MissingInConfigDb(format!("block '{kind}'"))
        })?;
        self.cur_block = Some(block);
        self.state = ParserState::Block;
        self.substate = SubState::None;

        let name = require_attr(attrs, "name", "block", self.offset)?;
        self.circuitry.enter_block(name, block)
    }

    fn enter_instance(&mut self, attrs: &HashMap<String, String>) -> Result<(), PackError> {
        let kind = self.instance_kind(attrs)?;
        let block = self
            .cur_block
            .ok_or_else(|| PackError::Internal("no current block".into()))?;
        let instance = block.instance(&kind).ok_or_else(|| {
            error!("[PACK] offset {}: No config database for instance '{kind}'", self.offset);
            PackError::MissingInConfigDb(format!("instance '{kind}'"))
        })?;
        self.cur_instance = Some(instance);

        let name = require_attr(attrs, "name", "block", self.offset)?.to_owned();
        match instance.kind() {
            InstanceType::Lut => self.enter_lut(&name, attrs),
            InstanceType::Multimode => self.enter_multimode(&name, attrs),
            InstanceType::NonConfigurable => self.enter_custom(&name),
        }
    }

    fn enter_lut(&mut self, name: &str, attrs: &HashMap<String, String>) -> Result<(), PackError> {
        if name == "open" {
            if attrs.get("mode").map(String::as_str) == Some("wire") {
                trace!("[PACK] offset {}: LUT used as wire", self.offset);
                self.state = ParserState::LutWire;
            } else {
                trace!("[PACK] offset {}: Unused LUT", self.offset);
                self.state = ParserState::Lut;
            }
        } else {
            let lut = self.synth_mgr.lut(name).ok_or_else(|| {
                error!("[PACK] offset {}: No lut instance named '{name}'", self.offset);
                PackError::MissingInSynthMgr(format!("lut instance '{name}'"))
            })?;
            self.cur_lut = Some(lut);
            self.state = ParserState::Lut;
        }
        self.substate = SubState::None;
        Ok(())
    }

    fn enter_multimode(
        &mut self,
        name: &str,
        attrs: &HashMap<String, String>,
    ) -> Result<(), PackError> {
        self.state = ParserState::Multimode;
        self.substate = SubState::None;

        if name == "open" {
            trace!("[PACK] offset {}: Unused instance", self.offset);
            return Ok(());
        }

        let mode = require_attr(attrs, "mode", "block", self.offset)?;
        let instance = self
            .cur_instance
            .ok_or_else(|| PackError::Internal("no current instance".into()))?;
        self.circuitry.select_mode(instance, mode);
        Ok(())
    }

    fn enter_custom(&mut self, name: &str) -> Result<(), PackError> {
        if name == "open" {
            trace!("[PACK] offset {}: Unused instance", self.offset);
        }
        self.state = ParserState::Custom;
        self.substate = SubState::None;
        Ok(())
    }

    fn enter_port(&mut self, attrs: &HashMap<String, String>) -> Result<(), PackError> {
        let name = require_attr(attrs, "name", "port", self.offset)?;
        let port = if self.state == ParserState::Block {
            self.cur_block.and_then(|b| b.port(name))
        } else {
            self.cur_instance.and_then(|i| i.port(name))
        };
        let port = port.ok_or_else(|| {
            error!("[PACK] offset {}: No config database for port '{name}'", self.offset);
            PackError::MissingInConfigDb(format!("port '{name}'"))
        })?;
        self.cur_port = Some(port);
        Ok(())
    }

    fn instance_kind(&self, attrs: &HashMap<String, String>) -> Result<String, PackError> {
        let raw = require_attr(attrs, "instance", "block", self.offset)?;
        let caps = INSTANCE_RE.captures(raw).ok_or_else(|| {
            error!(
                "[PACK] offset {}: 'instance' attribute does not match the expected pattern: {raw}",
                self.offset
            );
            PackError::Format(format!("bad 'instance' attribute '{raw}'"))
        })?;
        Ok(caps[1].to_owned())
    }

    /// Tokenize the accumulated port text into connection names; `"open"`
    /// tokens are kept literally.
    fn process_port_connections(&mut self) -> Result<Vec<String>, PackError> {
        let mut tokens: Vec<String> =
            self.buffer.split_whitespace().map(str::to_owned).collect();
        self.buffer.clear();
        for token in &mut tokens {
            if token != "open" {
                match CONNECTION_RE.captures(token) {
                    Some(caps) => *token = caps[1].to_owned(),
                    None => {
                        error!(
                            "[PACK] 'port' content does not match the connection pattern: {token}"
                        );
                        return Err(PackError::Format(format!("bad connection token '{token}'")));
                    }
                }
            }
        }
        Ok(tokens)
    }

    /// Tokenize the accumulated rotation map and rotate the current LUT.
    /// `None` when no LUT is selected (an unused LUT configures nothing).
    fn process_lut_rotation(&mut self) -> Result<Option<BitVec>, PackError> {
        let tokens: Vec<String> =
            self.buffer.split_whitespace().map(str::to_owned).collect();
        self.buffer.clear();

        let mut map = Vec::with_capacity(tokens.len());
        for token in &tokens {
            if token == "open" {
                map.push(-1);
            } else {
                let index: i32 = token.parse().map_err(|_| {
                    error!("[PACK] offset {}: bad rotation entry '{token}'", self.offset);
                    PackError::Format(format!("bad rotation entry '{token}'"))
                })?;
                map.push(index);
            }
        }

        match self.cur_lut {
            Some(lut) => Ok(Some(lut.rotate(&map))),
            None => {
                trace!("[PACK] offset {}: rotation map for an unused LUT", self.offset);
                Ok(None)
            }
        }
    }

    /// Build the truth table of a LUT acting as a buffer of its first
    /// connected input.
    fn process_lut_wire(&mut self, connections: &[String]) -> Result<BitVec, PackError> {
        let Some(key_index) = connections.iter().position(|c| c != "open") else {
            error!("[PACK] offset {}: LUT used as wire but all ports are open", self.offset);
            return Err(PackError::Format("LUT used as wire but all ports are open".into()));
        };

        let size = 1usize << connections.len();
        let mut table = BitVec::zeroed(size);
        for i in 0..size {
            table.set(i, i >> key_index & 1 != 0);
        }
        Ok(table)
    }

    fn select_port_connections(&mut self, connections: &[String]) -> Result<(), PackError> {
        let port = self
            .cur_port
            .ok_or_else(|| PackError::Internal("no current port".into()))?;
        self.circuitry.select_port_connections(port, connections)
    }

    fn configure_lut(&mut self, table: &BitVec) -> Result<(), PackError> {
        let instance = self
            .cur_instance
            .ok_or_else(|| PackError::Internal("no current instance".into()))?;
        self.circuitry.configure_lut(instance, table);
        Ok(())
    }
}

fn decode_element(e: &BytesStart) -> Result<(String, HashMap<String, String>), PackError> {
    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
    let mut attrs = HashMap::new();
    for attr in e.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value()?.into_owned();
        attrs.insert(key, value);
    }
    Ok((name, attrs))
}

fn require_attr<'a>(
    attrs: &'a HashMap<String, String>,
    key: &str,
    element: &str,
    offset: u64,
) -> Result<&'a str, PackError> {
    attrs.get(key).map(String::as_str).ok_or_else(|| {
        error!("[PACK] offset {offset}: Expecting '{key}' attribute in <{element}> element");
        PackError::Format(format!("expecting '{key}' attribute in <{element}>"))
    })
}
