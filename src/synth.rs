//! Synthesized-design (BLIF) parsing.
//!
//! The only information the bitstream generator needs from the synthesis
//! result is the truth table of every named LUT, reconstructed from the
//! sum-of-products cover rows of each `.names` tag. Latches, subcircuits
//! and blackboxes are accepted and ignored.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use log::{error, warn};
use thiserror::Error;

use crate::bits::BitVec;

/// Truth-table symbols of a cover row.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogicValue {
    True,
    False,
    DontCare,
    Unknown,
}

impl LogicValue {
    fn from_symbol(symbol: char) -> Self {
        match symbol {
            '1' => Self::True,
            '0' => Self::False,
            '-' => Self::DontCare,
            _ => Self::Unknown,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Polarity {
    OnSet,
    OffSet,
}

#[derive(Debug, Error)]
pub enum LutError {
    #[error("number of bits in the truth table mismatches with number of nets")]
    NetsAndTruthTableMismatch,
    #[error("mixed usage of true & false truth table entries")]
    InconsistentTruthTableEntry,
    #[error("invalid symbol found in .names tag")]
    InvalidTruthTableSymbol,
}

#[derive(Debug, Error)]
pub enum BlifError {
    #[error("BLIF file error")]
    BadFile(#[source] std::io::Error),
    #[error("BLIF parser ended in non-finished state")]
    Incomplete,
    #[error("line {0}: invalid BLIF parser state transition")]
    InvalidState(u32),
    #[error("line {0}: multiple models defined in one BLIF")]
    MultipleModels(u32),
    #[error("line {0}: two LUTs drive the same net: {1}")]
    LutNameConflicts(u32, String),
    #[error("line {0}: {1}")]
    ParserError(u32, String),
}

/// The truth table of one LUT, bit `i` holding the output for input
/// combination `i`.
#[derive(Clone, Debug, Default)]
pub struct LutInstance {
    table: BitVec,
}

impl LutInstance {
    /// Build the truth table from the cover rows of a `.names` tag.
    /// `num_nets` counts the inputs plus the output.
    pub fn populate(num_nets: usize, so_cover: &[Vec<LogicValue>]) -> Result<Self, LutError> {
        if num_nets == 0 {
            return Err(LutError::NetsAndTruthTableMismatch);
        }
        let num_inputs = num_nets - 1;
        let size = 1usize << num_inputs;
        let mut polarity = None;
        let mut table = BitVec::zeroed(size);

        for entry in so_cover {
            if entry.len() != num_nets {
                return Err(LutError::NetsAndTruthTableMismatch);
            }

            let output = entry[num_nets - 1];
            let value = match polarity {
                None => {
                    polarity = Some(match output {
                        LogicValue::True => Polarity::OnSet,
                        LogicValue::False => {
                            table = BitVec::filled(size, true);
                            Polarity::OffSet
                        }
                        _ => return Err(LutError::InvalidTruthTableSymbol),
                    });
                    output == LogicValue::True
                }
                Some(p) => {
                    let consistent = match output {
                        LogicValue::True => p == Polarity::OnSet,
                        LogicValue::False => p == Polarity::OffSet,
                        _ => false,
                    };
                    if !consistent {
                        return Err(LutError::InconsistentTruthTableEntry);
                    }
                    p == Polarity::OnSet
                }
            };

            // expand the input plane into the set of matching table indices
            let mut indices = vec![0usize];
            for (bit, symbol) in entry[..num_inputs].iter().enumerate() {
                match symbol {
                    LogicValue::True => {
                        for idx in &mut indices {
                            *idx |= 1 << bit;
                        }
                    }
                    LogicValue::False => {}
                    LogicValue::DontCare => {
                        let low = indices.clone();
                        for idx in &mut indices {
                            *idx |= 1 << bit;
                        }
                        indices.extend(low);
                    }
                    LogicValue::Unknown => return Err(LutError::InvalidTruthTableSymbol),
                }
            }

            for idx in indices {
                table.set(idx, value);
            }
        }

        Ok(Self { table })
    }

    /// Remap the truth table onto the physical LUT inputs.
    ///
    /// The result has length `2^len(map)`; destination index `j` takes the
    /// source bit whose index has, for every entry `map[k] = b >= 0`, bit
    /// `b` equal to bit `k` of `j`. Negative entries mark unused inputs and
    /// contribute nothing to the source index.
    pub fn rotate(&self, rotation_map: &[i32]) -> BitVec {
        let new_size = 1usize << rotation_map.len();
        let mut rotated = BitVec::zeroed(new_size);
        for new_idx in 0..new_size {
            let mut old_idx = 0usize;
            for (new_bit, &old_bit) in rotation_map.iter().enumerate() {
                if old_bit >= 0 {
                    old_idx |= (new_idx >> new_bit & 1) << old_bit;
                }
            }
            rotated.set(new_idx, self.table.get(old_idx));
        }
        rotated
    }

    pub fn table(&self) -> &BitVec {
        &self.table
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum BlifState {
    Init,
    ParseStarted,
    ModelBegan,
    ModelEnded,
    ParseFinished,
}

struct PendingNames {
    lineno: u32,
    nets: Vec<String>,
    cover: Vec<Vec<LogicValue>>,
}

/// All LUTs of the synthesized design, keyed by output net.
#[derive(Debug, Default)]
pub struct SynthResultManager {
    luts: BTreeMap<String, LutInstance>,
}

impl SynthResultManager {
    pub fn parse(path: impl AsRef<Path>) -> Result<Self, BlifError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|err| {
            error!("[BLIF] BLIF file error: {}: {err}", path.display());
            BlifError::BadFile(err)
        })?;
        Self::read(BufReader::new(file))
    }

    pub fn read(input: impl BufRead) -> Result<Self, BlifError> {
        let mut mgr = Self::default();
        let mut state = Self::start_parse(BlifState::Init)?;

        let mut pending: Option<PendingNames> = None;
        let mut lineno = 0u32;
        let mut lines = input.lines();
        while let Some(line) = lines.next() {
            lineno += 1;
            let line = line.map_err(BlifError::BadFile)?;
            // strip comments, then join continuation lines
            let mut logical = strip_comment(&line).to_owned();
            while logical.ends_with('\\') {
                logical.pop();
                let Some(next) = lines.next() else { break };
                lineno += 1;
                logical.push(' ');
                logical.push_str(strip_comment(&next.map_err(BlifError::BadFile)?));
            }

            let tokens: Vec<&str> = logical.split_whitespace().collect();
            let Some(&first) = tokens.first() else { continue };

            if let Some(directive) = first.strip_prefix('.') {
                mgr.flush_names(&mut pending)?;
                match directive {
                    "model" => {
                        state = Self::begin_model(state, lineno)?;
                    }
                    "inputs" | "outputs" => {}
                    "names" => {
                        if state != BlifState::ModelBegan {
                            error!("[BLIF] line {lineno}: .names outside a model");
                            return Err(BlifError::InvalidState(lineno));
                        }
                        if tokens.len() < 2 {
                            error!("[BLIF] line {lineno}: .names tag without nets");
                            return Err(BlifError::ParserError(
                                lineno,
                                ".names tag without nets".to_owned(),
                            ));
                        }
                        pending = Some(PendingNames {
                            lineno,
                            nets: tokens[1..].iter().map(|t| (*t).to_owned()).collect(),
                            cover: Vec::new(),
                        });
                    }
                    "latch" | "subckt" | "blackbox" => {}
                    "end" => {
                        state = Self::end_model(state, lineno)?;
                    }
                    _ => {
                        error!("[BLIF] line {lineno}: unknown directive '.{directive}'");
                        return Err(BlifError::ParserError(
                            lineno,
                            format!("unknown directive '.{directive}'"),
                        ));
                    }
                }
            } else if let Some(p) = &mut pending {
                let row = tokens
                    .iter()
                    .flat_map(|t| t.chars())
                    .map(LogicValue::from_symbol)
                    .collect();
                p.cover.push(row);
            } else {
                error!("[BLIF] line {lineno}: truth table row outside a .names tag");
                return Err(BlifError::ParserError(
                    lineno,
                    "truth table row outside a .names tag".to_owned(),
                ));
            }
        }

        mgr.flush_names(&mut pending)?;
        Self::finish_parse(state)?;
        Ok(mgr)
    }

    fn start_parse(state: BlifState) -> Result<BlifState, BlifError> {
        match state {
            BlifState::Init => Ok(BlifState::ParseStarted),
            _ => Err(BlifError::InvalidState(0)),
        }
    }

    fn begin_model(state: BlifState, lineno: u32) -> Result<BlifState, BlifError> {
        match state {
            BlifState::ModelEnded => {
                error!("[BLIF] line {lineno}: multiple models defined in one BLIF. Not supported by VPR");
                Err(BlifError::MultipleModels(lineno))
            }
            BlifState::ParseStarted => Ok(BlifState::ModelBegan),
            _ => {
                error!("[BLIF] line {lineno}: invalid BLIF parser state transition");
                Err(BlifError::InvalidState(lineno))
            }
        }
    }

    fn end_model(state: BlifState, lineno: u32) -> Result<BlifState, BlifError> {
        match state {
            BlifState::ModelBegan => Ok(BlifState::ModelEnded),
            _ => {
                error!("[BLIF] line {lineno}: invalid BLIF parser state transition");
                Err(BlifError::InvalidState(lineno))
            }
        }
    }

    fn finish_parse(state: BlifState) -> Result<BlifState, BlifError> {
        match state {
            BlifState::ModelEnded => Ok(BlifState::ParseFinished),
            _ => {
                error!("[BLIF] BLIF parser ended in non-finished state");
                Err(BlifError::Incomplete)
            }
        }
    }

    fn flush_names(&mut self, pending: &mut Option<PendingNames>) -> Result<(), BlifError> {
        let Some(p) = pending.take() else {
            return Ok(());
        };

        let name = p.nets[p.nets.len() - 1].clone();
        if p.nets.len() <= 1 {
            warn!("[BLIF] line {}: .names tag with no inputs: {name}", p.lineno);
        }
        if self.luts.contains_key(&name) {
            error!("[BLIF] line {}: two LUTs drive the same net: {name}", p.lineno);
            return Err(BlifError::LutNameConflicts(p.lineno, name));
        }

        match LutInstance::populate(p.nets.len(), &p.cover) {
            Ok(lut) => {
                self.luts.insert(name, lut);
                Ok(())
            }
            Err(err) => {
                error!("[BLIF] line {}: {err}: {name}", p.lineno);
                Err(BlifError::ParserError(p.lineno, err.to_string()))
            }
        }
    }

    pub fn lut(&self, name: &str) -> Option<&LutInstance> {
        self.luts.get(name)
    }

    pub fn luts(&self) -> &BTreeMap<String, LutInstance> {
        &self.luts
    }
}

fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(pos) => &line[..pos],
        None => line,
    }
}
