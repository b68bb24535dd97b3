//! The bitchain configuration circuitry.
//!
//! In a bitchain fabric every configurable element sits on one long scan
//! chain, so the whole device configuration is a single flat bit vector and
//! every packing/placement/routing choice reduces to bit-field writes and
//! slice copies into it. [`BitchainPacking`] accumulates the per-block
//! vectors during packing; [`BitchainBitstream`] owns the device-wide
//! vector and applies placement and routing actions to it.

use std::collections::BTreeMap;
use std::path::Path;

use log::{debug, error, info, trace, warn};
use thiserror::Error;

use crate::bits::BitVec;
use crate::bitstream::{DeviceBitstream, PlaceError, RouteError};
use crate::config_db::{Block, ConfigDatabase, Instance, Port};
use crate::memh::{self, MemhError};
use crate::pack::{ConfigCircuitry, PackError};

/// Fabric-family signature of the bitchain configuration circuitry.
pub const BITCHAIN_SIGNATURE: u64 = 0xaf27_dbd3_ad76_bbdd;

#[derive(Debug, Error)]
pub enum BitchainError {
    #[error("wrong config database signature ({0:#018x}) for the bitchain configuration circuitry")]
    SignatureMismatch(u64),
    #[error("unknown total bitstream size")]
    UnknownTotalSize,
}

/// Block-instance bit vectors produced by packing, keyed by instance name.
#[derive(Debug, Default)]
pub struct BitchainPacking {
    block_instances: BTreeMap<String, BitVec>,
    cur_block_instance: Option<String>,
}

impl BitchainPacking {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn block_instance(&self, name: &str) -> Option<&BitVec> {
        self.block_instances.get(name)
    }

    fn cur_block_bitstream(&mut self) -> Option<&mut BitVec> {
        match self.cur_block_instance.as_deref() {
            Some(name) => self.block_instances.get_mut(name),
            None => None,
        }
    }
}

impl ConfigCircuitry for BitchainPacking {
    fn enter_block(&mut self, name: &str, block: &Block) -> Result<(), PackError> {
        let size = block.action().and_then(|a| a.config_size).unwrap_or(0);
        if self.block_instances.contains_key(name) {
            error!("[PACK] Duplicated block instance '{name}'");
            return Err(PackError::Internal(format!("duplicated block instance '{name}'")));
        }
        trace!("[PACK] Creating block instance: {name}, bits: {size}");
        self.block_instances
            .insert(name.to_owned(), BitVec::zeroed(size as usize));
        self.cur_block_instance = Some(name.to_owned());
        Ok(())
    }

    fn select_mode(&mut self, instance: &Instance, mode: &str) {
        trace!("[PACK] Selecting mode: {mode}");

        let Some(actions) = instance.mode_actions(mode) else {
            warn!("[PACK] No configuration actions to be taken for mode '{mode}'");
            return;
        };
        let Some(bits) = self.cur_block_bitstream() else {
            error!("[PACK] No block instance selected");
            return;
        };
        for action in actions {
            bits.apply(action);
        }
    }

    fn select_port_connections(
        &mut self,
        port: &Port,
        connections: &[String],
    ) -> Result<(), PackError> {
        trace!("[PACK] Selecting port connections: {}", connections.len());

        for (i, connection) in connections.iter().enumerate() {
            let Some(bit) = port.bit(i as u32) else {
                error!("[PACK] No config database for bit no. {i} in port '{}'", port.name());
                return Err(PackError::MissingInConfigDb(format!(
                    "bit no. {i} in port '{}'",
                    port.name()
                )));
            };

            let Some(actions) = bit.connection_actions(connection) else {
                if connection == "open" {
                    trace!("[PACK] Ignoring 'open' connection for bit no. {i}");
                } else if !bit.is_hardwired() {
                    warn!(
                        "[PACK] No configuration actions to be taken for connection '{connection}' for bit no. {i}"
                    );
                }
                continue;
            };

            let Some(bits) = self.cur_block_bitstream() else {
                error!("[PACK] No block instance selected");
                return Err(PackError::Internal("no block instance selected".into()));
            };
            for action in actions {
                bits.apply(action);
            }
        }
        Ok(())
    }

    fn configure_lut(&mut self, instance: &Instance, table: &BitVec) {
        trace!("[PACK] Configuring lut: {} bits", table.len());

        let Some(actions) = instance.action() else {
            warn!("[PACK] No configuration actions to be taken for lut rotation");
            return;
        };
        let Some(bits) = self.cur_block_bitstream() else {
            error!("[PACK] No block instance selected");
            return;
        };
        for action in &actions.lut_actions {
            bits.apply_slice(action, table);
        }
    }

    fn num_block_instances(&self) -> usize {
        self.block_instances.len()
    }

    fn report_block_instances(&self) {
        info!("====== report block instances ======");
        for (name, bits) in &self.block_instances {
            info!("[PACK] [Block instance] {name}: {}", bits.to_verilog());
        }
    }
}

/// The device-wide bitstream of a bitchain fabric.
///
/// Borrows the config database and the packed block instances for the
/// duration of placement and routing.
#[derive(Debug)]
pub struct BitchainBitstream<'a> {
    config_db: &'a ConfigDatabase,
    pack_mgr: &'a BitchainPacking,
    bitstream: BitVec,
}

impl<'a> BitchainBitstream<'a> {
    pub fn new(
        config_db: &'a ConfigDatabase,
        pack_mgr: &'a BitchainPacking,
    ) -> Result<Self, BitchainError> {
        if config_db.signature() != BITCHAIN_SIGNATURE {
            error!("[BITGEN] Wrong config database signature for the bitchain configuration circuitry");
            return Err(BitchainError::SignatureMismatch(config_db.signature()));
        }
        let Some(total_size) = config_db.header_action().map(|a| a.total_size) else {
            error!("[BITGEN] Unknown total bitstream size");
            return Err(BitchainError::UnknownTotalSize);
        };
        Ok(Self {
            config_db,
            pack_mgr,
            bitstream: BitVec::zeroed(total_size as usize),
        })
    }

    pub fn bits(&self) -> &BitVec {
        &self.bitstream
    }

    /// Print the bitstream through the info logger, `bits_per_line` bits at
    /// a time.
    pub fn report_bitstream(&self, bits_per_line: usize) {
        info!("[BITGEN] Current bitstream:");
        let mut start = 0;
        while start < self.bitstream.len() {
            let end = usize::min(start + bits_per_line, self.bitstream.len());
            let chunk: BitVec = (start..end).map(|i| self.bitstream.get(i)).collect();
            info!("[BITGEN] {start}-{end}: {}", chunk.to_verilog());
            start = end;
        }
    }

    /// Write the bitstream as a Verilog memory-image file.
    pub fn write_memh(&self, path: impl AsRef<Path>, width: u32) -> Result<(), MemhError> {
        memh::write_memh_file(path, &self.bitstream, width)
    }
}

impl DeviceBitstream for BitchainBitstream<'_> {
    fn place_block_instance(
        &mut self,
        name: &str,
        x: u32,
        y: u32,
        subblock: u32,
    ) -> Result<(), PlaceError> {
        let Some(block_instance) = self.pack_mgr.block_instance(name) else {
            error!("[PLACE] Block instance '{name}' is not defined");
            return Err(PlaceError::PlacingFailed(name.to_owned()));
        };

        // an absent action list means the tile needs no configuration
        if let Some(placements) = self.config_db.placement_actions(x, y, subblock) {
            for placement in placements {
                for action in &placement.actions {
                    self.bitstream.apply_slice(action, block_instance);
                }
            }
        }
        Ok(())
    }

    fn route_connection(&mut self, src: u64, sink: u64) -> Result<(), RouteError> {
        trace!("[ROUTE] Connecting node {src} to node {sink}");
        let Some(edge_actions) = self.config_db.edge_actions(src, sink) else {
            return Err(RouteError::RoutingFailed(src, sink));
        };
        for routing_action in edge_actions {
            for action in &routing_action.actions {
                debug!(
                    "[ROUTE] Setting {} to bits {} +: {}",
                    action.value, action.offset, action.width
                );
                self.bitstream.apply(action);
            }
        }
        Ok(())
    }
}
