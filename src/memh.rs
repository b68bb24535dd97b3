//! Verilog `$readmemh` memory-image output.
//!
//! The device bitstream is emitted as little-endian hex words, highest bit
//! index first, four words per line. With word width `w`, word 0 of the
//! image holds bits `len-1 .. len-w` of the bitstream, lsb-first.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use log::error;
use thiserror::Error;

use crate::bits::BitVec;

#[derive(Debug, Error)]
pub enum MemhError {
    #[error("unsupported word size: {0} (accepted word sizes are: 4, 8, 16, 32, 64)")]
    BadAlignment(u32),
    #[error("memory image file error")]
    BadFile(#[from] std::io::Error),
}

pub fn write_memh(out: &mut impl Write, bits: &BitVec, width: u32) -> Result<(), MemhError> {
    if !matches!(width, 4 | 8 | 16 | 32 | 64) {
        error!("[BITGEN] Unsupported word size: {width} (accepted word sizes are: 4, 8, 16, 32, 64)");
        return Err(MemhError::BadAlignment(width));
    }

    let digits = (width / 4) as usize;
    let mut rev = bits.iter().rev();
    let mut addr = 0usize;
    loop {
        let mut word = 0u64;
        let mut taken = 0;
        for i in 0..width {
            let Some(bit) = rev.next() else { break };
            taken += 1;
            if bit {
                word |= 1u64 << i;
            }
        }
        if taken == 0 {
            if addr % 4 != 0 {
                writeln!(out)?;
            }
            break;
        }

        if addr % 4 != 0 {
            write!(out, " ")?;
        }
        write!(out, "{word:0digits$x}")?;
        if addr % 4 == 3 {
            writeln!(out)?;
        }
        addr += 1;
    }
    Ok(())
}

pub fn write_memh_file(
    path: impl AsRef<Path>,
    bits: &BitVec,
    width: u32,
) -> Result<(), MemhError> {
    if !matches!(width, 4 | 8 | 16 | 32 | 64) {
        error!("[BITGEN] Unsupported word size: {width} (accepted word sizes are: 4, 8, 16, 32, 64)");
        return Err(MemhError::BadAlignment(width));
    }

    let path = path.as_ref();
    let file = File::create(path).map_err(|err| {
        error!("[BITGEN] Creating output file error: {}: {err}", path.display());
        MemhError::BadFile(err)
    })?;
    let mut out = BufWriter::new(file);
    write_memh(&mut out, bits, width)?;
    out.flush()?;
    Ok(())
}
