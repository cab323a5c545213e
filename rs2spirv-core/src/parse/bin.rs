//! Binary SPIR-V word streams.
use anyhow::{bail, Result};

use super::instr::Instrs;

pub const SPIRV_MAGIC: u32 = 0x0723_0203;

const HEADER_LEN: usize = 5;

/// The five-word SPIR-V module header.
#[derive(Debug, Clone, Copy)]
pub struct SpirvHeader {
    pub magic: u32,
    pub version: u32,
    pub generator: u32,
    pub bound: u32,
    pub schema: u32,
}

impl Default for SpirvHeader {
    fn default() -> Self {
        SpirvHeader {
            magic: SPIRV_MAGIC,
            // SPIR-V 1.0.
            version: 1 << 16,
            generator: 0,
            bound: 0,
            schema: 0,
        }
    }
}

impl SpirvHeader {
    pub fn words(&self) -> [u32; 5] {
        [
            self.magic,
            self.version,
            self.generator,
            self.bound,
            self.schema,
        ]
    }
}

/// SPIR-V program binary.
#[derive(Debug, Default, Clone)]
pub struct SpirvBinary(Vec<u32>);

impl From<Vec<u32>> for SpirvBinary {
    fn from(words: Vec<u32>) -> Self {
        SpirvBinary(words)
    }
}

impl From<&[u32]> for SpirvBinary {
    fn from(words: &[u32]) -> Self {
        SpirvBinary(words.to_owned())
    }
}

impl SpirvBinary {
    /// Decodes a byte stream, accepting either endianness by looking at the
    /// magic number.
    pub fn from_bytes(bytes: &[u8]) -> Result<SpirvBinary> {
        if bytes.len() % 4 != 0 {
            bail!("SPIR-V binary length is not a multiple of 4");
        }
        if bytes.len() < HEADER_LEN * 4 {
            bail!("SPIR-V binary is shorter than the module header");
        }
        let decode: fn([u8; 4]) -> u32 = match bytes[0] {
            0x03 => u32::from_le_bytes,
            0x07 => u32::from_be_bytes,
            _ => bail!("unrecognized SPIR-V magic number"),
        };
        let words = bytes
            .chunks_exact(4)
            .map(|chunk| decode([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect::<Vec<_>>();
        if words[0] != SPIRV_MAGIC {
            bail!("unrecognized SPIR-V magic number");
        }
        Ok(SpirvBinary(words))
    }

    pub fn words(&self) -> &[u32] {
        &self.0
    }

    pub fn into_words(self) -> Vec<u32> {
        self.0
    }

    pub fn header(&self) -> Option<SpirvHeader> {
        if self.0.len() < HEADER_LEN {
            return None;
        }
        Some(SpirvHeader {
            magic: self.0[0],
            version: self.0[1],
            generator: self.0[2],
            bound: self.0[3],
            schema: self.0[4],
        })
    }

    /// Streams the instructions following the header.
    pub fn instrs(&self) -> Result<Instrs<'_>> {
        if self.0.len() < HEADER_LEN {
            bail!("SPIR-V binary is shorter than the module header");
        }
        Ok(Instrs::new(&self.0[HEADER_LEN..]))
    }
}
