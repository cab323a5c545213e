//! SPIR-V instruction decoding and encoding.
use std::fmt;

use anyhow::{anyhow, bail, Result};
use num_traits::FromPrimitive;
use spirv::Op;

/// A single decoded instruction. Owns its words; the leading word packs the
/// word count in the high half and the opcode in the low half.
#[derive(Clone, PartialEq, Eq)]
pub struct Instruction {
    words: Vec<u32>,
}

impl Instruction {
    pub fn from_words(words: &[u32]) -> Result<Instruction> {
        if words.is_empty() {
            bail!("instruction is too short");
        }
        let declared = (words[0] >> 16) as usize;
        if declared != words.len() {
            bail!(
                "instruction word count {} does not match its {} words",
                declared,
                words.len()
            );
        }
        Ok(Instruction {
            words: words.to_owned(),
        })
    }

    pub fn opcode(&self) -> u32 {
        self.words[0] & 0xFFFF
    }

    pub fn op(&self) -> Result<Op> {
        Op::from_u32(self.opcode()).ok_or_else(|| anyhow!("unknown opcode {}", self.opcode()))
    }

    pub fn is(&self, op: Op) -> bool {
        self.opcode() == op as u32
    }

    /// Word count including the leading count/opcode word.
    pub fn word_count(&self) -> usize {
        self.words.len()
    }

    pub fn words(&self) -> &[u32] {
        &self.words
    }

    /// Operand reader over the words after the leading one. The reader does
    /// no semantic validation; callers must follow the instruction's layout
    /// from the SPIR-V specification.
    pub fn operands(&self) -> Operands<'_> {
        Operands(&self.words[1..])
    }

    /// The n-th operand word, 0-based.
    pub fn operand(&self, idx: usize) -> Result<u32> {
        self.words
            .get(idx + 1)
            .copied()
            .ok_or_else(|| anyhow!("opcode {} has no operand {}", self.opcode(), idx))
    }
}

impl fmt::Debug for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match Op::from_u32(self.opcode()) {
            Some(op) => write!(f, "{:?} {:?}", op, &self.words[1..]),
            None => write!(f, "Op({}) {:?}", self.opcode(), &self.words[1..]),
        }
    }
}

/// Streaming decoder over the words following a module header.
pub struct Instrs<'a> {
    inner: &'a [u32],
}

impl<'a> Instrs<'a> {
    pub fn new(words: &'a [u32]) -> Instrs<'a> {
        Instrs { inner: words }
    }
}

impl<'a> Iterator for Instrs<'a> {
    type Item = Result<Instruction>;

    fn next(&mut self) -> Option<Self::Item> {
        let head = *self.inner.first()?;
        let len = (head >> 16) as usize;
        if len == 0 {
            self.inner = &[];
            return Some(Err(anyhow!("instruction length is zero")));
        }
        if len > self.inner.len() {
            self.inner = &[];
            return Some(Err(anyhow!("instruction is truncated")));
        }
        let instr = Instruction::from_words(&self.inner[..len]);
        self.inner = &self.inner[len..];
        Some(instr)
    }
}

/// Assembles one instruction word by word.
pub struct InstructionBuilder {
    words: Vec<u32>,
}

impl InstructionBuilder {
    pub fn new(op: Op) -> InstructionBuilder {
        InstructionBuilder {
            words: vec![(op as u32) & 0xFFFF],
        }
    }

    pub fn push(mut self, word: u32) -> Self {
        self.words.push(word);
        self
    }

    pub fn push_list(mut self, words: &[u32]) -> Self {
        self.words.extend_from_slice(words);
        self
    }

    /// Packs a literal string: UTF-8 bytes, a NUL terminator, zero-padded to
    /// a word boundary, little-endian within each word.
    pub fn push_str(mut self, text: &str) -> Self {
        let mut bytes = text.as_bytes().to_vec();
        bytes.push(0);
        while bytes.len() % 4 != 0 {
            bytes.push(0);
        }
        for chunk in bytes.chunks_exact(4) {
            self.words
                .push(u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
        }
        self
    }

    pub fn build(mut self) -> Instruction {
        self.words[0] |= (self.words.len() as u32) << 16;
        Instruction { words: self.words }
    }
}

pub struct Operands<'a>(&'a [u32]);

impl<'a> Operands<'a> {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        match self.0.first() {
            Some(word) => {
                self.0 = &self.0[1..];
                Ok(*word)
            }
            None => Err(anyhow!("operand is too short")),
        }
    }

    pub fn read_id(&mut self) -> Result<u32> {
        self.read_u32()
    }

    pub fn read_enum<E: FromPrimitive>(&mut self) -> Result<E> {
        self.read_u32()
            .and_then(|word| E::from_u32(word).ok_or_else(|| anyhow!("invalid enum value {}", word)))
    }

    /// Reads a NUL-terminated literal string and advances past its padding.
    pub fn read_str(&mut self) -> Result<String> {
        let mut bytes = Vec::new();
        for (idx, word) in self.0.iter().enumerate() {
            for byte in word.to_le_bytes().iter() {
                if *byte == 0 {
                    self.0 = &self.0[idx + 1..];
                    return String::from_utf8(bytes)
                        .map_err(|_| anyhow!("literal string is not valid UTF-8"));
                }
                bytes.push(*byte);
            }
        }
        Err(anyhow!("literal string is not NUL-terminated"))
    }

    /// Consumes every remaining operand word.
    pub fn read_list(&mut self) -> &'a [u32] {
        std::mem::replace(&mut self.0, &[])
    }
}
