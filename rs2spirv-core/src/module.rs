//! Textual SPIR-V modules: parsing into canonical blocks and writing back.
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use log::debug;

use crate::block::{Block, BlockKind};
use crate::line::SpirvLine;

/// Identifier prefix of compiler-generated wrapper entities. A function block
/// whose name starts with this prefix is a wrapper main.
pub const WRAPPER_PREFIX: &str = "%__rsov_";

/// An ordered sequence of blocks. After `fix_block_order` the blocks sort
/// stably by kind, which is the canonical SPIR-V module layout.
#[derive(Debug, Clone, Default)]
pub struct TextModule {
    blocks: Vec<Block>,
}

impl TextModule {
    pub fn new() -> Self {
        TextModule::default()
    }

    /// Partitions a textual SPIR-V stream into blocks.
    ///
    /// State machine over the canonical layout: header until the first
    /// `OpDecorate`, decorations until the first `OpType`, types/constants
    /// and variables until the first `OpFunction`, then one block per
    /// `OpFunction` .. `OpFunctionEnd` range. Function blocks without an
    /// `OpReturn` are reclassified as declarations.
    pub fn parse(source: &str) -> Result<TextModule> {
        let lines = source
            .lines()
            .map(SpirvLine::trimmed)
            .collect::<Vec<_>>();
        let mut module = TextModule::new();
        let mut pos = 0;

        let mut header = Block::new(BlockKind::Header);
        while pos < lines.len() && !lines[pos].contains("OpDecorate") {
            header.push(lines[pos].clone());
            pos += 1;
        }
        module.blocks.push(header);

        let mut decorations = Block::new(BlockKind::Decoration);
        while pos < lines.len() && !lines[pos].contains("OpType") {
            decorations.push(lines[pos].clone());
            pos += 1;
        }
        decorations.remove_non_code_lines();
        module.blocks.push(decorations);

        let mut types = Block::new(BlockKind::TypeAndConst);
        let mut variables = Block::new(BlockKind::Variable);
        while pos < lines.len() && !lines[pos].contains("OpFunction") {
            let line = &lines[pos];
            pos += 1;
            if !line.has_code() {
                continue;
            }
            if line.contains("OpType") || line.contains("OpConstant") {
                types.push(line.clone());
            } else {
                variables.push(line.clone());
            }
        }
        module.blocks.push(types);
        module.blocks.push(variables);

        while pos < lines.len() {
            if lines[pos].is_empty() {
                pos += 1;
                continue;
            }

            let name = lines[pos]
                .lhs_ident()
                .ok_or_else(|| anyhow!("functions should start with OpFunction: {}", lines[pos]))?;
            let kind = if name.starts_with(WRAPPER_PREFIX) {
                BlockKind::MainFunction
            } else {
                BlockKind::Function
            };

            let mut function = Block::new(kind);
            let mut has_return = false;
            while pos < lines.len() {
                let line = &lines[pos];
                pos += 1;
                if line.is_empty() {
                    continue;
                }
                has_return |= line.contains("OpReturn");
                function.push(line.clone());
                if line.contains("OpFunctionEnd") {
                    break;
                }
            }
            function.remove_non_code_lines();

            if !has_return {
                function.set_kind(BlockKind::FunctionDecl);
            }
            debug!(
                "parsed {} {}",
                function.kind().name(),
                function.function_name().unwrap_or("<unnamed>")
            );
            module.blocks.push(function);
        }

        module.remove_non_code();
        Ok(module)
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn blocks_mut(&mut self) -> &mut Vec<Block> {
        &mut self.blocks
    }

    pub fn add_block(&mut self, block: Block) -> &mut Block {
        self.blocks.push(block);
        self.blocks.last_mut().unwrap()
    }

    pub fn lines(&self) -> impl Iterator<Item = &SpirvLine> {
        self.blocks.iter().flat_map(|block| block.lines().iter())
    }

    pub fn lines_mut(&mut self) -> impl Iterator<Item = &mut SpirvLine> {
        self.blocks
            .iter_mut()
            .flat_map(|block| block.lines_mut().iter_mut())
    }

    /// Stable-sorts the blocks by kind into canonical order.
    pub fn fix_block_order(&mut self) {
        self.blocks.sort_by_key(|block| block.kind());
    }

    pub fn remove_blocks_if(&mut self, mut pred: impl FnMut(&Block) -> bool) {
        self.blocks.retain(|block| !pred(block));
    }

    pub fn remove_empty_blocks(&mut self) {
        self.remove_blocks_if(Block::is_empty);
    }

    /// Strips non-code lines from every block but the header, then drops
    /// blocks that carry no code at all.
    pub fn remove_non_code(&mut self) {
        for block in &mut self.blocks {
            if block.kind() != BlockKind::Header {
                block.remove_non_code_lines();
            }
        }
        self.remove_blocks_if(|block| !block.has_code());
    }

    /// The kernel names carried in the header's `%RS_KERNELS` string.
    pub fn kernel_names(&self) -> Result<Vec<String>> {
        self.blocks
            .iter()
            .filter(|block| block.kind() == BlockKind::Header)
            .find_map(Block::kernel_names)
            .ok_or_else(|| anyhow!("RS kernel names not found in wrapper"))
    }

    /// Writes the module out. The header prints verbatim; every other block
    /// is prefixed by its name as a comment and its code lines are indented.
    pub fn write_to(&self, out: &mut impl Write) -> Result<()> {
        for block in &self.blocks {
            if block.kind() != BlockKind::Header {
                write!(out, "\n\n; {}\n\n", block.kind().name())?;
            }
            for line in block.lines() {
                if line.has_code() && block.kind() != BlockKind::Header {
                    out.write_all(b"\t")?;
                }
                writeln!(out, "{}", line)?;
            }
        }
        Ok(())
    }

    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path)
            .with_context(|| format!("cannot open file: {}", path.display()))?;
        let mut out = BufWriter::new(file);
        self.write_to(&mut out)
            .with_context(|| format!("could not save to file: {}", path.display()))
    }

    /// Renders the module to a string, in `write_to` format.
    pub fn to_text(&self) -> Result<String> {
        let mut buf = Vec::new();
        self.write_to(&mut buf)?;
        Ok(String::from_utf8(buf)?)
    }
}
