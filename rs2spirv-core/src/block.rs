//! Kind-tagged blocks of textual SPIR-V lines.
use anyhow::{anyhow, bail, Result};

use crate::line::SpirvLine;

/// Discriminant of a block. The declaration order of the variants is the
/// canonical SPIR-V module layout; `Ord` on the kind is the block sort key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BlockKind {
    Header,
    Decoration,
    TypeAndConst,
    Variable,
    FunctionDecl,
    Function,
    MainFunction,
}

impl BlockKind {
    pub fn name(self) -> &'static str {
        match self {
            BlockKind::Header => "HeaderBlock",
            BlockKind::Decoration => "DecorationBlock",
            BlockKind::TypeAndConst => "TypeAndConstBlock",
            BlockKind::Variable => "VariableBlock",
            BlockKind::FunctionDecl => "FunctionDeclBlock",
            BlockKind::Function => "FunctionBlock",
            BlockKind::MainFunction => "MainFunctionBlock",
        }
    }

    /// Function declarations, functions and wrapper mains all share the
    /// function-block line shape (`OpFunction` .. `OpFunctionEnd`).
    pub fn is_function(self) -> bool {
        matches!(
            self,
            BlockKind::FunctionDecl | BlockKind::Function | BlockKind::MainFunction
        )
    }
}

/// An ordered sequence of lines tagged by role. Insertion order within a
/// block is significant.
#[derive(Debug, Clone)]
pub struct Block {
    kind: BlockKind,
    lines: Vec<SpirvLine>,
}

impl Block {
    pub fn new(kind: BlockKind) -> Self {
        Block {
            kind,
            lines: Vec::new(),
        }
    }

    pub fn kind(&self) -> BlockKind {
        self.kind
    }

    /// Reclassifies the block. Used by the parser when a function body turns
    /// out to be a bodiless declaration.
    pub fn set_kind(&mut self, kind: BlockKind) {
        self.kind = kind;
    }

    pub fn lines(&self) -> &[SpirvLine] {
        &self.lines
    }

    pub fn lines_mut(&mut self) -> &mut Vec<SpirvLine> {
        &mut self.lines
    }

    pub fn push(&mut self, line: SpirvLine) {
        self.lines.push(line);
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn last_line(&self) -> Option<&SpirvLine> {
        self.lines.last()
    }

    pub fn has_code(&self) -> bool {
        self.lines.iter().any(SpirvLine::has_code)
    }

    pub fn remove_non_code_lines(&mut self) {
        self.lines.retain(SpirvLine::has_code);
    }

    /// Replaces every whitespace-bounded occurrence of `old` in the block.
    pub fn replace_all_ids(&mut self, old: &str, new: &str) {
        if old == new {
            return;
        }
        for line in &mut self.lines {
            while line.replace_id(old, new) {}
        }
    }

    /// Counts the occurrences of `id` across the block's lines.
    pub fn id_count(&self, id: &str) -> usize {
        self.lines
            .iter()
            .flat_map(|line| line.idents())
            .filter(|found| *found == id)
            .count()
    }

    /// Name of the function a function block defines, from the LHS of its
    /// leading `OpFunction` line.
    pub fn function_name(&self) -> Result<&str> {
        let first = self
            .lines
            .first()
            .ok_or_else(|| anyhow!("function block is empty"))?;
        if !first.contains("OpFunction") {
            bail!("function block does not start with OpFunction: {}", first);
        }
        first
            .lhs_ident()
            .ok_or_else(|| anyhow!("OpFunction line has no result identifier: {}", first))
    }

    /// Number of `OpFunctionParameter` lines.
    pub fn arity(&self) -> usize {
        self.lines
            .iter()
            .filter(|line| line.contains("OpFunctionParameter"))
            .count()
    }

    /// Parameter identifiers, in declaration order.
    pub fn param_names(&self) -> Vec<&str> {
        self.lines
            .iter()
            .filter(|line| line.contains("OpFunctionParameter"))
            .filter_map(|line| line.lhs_ident())
            .collect()
    }

    /// Identifier returned via `OpReturnValue`, if any.
    pub fn ret_val_name(&self) -> Option<&str> {
        self.lines
            .iter()
            .find(|line| line.contains("OpReturnValue"))
            .and_then(|line| line.idents().next())
    }

    /// The body of a function block: the lines strictly between the first
    /// `OpLabel` and the first `OpReturn*`.
    pub fn body(&self) -> Result<&[SpirvLine]> {
        let label = self
            .lines
            .iter()
            .position(|line| line.contains("OpLabel"))
            .ok_or_else(|| anyhow!("function block has no OpLabel"))?;
        let ret = self.lines[label..]
            .iter()
            .position(|line| line.contains("OpReturn"))
            .map(|offset| label + offset)
            .ok_or_else(|| anyhow!("function block has no OpReturn"))?;
        Ok(&self.lines[label + 1..ret])
    }

    /// Callee identifiers of every `OpFunctionCall` in the block.
    pub fn called_functions(&self) -> Vec<&str> {
        self.lines
            .iter()
            .filter(|line| line.contains("OpFunctionCall"))
            .filter_map(|line| line.rhs_idents().nth(1))
            .collect()
    }

    pub fn has_function_calls(&self) -> bool {
        self.lines.iter().any(|line| line.contains("OpFunctionCall"))
    }

    pub fn is_directly_recursive(&self) -> Result<bool> {
        let name = self.function_name()?;
        Ok(self.called_functions().contains(&name))
    }

    /// A function returns void iff its return type identifier is `%void` (or
    /// its linker-renamed form) and the line before `OpFunctionEnd` is a bare
    /// `OpReturn`.
    pub fn returns_void(&self) -> bool {
        let ret_ty = self
            .lines
            .first()
            .and_then(|line| line.rhs_idents().next().map(str::to_owned));
        match ret_ty.as_deref() {
            Some("%void") | Some("%rs_linker_void") => {}
            _ => return false,
        }
        if self.lines.len() < 2 {
            return false;
        }
        self.lines[self.lines.len() - 2].as_str().trim() == "OpReturn"
    }

    /// Reads the kernel-name list back from the header's `%RS_KERNELS`
    /// OpString, stripping the string quotes.
    pub fn kernel_names(&self) -> Option<Vec<String>> {
        for line in &self.lines {
            if !line.contains("OpString") || line.lhs_ident() != Some("%RS_KERNELS") {
                continue;
            }
            let unquoted = line.as_str().replace('"', "");
            let names = SpirvLine::new(unquoted)
                .rhs_idents()
                .map(str::to_owned)
                .collect();
            return Some(names);
        }
        None
    }
}
