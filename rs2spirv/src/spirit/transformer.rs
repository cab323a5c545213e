//! Binary pass infrastructure: a parsed module form, a per-instruction
//! rewrite hook and a queue running passes word-stream to word-stream.
use anyhow::{anyhow, Result};
use log::debug;
use spirv::Op;

use rs2spirv_core::parse::{Instruction, InstructionBuilder, SpirvBinary, SpirvHeader};

/// A SPIR-V module split at the first `OpFunction`: everything before it
/// (capabilities, imports, debug names, decorations, types, constants,
/// global variables) and everything from it on. New types and constants are
/// appended to the global section, which keeps them ahead of every use in
/// the function section.
pub struct BinaryModule {
    header: SpirvHeader,
    globals: Vec<Instruction>,
    functions: Vec<Instruction>,
}

impl BinaryModule {
    pub fn parse(words: &[u32]) -> Result<BinaryModule> {
        let binary = SpirvBinary::from(words);
        let header = binary
            .header()
            .ok_or_else(|| anyhow!("SPIR-V binary is shorter than the module header"))?;

        let mut globals = Vec::new();
        let mut functions = Vec::new();
        let mut in_functions = false;
        for instr in binary.instrs()? {
            let instr = instr?;
            in_functions |= instr.is(Op::Function);
            if in_functions {
                functions.push(instr);
            } else {
                globals.push(instr);
            }
        }
        Ok(BinaryModule {
            header,
            globals,
            functions,
        })
    }

    pub fn globals(&self) -> &[Instruction] {
        &self.globals
    }

    pub fn functions(&self) -> &[Instruction] {
        &self.functions
    }

    /// Serializes back to a word stream, with the bound covering every id
    /// handed out so far.
    pub fn words(&self) -> Vec<u32> {
        let mut words = self.header.words().to_vec();
        for instr in self.globals.iter().chain(self.functions.iter()) {
            words.extend_from_slice(instr.words());
        }
        words
    }

    /// A fresh result id above the module's current bound.
    pub fn fresh_id(&mut self) -> u32 {
        let id = self.header.bound;
        self.header.bound += 1;
        id
    }

    /// The debug name attached to `id`, if any.
    pub fn name_of(&self, id: u32) -> Option<String> {
        for instr in &self.globals {
            if !instr.is(Op::Name) {
                continue;
            }
            let mut operands = instr.operands();
            if operands.read_id().ok()? != id {
                continue;
            }
            return operands.read_str().ok();
        }
        None
    }

    /// The id carrying the debug name `name`, if any.
    pub fn id_named(&self, name: &str) -> Option<u32> {
        for instr in &self.globals {
            if !instr.is(Op::Name) {
                continue;
            }
            let mut operands = instr.operands();
            let id = operands.read_id().ok()?;
            if operands.read_str().ok()? == name {
                return Some(id);
            }
        }
        None
    }

    /// The 32-bit unsigned integer type, created on demand.
    pub fn uint32_type(&mut self) -> u32 {
        for instr in &self.globals {
            if instr.is(Op::TypeInt) && instr.words()[2..] == [32, 0] {
                return instr.words()[1];
            }
        }
        let id = self.fresh_id();
        self.globals.push(
            InstructionBuilder::new(Op::TypeInt)
                .push(id)
                .push(32)
                .push(0)
                .build(),
        );
        id
    }

    /// An `OpConstant` of the given type and value, created on demand.
    pub fn constant(&mut self, ty: u32, value: u32) -> u32 {
        for instr in &self.globals {
            if instr.is(Op::Constant)
                && instr.word_count() == 4
                && instr.words()[1] == ty
                && instr.words()[3] == value
            {
                return instr.words()[2];
            }
        }
        let id = self.fresh_id();
        self.globals.push(
            InstructionBuilder::new(Op::Constant)
                .push(ty)
                .push(id)
                .push(value)
                .build(),
        );
        id
    }

    /// A pointer type of the given storage class, created on demand.
    pub fn pointer_type(&mut self, storage_class: spirv::StorageClass, pointee: u32) -> u32 {
        for instr in &self.globals {
            if instr.is(Op::TypePointer)
                && instr.words()[2..] == [storage_class as u32, pointee]
            {
                return instr.words()[1];
            }
        }
        let id = self.fresh_id();
        self.globals.push(
            InstructionBuilder::new(Op::TypePointer)
                .push(id)
                .push(storage_class as u32)
                .push(pointee)
                .build(),
        );
        id
    }

    /// The GLSL.std.450 extended-instruction-set import. Created before the
    /// memory model when the module lacks one.
    pub fn glsl_ext_import(&mut self) -> Result<u32> {
        for instr in &self.globals {
            if !instr.is(Op::ExtInstImport) {
                continue;
            }
            let mut operands = instr.operands();
            let id = operands.read_id()?;
            if operands.read_str()? == "GLSL.std.450" {
                return Ok(id);
            }
        }
        let at = self
            .globals
            .iter()
            .position(|instr| instr.is(Op::MemoryModel))
            .ok_or_else(|| anyhow!("module has no OpMemoryModel"))?;
        let id = self.fresh_id();
        self.globals.insert(
            at,
            InstructionBuilder::new(Op::ExtInstImport)
                .push(id)
                .push_str("GLSL.std.450")
                .build(),
        );
        Ok(id)
    }
}

/// A structural rewrite applied to each function-section instruction in
/// order. Returning `None` keeps the instruction; returning a list replaces
/// it, an empty list deleting it.
pub trait Transformer {
    fn transform(
        &mut self,
        module: &mut BinaryModule,
        instr: &Instruction,
    ) -> Result<Option<Vec<Instruction>>>;
}

/// Runs a transformer over the function section of `words` and serializes
/// the rewritten module.
pub fn apply_transformer(transformer: &mut dyn Transformer, words: &[u32]) -> Result<Vec<u32>> {
    let mut module = BinaryModule::parse(words)?;
    let taken = std::mem::replace(&mut module.functions, Vec::new());
    let mut rewritten = Vec::with_capacity(taken.len());
    for instr in &taken {
        match transformer.transform(&mut module, instr)? {
            Some(replacement) => rewritten.extend(replacement),
            None => rewritten.push(instr.clone()),
        }
    }
    module.functions = rewritten;
    Ok(module.words())
}

/// One binary fixup pass: words in, words out.
pub trait BinaryPass {
    fn name(&self) -> &'static str;
    fn run(&mut self, words: &[u32]) -> Result<Vec<u32>>;
}

/// Runs passes in sequence over a single word buffer.
#[derive(Default)]
pub struct PassQueue {
    passes: Vec<Box<dyn BinaryPass>>,
}

impl PassQueue {
    pub fn new() -> Self {
        PassQueue::default()
    }

    pub fn append(&mut self, pass: Box<dyn BinaryPass>) {
        self.passes.push(pass);
    }

    pub fn run(&mut self, words: Vec<u32>) -> Result<Vec<u32>> {
        let mut words = words;
        for pass in &mut self.passes {
            debug!("running binary pass {}", pass.name());
            words = pass.run(&words)?;
        }
        Ok(words)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    fn test_module() -> Vec<u32> {
        let header = SpirvHeader {
            bound: 10,
            ..Default::default()
        };
        let mut words = header.words().to_vec();
        for instr in &[
            InstructionBuilder::new(Op::Capability).push(1).build(),
            InstructionBuilder::new(Op::MemoryModel).push(1).push(1).build(),
            InstructionBuilder::new(Op::Name).push(4).push_str("metadata").build(),
            InstructionBuilder::new(Op::TypeInt).push(2).push(32).push(0).build(),
            InstructionBuilder::new(Op::Function).push(2).push(5).push(0).push(3).build(),
            InstructionBuilder::new(Op::FunctionEnd).build(),
        ] {
            words.extend_from_slice(instr.words());
        }
        words
    }

    #[test]
    fn test_parse_splits_at_first_function() {
        let module = BinaryModule::parse(&test_module()).unwrap();
        assert_eq!(module.globals().len(), 4);
        assert_eq!(module.functions().len(), 2);
        assert_eq!(module.words(), test_module());
    }

    #[test]
    fn test_name_lookup() {
        let module = BinaryModule::parse(&test_module()).unwrap();
        assert_eq!(module.name_of(4).as_deref(), Some("metadata"));
        assert_eq!(module.id_named("metadata"), Some(4));
        assert_eq!(module.name_of(9), None);
        assert_eq!(module.id_named("missing"), None);
    }

    #[test]
    fn test_type_getters_reuse_existing_definitions() {
        let mut module = BinaryModule::parse(&test_module()).unwrap();
        assert_eq!(module.uint32_type(), 2);

        let first = module.constant(2, 0);
        let again = module.constant(2, 0);
        assert_eq!(first, again);
        let other = module.constant(2, 1);
        assert_ne!(first, other);

        let ptr = module.pointer_type(spirv::StorageClass::Uniform, 2);
        assert_eq!(module.pointer_type(spirv::StorageClass::Uniform, 2), ptr);
    }

    #[test]
    fn test_glsl_import_is_created_before_memory_model() {
        let mut module = BinaryModule::parse(&test_module()).unwrap();
        let id = module.glsl_ext_import().unwrap();
        assert_eq!(module.glsl_ext_import().unwrap(), id);
        let import_pos = module
            .globals()
            .iter()
            .position(|instr| instr.is(Op::ExtInstImport))
            .unwrap();
        let model_pos = module
            .globals()
            .iter()
            .position(|instr| instr.is(Op::MemoryModel))
            .unwrap();
        assert!(import_pos < model_pos);
    }

    struct DeleteFunctionEnds;
    impl Transformer for DeleteFunctionEnds {
        fn transform(
            &mut self,
            _module: &mut BinaryModule,
            instr: &Instruction,
        ) -> Result<Option<Vec<Instruction>>> {
            if instr.is(Op::FunctionEnd) {
                Ok(Some(Vec::new()))
            } else {
                Ok(None)
            }
        }
    }

    #[test]
    fn test_apply_transformer_deletes_and_keeps() {
        let words = apply_transformer(&mut DeleteFunctionEnds, &test_module()).unwrap();
        let module = BinaryModule::parse(&words).unwrap();
        assert_eq!(module.functions().len(), 1);
        assert!(module.functions()[0].is(Op::Function));
    }

    #[test]
    fn test_empty_pass_queue_is_identity() {
        let words = test_module();
        assert_eq!(PassQueue::new().run(words.clone()).unwrap(), words);
    }
}
