//! Lowering of math builtins to GLSL.std.450 extended instructions.
//!
//! The textual runtime library covers the hot intrinsics; the long tail of
//! math builtins is not emitted in textual form. Calls to them survive
//! linking as `OpFunctionCall`s against bodiless names and are rewritten
//! here into `OpExtInst`s on the binary form, reusing the call's result id
//! and type so no other instruction changes.
use anyhow::Result;
use log::debug;
use spirv::Op;

use rs2spirv_core::parse::{Instruction, InstructionBuilder};

use super::transformer::{apply_transformer, BinaryModule, BinaryPass, Transformer};

/// Mangled builtin names and their GLSL.std.450 instruction numbers.
const BUILTINS: &[(&str, u32)] = &[
    ("_Z4fabsf", 4),        // FAbs
    ("_Z5floorf", 8),       // Floor
    ("_Z4ceilf", 9),        // Ceil
    ("_Z3cosf", 14),        // Cos
    ("_Z3powff", 26),       // Pow
    ("_Z3logf", 28),        // Log
    ("_Z4exp2f", 29),       // Exp2
    ("_Z4log2f", 30),       // Log2
    ("_Z5rsqrtf", 32),      // InverseSqrt
];

#[derive(Default)]
pub struct BuiltinLowering;

impl BuiltinLowering {
    pub fn new() -> Self {
        BuiltinLowering::default()
    }
}

impl Transformer for BuiltinLowering {
    fn transform(
        &mut self,
        module: &mut BinaryModule,
        instr: &Instruction,
    ) -> Result<Option<Vec<Instruction>>> {
        if !instr.is(Op::FunctionCall) {
            return Ok(None);
        }
        let callee = instr.operand(2)?;
        let inst_number = match module.name_of(callee) {
            Some(name) => match BUILTINS.iter().find(|(builtin, _)| *builtin == name) {
                Some((_, number)) => *number,
                None => return Ok(None),
            },
            None => return Ok(None),
        };

        let result_type = instr.operand(0)?;
        let result_id = instr.operand(1)?;
        let args = &instr.words()[4..];
        debug!(
            "lowering builtin call at result id {} to GLSL.std.450 {}",
            result_id, inst_number
        );

        let ext_set = module.glsl_ext_import()?;
        let ext_inst = InstructionBuilder::new(Op::ExtInst)
            .push(result_type)
            .push(result_id)
            .push(ext_set)
            .push(inst_number)
            .push_list(args)
            .build();
        Ok(Some(vec![ext_inst]))
    }
}

impl BinaryPass for BuiltinLowering {
    fn name(&self) -> &'static str {
        "BuiltinLowering"
    }

    fn run(&mut self, words: &[u32]) -> Result<Vec<u32>> {
        apply_transformer(self, words)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use rs2spirv_core::parse::SpirvHeader;

    fn module_with_call(callee_name: &str) -> Vec<u32> {
        let header = SpirvHeader {
            bound: 20,
            ..Default::default()
        };
        let mut words = header.words().to_vec();
        for instr in &[
            InstructionBuilder::new(Op::ExtInstImport)
                .push(1)
                .push_str("GLSL.std.450")
                .build(),
            InstructionBuilder::new(Op::MemoryModel).push(1).push(1).build(),
            InstructionBuilder::new(Op::Name).push(3).push_str(callee_name).build(),
            InstructionBuilder::new(Op::TypeFloat).push(2).push(32).build(),
            InstructionBuilder::new(Op::Function).push(2).push(10).push(0).push(4).build(),
            InstructionBuilder::new(Op::FunctionCall)
                .push(2)
                .push(11)
                .push(3)
                .push(12)
                .build(),
            InstructionBuilder::new(Op::FunctionEnd).build(),
        ] {
            words.extend_from_slice(instr.words());
        }
        words
    }

    #[test]
    fn test_builtin_call_becomes_ext_inst() {
        let mut pass = BuiltinLowering::new();
        let words = pass.run(&module_with_call("_Z5floorf")).unwrap();
        let module = BinaryModule::parse(&words).unwrap();

        let ext = module
            .functions()
            .iter()
            .find(|instr| instr.is(Op::ExtInst))
            .expect("no OpExtInst emitted");
        // Result type and id are the call's; the set is the module's
        // GLSL.std.450 import and the instruction number is Floor.
        assert_eq!(ext.operand(0).unwrap(), 2);
        assert_eq!(ext.operand(1).unwrap(), 11);
        assert_eq!(ext.operand(2).unwrap(), 1);
        assert_eq!(ext.operand(3).unwrap(), 8);
        assert_eq!(ext.operand(4).unwrap(), 12);
        assert!(module
            .functions()
            .iter()
            .all(|instr| !instr.is(Op::FunctionCall)));
    }

    #[test]
    fn test_unknown_calls_pass_through() {
        let mut pass = BuiltinLowering::new();
        let input = module_with_call("_Z9not_knownf");
        let words = pass.run(&input).unwrap();
        assert_eq!(words, input);
    }
}
