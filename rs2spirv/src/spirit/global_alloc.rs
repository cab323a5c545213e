//! Lowering of global-allocation accessor markers.
//!
//! An earlier bitcode pass replaces `rsAllocationGetDimX(g)` with a call to
//! the marker `__rsov_rsAllocationGetDimX(<alloc id>)`; the marker function
//! does not exist. This pass replaces each such call with an access into the
//! module-level allocation metadata buffer:
//!
//! ```text
//! %r = OpFunctionCall %uint %__rsov_rsAllocationGetDimX ...
//! ```
//!
//! becomes
//!
//! ```text
//! %chain = OpAccessChain %_ptr_Uniform_uint %metadata %0 %0 %1
//! %r     = OpLoad %uint %chain
//! ```
//!
//! reusing the call's result id so downstream uses are untouched. The member
//! path `{0, 0, 1}` is the layout of `Metadata[0].size_x`.
use anyhow::{anyhow, Result};
use log::debug;
use spirv::{Op, StorageClass};

use rs2spirv_core::parse::{Instruction, InstructionBuilder};

use super::transformer::{apply_transformer, BinaryModule, BinaryPass, Transformer};

/// Marker callee recognized by the lowering.
pub const GET_DIM_X_MARKER: &str = "__rsov_rsAllocationGetDimX";

/// Debug name of the allocation metadata buffer variable.
pub const METADATA_VAR_NAME: &str = "__rsov_metadata";

#[derive(Default)]
pub struct GlobalAllocLowering;

impl GlobalAllocLowering {
    pub fn new() -> Self {
        GlobalAllocLowering::default()
    }
}

impl Transformer for GlobalAllocLowering {
    fn transform(
        &mut self,
        module: &mut BinaryModule,
        instr: &Instruction,
    ) -> Result<Option<Vec<Instruction>>> {
        if !instr.is(Op::FunctionCall) {
            return Ok(None);
        }
        let callee = instr.operand(2)?;
        match module.name_of(callee) {
            Some(name) if name == GET_DIM_X_MARKER => {}
            _ => return Ok(None),
        }
        let result_id = instr.operand(1)?;
        debug!("lowering {} call at result id {}", GET_DIM_X_MARKER, result_id);

        let metadata = module
            .id_named(METADATA_VAR_NAME)
            .ok_or_else(|| anyhow!("allocation metadata buffer not found in module"))?;

        let uint = module.uint32_type();
        let zero = module.constant(uint, 0);
        let one = module.constant(uint, 1);
        let ptr = module.pointer_type(StorageClass::Uniform, uint);
        let chain = module.fresh_id();

        let access = InstructionBuilder::new(Op::AccessChain)
            .push(ptr)
            .push(chain)
            .push(metadata)
            .push_list(&[zero, zero, one])
            .build();
        let load = InstructionBuilder::new(Op::Load)
            .push(uint)
            .push(result_id)
            .push(chain)
            .build();
        Ok(Some(vec![access, load]))
    }
}

impl BinaryPass for GlobalAllocLowering {
    fn name(&self) -> &'static str {
        "GlobalAllocLowering"
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
            InstructionBuilder::new(Op::MemoryModel).push(1).push(1).build(),
            InstructionBuilder::new(Op::Name).push(3).push_str(callee_name).build(),
            InstructionBuilder::new(Op::Name)
                .push(4)
                .push_str(METADATA_VAR_NAME)
                .build(),
            // %1 = OpTypeInt 32 0, then the metadata variable and the call.
            InstructionBuilder::new(Op::TypeInt).push(1).push(32).push(0).build(),
            InstructionBuilder::new(Op::Function).push(1).push(10).push(0).push(2).build(),
            InstructionBuilder::new(Op::FunctionCall)
                .push(1)
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
    fn test_marker_call_is_lowered() {
        let mut pass = GlobalAllocLowering::new();
        let words = pass.run(&module_with_call(GET_DIM_X_MARKER)).unwrap();
        let module = BinaryModule::parse(&words).unwrap();

        let access = module
            .functions()
            .iter()
            .find(|instr| instr.is(Op::AccessChain))
            .expect("no OpAccessChain emitted");
        let load = module
            .functions()
            .iter()
            .find(|instr| instr.is(Op::Load))
            .expect("no OpLoad emitted");
        assert!(module
            .functions()
            .iter()
            .all(|instr| !instr.is(Op::FunctionCall)));

        // The chain walks Metadata[0].size_x and the load reuses the call's
        // result id.
        assert_eq!(access.operand(2).unwrap(), 4);
        assert_eq!(load.operand(1).unwrap(), 11);
        assert_eq!(load.operand(2).unwrap(), access.operand(1).unwrap());
    }

    #[test]
    fn test_other_calls_pass_through() {
        let mut pass = GlobalAllocLowering::new();
        let input = module_with_call("unrelated");
        let words = pass.run(&input).unwrap();
        assert_eq!(words, input);
    }
}
