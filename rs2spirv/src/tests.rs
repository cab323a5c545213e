//! End-to-end pipeline tests over hand-written kernel modules.
use super::*;

use crate::metadata::{
    AccessKind, AllocationAccess, AllocationInfo, ArgumentInfo, FunctionInfo,
};

/// The `invert` kernel as the upstream LLVM-to-SPIR-V translator would emit
/// it: OpenCL-flavored header, imported runtime declarations, and a body
/// that clamps a coordinate, reads a neighbor from a global allocation and
/// shuffles the result.
const INVERT_KERNEL: &str = r#"; SPIR-V
; Version: 1.0
; Generator: Khronos LLVM/SPIR-V Translator; 14
; Bound: 40
; Schema: 0
      OpCapability Addresses
      OpCapability Linkage
      OpCapability Kernel
      OpMemoryModel Physical32 OpenCL
      OpEntryPoint Kernel %invert "invert"
      OpSource OpenCL_C 102000
      OpDecorate %invert LinkageAttributes "invert" Export
      OpDecorate %_Z5clampiii LinkageAttributes "_Z5clampiii" Import

%uint = OpTypeInt 32 0
%uchar = OpTypeInt 8 0
%v4uchar = OpTypeVector %uchar 4
%fun_uc4_uc4uu = OpTypeFunction %v4uchar %v4uchar %uint %uint
%fun_u_uuu = OpTypeFunction %uint %uint %uint %uint
%uint_0 = OpConstant %uint 0
%uint_255 = OpConstant %uint 255

%_Z5clampiii = OpFunction %uint None %fun_u_uuu
OpFunctionEnd

%rsGetElementAt_uchar4 = OpFunction %v4uchar None %fun_uc4_uc4uu
OpFunctionEnd

%invert = OpFunction %v4uchar None %fun_uc4_uc4uu
%in = OpFunctionParameter %v4uchar
%x = OpFunctionParameter %uint
%y = OpFunctionParameter %uint
%entry = OpLabel
%clamped = OpFunctionCall %uint %_Z5clampiii %x %uint_0 %uint_255
%neigh = OpFunctionCall %v4uchar %rsGetElementAt_uchar4 %in %clamped %y
%swz = OpVectorShuffle %v4uchar %neigh %neigh 0 1 2 4294967295
OpReturnValue %swz
OpFunctionEnd
"#;

fn invert_metadata() -> BitcodeMetadata {
    BitcodeMetadata {
        kernels: vec![
            FunctionInfo {
                name: "root".to_owned(),
                return_type: "void".to_owned(),
                args: vec![ArgumentInfo::new("in", "uchar4")],
            },
            FunctionInfo {
                name: "invert".to_owned(),
                return_type: "uchar4".to_owned(),
                args: vec![
                    ArgumentInfo::new("in", "uchar4"),
                    ArgumentInfo::new("x", "int"),
                    ArgumentInfo::new("y", "int"),
                ],
            },
        ],
        gpu_block: None,
        allocations: vec![AllocationInfo {
            var_name: "g".to_owned(),
            element_type: "uchar4".to_owned(),
        }],
        accessors: vec![AllocationAccess {
            function_name: "rsGetElementAt_uchar4".to_owned(),
            allocation: "g".to_owned(),
            kind: AccessKind::GetElementAt,
            element_type: "uchar4".to_owned(),
            coords: Coords::XY,
        }],
    }
}

fn translate_invert() -> String {
    translate(
        INVERT_KERNEL,
        &invert_metadata(),
        &TranslateOptions::default(),
    )
    .unwrap()
}

#[test]
fn test_single_entry_point_and_bindings() {
    let linked = translate_invert();
    // One compute entry for the kernel, none for root.
    assert_eq!(linked.matches("OpEntryPoint").count(), 1);
    assert!(linked.contains("OpEntryPoint GLCompute %__rsov_entry_invert \"invert\""));
    assert!(linked.contains("OpDecorate %__rsov_invertinputBuffer Binding 0"));
    assert!(linked.contains("OpDecorate %__rsov_invertoutputBuffer Binding 1"));
    assert!(linked.contains("OpDecorate %g_var Binding 3"));
}

#[test]
fn test_kernel_is_fully_inlined() {
    let linked = translate_invert();
    // Every call, including the runtime clamp and the allocation accessor,
    // is gone after linking.
    assert_eq!(linked.matches("OpFunctionCall").count(), 0);
    // The kernel's clamp lowered to the runtime library's extended
    // instruction, applied to the wrapper's coordinate.
    assert!(linked.contains(
        "%res_Z5clampiii = OpExtInst %uint %glsl_ext_ins SClamp \
         %__rsov_invertcoords_x %uint_zero %rs_linker_uint_255"
    ));
}

#[test]
fn test_accessor_becomes_image_read_at_call_coords() {
    let linked = translate_invert();
    assert!(linked.contains(
        "%argrsGetElementAt_uchar4 = OpCompositeConstruct %v2uint \
         %res_Z5clampiii %__rsov_invertcoords_y"
    ));
    assert!(linked.contains(
        "%readrsGetElementAt_uchar4 = OpImageRead %v4uchar %g_load \
         %argrsGetElementAt_uchar4"
    ));
    assert!(linked.contains("%g_load = OpLoad %g_image_ty %g_var"));
}

#[test]
fn test_undef_shuffle_components_are_zeroed() {
    let linked = translate_invert();
    assert!(!linked.contains("4294967295"));
    assert!(linked.contains("OpVectorShuffle %v4uchar"));
}

#[test]
fn test_types_and_constants_are_fused_across_modules() {
    let linked = translate_invert();
    // The kernel's duplicates of %uint, %uchar, %v4uchar and the zero
    // constant all collapsed onto the wrapper's definitions.
    assert_eq!(linked.matches("= OpTypeInt 32 0").count(), 1);
    assert_eq!(linked.matches("= OpTypeInt 8 0").count(), 1);
    assert_eq!(linked.matches("= OpTypeVector %uchar 4").count(), 1);
    assert_eq!(linked.matches("= OpConstant %uint 0").count(), 1);
    // The kernel-only constant survives under its renamed identifier.
    assert!(linked.contains("%rs_linker_uint_255 = OpConstant %uint 255"));
}

#[test]
fn test_no_unused_functions_remain() {
    let linked = translate_invert();
    // Post-inline, the runtime library and the kernel body have no callers
    // left and are swept; the only function in the module is the main.
    assert_eq!(linked.matches("; MainFunctionBlock").count(), 1);
    assert_eq!(linked.matches("; FunctionBlock").count(), 0);
    assert_eq!(linked.matches("; FunctionDeclBlock").count(), 0);
}

#[test]
fn test_blocks_are_in_canonical_order() {
    let linked = translate_invert();
    let decoration = linked.find("; DecorationBlock").unwrap();
    let types = linked.find("; TypeAndConstBlock").unwrap();
    let variables = linked.find("; VariableBlock").unwrap();
    let main = linked.find("; MainFunctionBlock").unwrap();
    assert!(decoration < types && types < variables && variables < main);
}

#[test]
fn test_wrapper_output_knob() {
    let path = std::env::temp_dir().join("rs2spirv_test_wrapper.spt");
    let options = TranslateOptions {
        wrapper_output: Some(path.clone()),
    };
    translate(INVERT_KERNEL, &invert_metadata(), &options).unwrap();
    let wrapper = std::fs::read_to_string(&path).unwrap();
    std::fs::remove_file(&path).unwrap();
    assert!(wrapper.contains("%RS_KERNELS = OpString \"%invert \""));
    assert!(wrapper.contains("%RS_SPIRV_DUMMY_"));
}

#[test]
fn test_mismatched_kernel_metadata_is_fatal() {
    // The wrapper advertises a kernel the kernel module does not define.
    let mut metadata = invert_metadata();
    metadata.kernels[1].name = "missing".to_owned();
    let err = translate(INVERT_KERNEL, &metadata, &TranslateOptions::default()).unwrap_err();
    assert!(err.to_string().contains("callee not found"));
}

#[test]
fn test_fixup_passes_run_after_assembly() {
    use rs2spirv_core::parse::{InstructionBuilder, SpirvHeader};
    use rs2spirv_core::spirv::Op;

    // A minimal assembled module with one lowered-accessor call.
    let header = SpirvHeader {
        bound: 20,
        ..Default::default()
    };
    let mut words = header.words().to_vec();
    for instr in &[
        InstructionBuilder::new(Op::MemoryModel).push(1).push(1).build(),
        InstructionBuilder::new(Op::Name)
            .push(3)
            .push_str("__rsov_rsAllocationGetDimX")
            .build(),
        InstructionBuilder::new(Op::Name)
            .push(4)
            .push_str("__rsov_metadata")
            .build(),
        InstructionBuilder::new(Op::TypeInt).push(1).push(32).push(0).build(),
        InstructionBuilder::new(Op::Function).push(1).push(10).push(0).push(2).build(),
        InstructionBuilder::new(Op::FunctionCall).push(1).push(11).push(3).push(12).build(),
        InstructionBuilder::new(Op::FunctionEnd).build(),
    ] {
        words.extend_from_slice(instr.words());
    }

    let fixed = run_fixup_passes(words).unwrap();
    let module = spirit::BinaryModule::parse(&fixed).unwrap();
    assert!(module
        .functions()
        .iter()
        .any(|instr| instr.is(Op::AccessChain)));
    assert!(module
        .functions()
        .iter()
        .all(|instr| !instr.is(Op::FunctionCall)));
}
