//! The reflection pass: emits the compute-shader wrapper module in textual
//! SPIR-V form.
//!
//! The wrapper supplies everything the translated kernel lacks: the
//! `OpEntryPoint GLCompute` scaffolding, descriptor-set decorations, the
//! input/output buffer layouts, the runtime library of RenderScript
//! intrinsics, and one `main` per kernel that adapts the per-element kernel
//! signature to the dispatch grid. The kernel body itself is referenced
//! through the `%RS_SPIRV_DUMMY_` placeholder call that the linker later
//! resolves and inlines.
//!
//! Emission is phased and order-critical; the phases mirror the canonical
//! SPIR-V module layout so the linker's parser can partition the result.
use std::io::Write;

use anyhow::{bail, Result};
use log::debug;

use crate::metadata::{AccessKind, AllocationAccess, BitcodeMetadata};
use crate::signature::{Coords, KernelSignature, RsType};

/// Placeholder callee of the per-kernel main; the linker retargets it at the
/// renamed kernel body and inlines it away.
pub const KERNEL_PLACEHOLDER: &str = "%RS_SPIRV_DUMMY_";

/// Placeholder parameter type of the runtime allocation accessors. The
/// inliner is structural and retypes parameters at the call site, so the
/// token never survives linking.
pub const INLINER_PLACEHOLDER_TY: &str = "%rs_inliner_placeholder_ty";

/// Identifier prefix every kernel-module identifier receives on ingest; the
/// runtime library is emitted pre-prefixed so kernel references unify with
/// it after the rename.
pub const LINKER_PREFIX: &str = "%rs_linker_";

pub struct ReflectionEmitter<'a, W: Write> {
    out: &'a mut W,
    metadata: &'a BitcodeMetadata,
    kernels: &'a [KernelSignature],
    next_result: u32,
}

impl<'a, W: Write> ReflectionEmitter<'a, W> {
    pub fn new(
        out: &'a mut W,
        metadata: &'a BitcodeMetadata,
        kernels: &'a [KernelSignature],
    ) -> Self {
        ReflectionEmitter {
            out,
            metadata,
            kernels,
            next_result: 0,
        }
    }

    /// Emits the complete wrapper module.
    pub fn emit(&mut self) -> Result<()> {
        if self.kernels.is_empty() {
            bail!("no kernels to reflect");
        }

        self.emit_header()?;
        self.emit_decorations()?;
        self.emit_common_types()?;
        for kernel in self.kernels {
            self.emit_kernel_types(kernel)?;
        }
        self.emit_builtin_inputs()?;
        for kernel in self.kernels {
            self.emit_input_buffer(kernel)?;
            self.emit_output_buffer(kernel)?;
        }
        self.emit_alloc_images()?;
        self.emit_constants()?;
        self.emit_runtime_functions()?;
        self.emit_alloc_accessors()?;
        for kernel in self.kernels {
            self.emit_main(kernel)?;
        }
        Ok(())
    }

    fn next_result_id(&mut self) -> String {
        let id = format!("%res{}", self.next_result);
        self.next_result += 1;
        id
    }

    fn emit_header(&mut self) -> Result<()> {
        debug!("emitting wrapper header");
        write!(
            self.out,
            "; SPIR-V\n\
             ; Version: 1.0\n\
             ; Generator: rs2spirv;\n\
             ; Bound: 1024\n\
             ; Schema: 0\n\
             \x20     OpCapability Shader\n\
             \x20     OpCapability StorageImageWriteWithoutFormat\n\
             \x20     OpCapability Addresses\n\
             \x20%glsl_ext_ins = OpExtInstImport \"GLSL.std.450\"\n\
             \x20     OpMemoryModel Physical32 GLSL450\n"
        )?;
        for kernel in self.kernels {
            writeln!(
                self.out,
                "      OpEntryPoint GLCompute {} \"{}\" %gl_GlobalInvocationID %gl_NumWorkGroups",
                kernel.wrapper_name(),
                kernel.name
            )?;
        }
        for kernel in self.kernels {
            writeln!(
                self.out,
                "      OpExecutionMode {} LocalSize 1 1 1",
                kernel.wrapper_name()
            )?;
        }
        write!(
            self.out,
            "      OpSource GLSL 450\n\
             \x20     OpSourceExtension \"GL_ARB_separate_shader_objects\"\n\
             \x20     OpSourceExtension \"GL_ARB_shading_language_420pack\"\n\
             \x20     OpSourceExtension \"GL_GOOGLE_cpp_style_line_directive\"\n\
             \x20     OpSourceExtension \"GL_GOOGLE_include_directive\"\n"
        )?;

        // The linker reads the kernel list back from this string to pair
        // kernels with wrapper mains.
        write!(self.out, " %RS_KERNELS = OpString \"")?;
        for kernel in self.kernels {
            write!(self.out, "%{} ", kernel.name)?;
        }
        writeln!(self.out, "\"")?;
        Ok(())
    }

    fn emit_decorations(&mut self) -> Result<()> {
        debug!("emitting decorations");
        write!(
            self.out,
            "\n\
             \x20   OpDecorate %gl_GlobalInvocationID BuiltIn GlobalInvocationId\n\
             \x20   OpDecorate %gl_NumWorkGroups BuiltIn NumWorkgroups\n\
             \x20   OpDecorate %gl_WorkGroupSize BuiltIn WorkgroupSize\n"
        )?;

        for kernel in self.kernels {
            for buffer in &["inputBuffer", "outputBuffer"] {
                let binding = if *buffer == "inputBuffer" { 0 } else { 1 };
                let mem_ty = if binding == 0 { "inputMemTy" } else { "outputMemTy" };
                writeln!(
                    self.out,
                    "OpDecorate {} ArrayStride 16",
                    kernel.temp_name(mem_ty)
                )?;
                writeln!(
                    self.out,
                    "OpMemberDecorate {}S 0 Offset 0",
                    kernel.temp_name(buffer)
                )?;
                writeln!(
                    self.out,
                    "OpDecorate {}S BufferBlock",
                    kernel.temp_name(buffer)
                )?;
                writeln!(
                    self.out,
                    "OpDecorate {} DescriptorSet 0",
                    kernel.temp_name(buffer)
                )?;
                writeln!(
                    self.out,
                    "OpDecorate {} Binding {}",
                    kernel.temp_name(buffer),
                    binding
                )?;
            }
        }

        if let Some(gpu_block) = &self.metadata.gpu_block {
            for (idx, offset) in gpu_block.field_offsets.iter().enumerate() {
                writeln!(
                    self.out,
                    "      OpMemberDecorate %rs_linker_struct___GPUBuffer {} Offset {}",
                    idx, offset
                )?;
            }
            writeln!(
                self.out,
                "      OpDecorate %rs_linker_struct___GPUBuffer BufferBlock"
            )?;
            writeln!(
                self.out,
                "      OpDecorate %rs_linker___GPUBlock DescriptorSet 0"
            )?;
            writeln!(self.out, "      OpDecorate %rs_linker___GPUBlock Binding 2")?;
        }

        // Global allocations take sequential bindings after the buffers and
        // the GPU block.
        for (idx, alloc) in self.metadata.allocations.iter().enumerate() {
            writeln!(
                self.out,
                "      OpDecorate %{}_var DescriptorSet 0",
                alloc.var_name
            )?;
            writeln!(
                self.out,
                "      OpDecorate %{}_var Binding {}",
                alloc.var_name,
                3 + idx
            )?;
        }
        Ok(())
    }

    fn emit_common_types(&mut self) -> Result<()> {
        debug!("emitting common types");
        write!(
            self.out,
            "\n\n\
             %void = OpTypeVoid\n\
             %fun_void = OpTypeFunction %void\n\
             %float = OpTypeFloat 32\n\
             %v2float = OpTypeVector %float 2\n\
             %v3float = OpTypeVector %float 3\n\
             %v4float = OpTypeVector %float 4\n\
             %int = OpTypeInt 32 1\n\
             %v2int = OpTypeVector %int 2\n\
             %v4int = OpTypeVector %int 4\n\
             %uchar = OpTypeInt 8 0\n\
             %v2uchar = OpTypeVector %uchar 2\n\
             %v3uchar = OpTypeVector %uchar 3\n\
             %v4uchar = OpTypeVector %uchar 4\n\
             %uint = OpTypeInt 32 0\n\
             %v2uint = OpTypeVector %uint 2\n\
             %v3uint = OpTypeVector %uint 3\n\
             %v4uint = OpTypeVector %uint 4\n\
             %fun_f3_uc3 = OpTypeFunction %v3float %v3uchar\n\
             %fun_f3_u3 = OpTypeFunction %v3float %v3uint\n\
             %fun_f4_uc4 = OpTypeFunction %v4float %v4uchar\n\
             %fun_uc3_f3 = OpTypeFunction %v3uchar %v3float\n\
             %fun_uc3_u3 = OpTypeFunction %v3uchar %v3uint\n\
             %fun_u3_f3 = OpTypeFunction %v3uint %v3float\n\
             %fun_uc4_f4 = OpTypeFunction %v4uchar %v4float\n\
             %fun_uc4_u4 = OpTypeFunction %v4uchar %v4uint\n\
             %fun_u4_uc4 = OpTypeFunction %v4uint %v4uchar\n\
             %fun_f_f = OpTypeFunction %float %float\n\
             %fun_f_ff = OpTypeFunction %float %float %float\n\
             %fun_f_fff = OpTypeFunction %float %float %float %float\n\
             %fun_f_f2f2 = OpTypeFunction %float %v2float %v2float\n\
             %fun_f_f3f3 = OpTypeFunction %float %v3float %v3float\n\
             %fun_f3_f3ff = OpTypeFunction %v3float %v3float %float %float\n\
             %fun_i_iii = OpTypeFunction %int %int %int %int\n\
             %fun_uc_uu = OpTypeFunction %uchar %uint %uint\n\
             %fun_u_uu = OpTypeFunction %uint %uint %uint\n\
             %fun_u_uuu = OpTypeFunction %uint %uint %uint %uint\n\
             %fun_u3_u3uu = OpTypeFunction %v3uint %v3uint %uint %uint\n"
        )?;
        Ok(())
    }

    fn emit_kernel_types(&mut self, kernel: &KernelSignature) -> Result<()> {
        debug!("emitting kernel types for {}", kernel.name);
        let ret = kernel.return_type.mapping();
        let arg = kernel.argument_type.mapping();

        write!(
            self.out,
            "\n{} = OpTypeFunction {} {}",
            kernel.temp_name("kernel_function_ty"),
            ret.spirv_ty,
            arg.spirv_ty
        )?;
        for _ in 0..kernel.coords.num() {
            write!(self.out, " %uint")?;
        }
        writeln!(self.out)?;

        writeln!(
            self.out,
            "{} = OpTypePointer Function {}",
            kernel.temp_name("ptr_function_ty"),
            ret.spirv_ty
        )?;
        writeln!(
            self.out,
            "{} = OpTypePointer Function {}\n",
            kernel.temp_name("ptr_function_access_ty"),
            ret.image_read_ty
        )?;
        Ok(())
    }

    fn emit_builtin_inputs(&mut self) -> Result<()> {
        debug!("emitting built-in inputs");
        write!(
            self.out,
            "\n\
             %_ptr_Function_uint = OpTypePointer Function %uint\n\
             %_ptr_Function_v4float = OpTypePointer Function %v4float\n\
             %_ptr_Input_uint = OpTypePointer Input %uint\n\
             %_ptr_Input_v3uint = OpTypePointer Input %v3uint\n\
             %gl_GlobalInvocationID = OpVariable %_ptr_Input_v3uint Input\n\
             %gl_NumWorkGroups = OpVariable %_ptr_Input_v3uint Input\n\
             %_ptr_Uniform_v4float = OpTypePointer Uniform %v4float\n\
             %group_size_x = OpConstant %uint 1\n\
             %group_size_y = OpConstant %uint 1\n\
             %group_size_z = OpConstant %uint 1\n\
             %gl_WorkGroupSize = OpConstantComposite %v3uint %group_size_x %group_size_y %group_size_z\n\
             %global_input_ptr_ty = OpTypePointer Input %v3uint\n"
        )?;
        Ok(())
    }

    /// Emits a runtime-array buffer of `element_ty` and returns the variable
    /// name.
    fn emit_buffer(&mut self, element_ty: &str, buf_var: String, arr_ty: String) -> Result<String> {
        let ptr_ty = self.next_result_id();
        let struct_ty = format!("{}S", buf_var);

        writeln!(self.out, "{} = OpTypeRuntimeArray {}", arr_ty, element_ty)?;
        writeln!(self.out, "{} = OpTypeStruct {}", struct_ty, arr_ty)?;
        writeln!(self.out, "{} = OpTypePointer Uniform {}", ptr_ty, struct_ty)?;
        writeln!(self.out, "{} = OpVariable {} Uniform", buf_var, ptr_ty)?;
        Ok(buf_var)
    }

    fn emit_input_buffer(&mut self, kernel: &KernelSignature) -> Result<String> {
        let element_ty = kernel.argument_type.mapping().spirv_ty;
        self.emit_buffer(
            element_ty,
            kernel.temp_name("inputBuffer"),
            kernel.temp_name("inputMemTy"),
        )
    }

    fn emit_output_buffer(&mut self, kernel: &KernelSignature) -> Result<String> {
        let element_ty = kernel.return_type.mapping().spirv_ty;
        self.emit_buffer(
            element_ty,
            kernel.temp_name("outputBuffer"),
            kernel.temp_name("outputMemTy"),
        )
    }

    fn emit_alloc_images(&mut self) -> Result<()> {
        debug!("emitting allocation images");
        for alloc in &self.metadata.allocations {
            let mapping = RsType::from_name(&alloc.element_type)?.mapping();
            writeln!(
                self.out,
                "\n%{var}_image_ty = OpTypeImage {scalar} 2D 0 0 0 2 {format}\n\
                 %{var}_image_ptr_ty = OpTypePointer UniformConstant %{var}_image_ty",
                var = alloc.var_name,
                scalar = mapping.scalar_ty,
                format = mapping.image_format
            )?;
            writeln!(
                self.out,
                "%{var}_var = OpVariable %{var}_image_ptr_ty UniformConstant",
                var = alloc.var_name
            )?;
        }
        Ok(())
    }

    fn emit_constants(&mut self) -> Result<()> {
        write!(
            self.out,
            "%uint_zero = OpConstant %uint 0\n\
             %uint_one = OpConstant %uint 1\n\
             %float_zero = OpConstant %float 0\n"
        )?;
        Ok(())
    }

    /// One trivial function per conversion intrinsic.
    fn emit_conversion_fun(
        &mut self,
        name: &str,
        fun_ty: &str,
        from: &str,
        to: &str,
        conversion_op: &str,
    ) -> Result<()> {
        write!(
            self.out,
            "\n\
             {prefix}{name} = OpFunction {to} Pure {fun_ty}\n\
             %param{name} = OpFunctionParameter {from}\n\
             %label{name} = OpLabel\n\
             %res{name} = {op} {to} %param{name}\n\
             \x20     OpReturnValue %res{name}\n\
             \x20     OpFunctionEnd\n",
            prefix = LINKER_PREFIX,
            name = name,
            to = to,
            from = from,
            fun_ty = fun_ty,
            op = conversion_op
        )?;
        Ok(())
    }

    /// One trivial function per GLSL.std.450 extended-instruction intrinsic.
    fn emit_eis_fun(
        &mut self,
        name: &str,
        fun_ty: &str,
        ret_ty: &str,
        arg_tys: &[&str],
        inst_name: &str,
    ) -> Result<()> {
        write!(
            self.out,
            "\n{}{} = OpFunction {} Pure {}\n",
            LINKER_PREFIX, name, ret_ty, fun_ty
        )?;
        for (idx, arg_ty) in arg_tys.iter().enumerate() {
            writeln!(self.out, "%param{}{} = OpFunctionParameter {}", name, idx, arg_ty)?;
        }
        write!(
            self.out,
            "%label{name} = OpLabel\n\
             %res{name} = OpExtInst {ret} %glsl_ext_ins {inst}",
            name = name,
            ret = ret_ty,
            inst = inst_name
        )?;
        for idx in 0..arg_tys.len() {
            write!(self.out, " %param{}{}", name, idx)?;
        }
        write!(
            self.out,
            "\n      OpReturnValue %res{}\n      OpFunctionEnd\n",
            name
        )?;
        Ok(())
    }

    /// The runtime library: conversions, math intrinsics, dot products and
    /// color pack/unpack. All pre-prefixed with the linker prefix so kernel
    /// calls resolve to them after the rename. Uses uints where the kernel
    /// side has i32s, matching the upstream LLVM-to-SPIR-V convention.
    fn emit_runtime_functions(&mut self) -> Result<()> {
        debug!("emitting runtime library");
        self.emit_conversion_fun(
            "_Z14convert_float4Dv4_h",
            "%fun_f4_uc4",
            "%v4uchar",
            "%v4float",
            "OpConvertUToF",
        )?;
        self.emit_conversion_fun(
            "_Z14convert_uchar4Dv4_f",
            "%fun_uc4_f4",
            "%v4float",
            "%v4uchar",
            "OpConvertFToU",
        )?;
        self.emit_conversion_fun(
            "_Z14convert_float3Dv3_h",
            "%fun_f3_uc3",
            "%v3uchar",
            "%v3float",
            "OpConvertUToF",
        )?;
        self.emit_conversion_fun(
            "_Z14convert_uchar3Dv3_f",
            "%fun_uc3_f3",
            "%v3float",
            "%v3uchar",
            "OpConvertFToU",
        )?;
        self.emit_conversion_fun(
            "_Z12convert_int3Dv3_f",
            "%fun_u3_f3",
            "%v3float",
            "%v3uint",
            "OpConvertFToU",
        )?;
        self.emit_conversion_fun(
            "_Z14convert_uchar3Dv3_i",
            "%fun_uc3_u3",
            "%v3uint",
            "%v3uchar",
            "OpUConvert",
        )?;
        self.emit_conversion_fun(
            "_Z14convert_uchar4Dv4_j",
            "%fun_uc4_u4",
            "%v4uint",
            "%v4uchar",
            "OpUConvert",
        )?;
        self.emit_conversion_fun(
            "_Z13convert_uint4Dv4_h",
            "%fun_u4_uc4",
            "%v4uchar",
            "%v4uint",
            "OpUConvert",
        )?;

        self.emit_eis_fun("_Z3sinf", "%fun_f_f", "%float", &["%float"], "Sin")?;
        self.emit_eis_fun("_Z4sqrtf", "%fun_f_f", "%float", &["%float"], "Sqrt")?;
        self.emit_eis_fun("_Z10native_expf", "%fun_f_f", "%float", &["%float"], "Exp")?;
        self.emit_eis_fun("_Z3maxii", "%fun_u_uu", "%uint", &["%uint", "%uint"], "SMax")?;
        self.emit_eis_fun("_Z3minii", "%fun_u_uu", "%uint", &["%uint", "%uint"], "SMin")?;
        self.emit_eis_fun("_Z3maxff", "%fun_f_ff", "%float", &["%float", "%float"], "FMax")?;
        self.emit_eis_fun("_Z3minff", "%fun_f_ff", "%float", &["%float", "%float"], "FMin")?;
        self.emit_eis_fun(
            "_Z5clampfff",
            "%fun_f_fff",
            "%float",
            &["%float", "%float", "%float"],
            "FClamp",
        )?;
        self.emit_eis_fun(
            "_Z5clampiii",
            "%fun_u_uuu",
            "%uint",
            &["%uint", "%uint", "%uint"],
            "SClamp",
        )?;

        write!(
            self.out,
            "\n\
             {p}_Z3dotDv2_fS_ = OpFunction %float Pure %fun_f_f2f2\n\
             %param_Z3dotDv2_fS_0 = OpFunctionParameter %v2float\n\
             %param_Z3dotDv2_fS_1 = OpFunctionParameter %v2float\n\
             %label_Z3dotDv2_fS = OpLabel\n\
             %res_Z3dotDv2_fS = OpDot %float %param_Z3dotDv2_fS_0 %param_Z3dotDv2_fS_1\n\
             \x20     OpReturnValue %res_Z3dotDv2_fS\n\
             \x20     OpFunctionEnd\n",
            p = LINKER_PREFIX
        )?;

        write!(
            self.out,
            "\n\
             {p}_Z3dotDv3_fS_ = OpFunction %float Pure %fun_f_f3f3\n\
             %param_Z3dotDv3_fS_0 = OpFunctionParameter %v3float\n\
             %param_Z3dotDv3_fS_1 = OpFunctionParameter %v3float\n\
             %label_Z3dotDv3_fS = OpLabel\n\
             %res_Z3dotDv3_fS = OpDot %float %param_Z3dotDv3_fS_0 %param_Z3dotDv3_fS_1\n\
             \x20     OpReturnValue %res_Z3dotDv3_fS\n\
             \x20     OpFunctionEnd\n",
            p = LINKER_PREFIX
        )?;

        write!(
            self.out,
            "\n\
             {p}rsUnpackColor8888 = OpFunction %v4float Pure %fun_f4_uc4\n\
             %paramrsUnpackColor88880 = OpFunctionParameter %v4uchar\n\
             %labelrsUnpackColor8888 = OpLabel\n\
             %castedUnpackColor8888 = OpBitcast %uint %paramrsUnpackColor88880\n\
             %resrsUnpackColor8888 = OpExtInst %v4float %glsl_ext_ins UnpackUnorm4x8 %castedUnpackColor8888\n\
             \x20     OpReturnValue %resrsUnpackColor8888\n\
             \x20     OpFunctionEnd\n",
            p = LINKER_PREFIX
        )?;

        write!(
            self.out,
            "\n\
             {p}_Z17rsPackColorTo8888Dv4_f = OpFunction %v4uchar Pure %fun_uc4_f4\n\
             %param_Z17rsPackColorTo8888Dv4_f0 = OpFunctionParameter %v4float\n\
             %label_Z17rsPackColorTo8888Dv4_f = OpLabel\n\
             %res_Z17rsPackColorTo8888Dv4_f = OpExtInst %uint %glsl_ext_ins PackUnorm4x8 %param_Z17rsPackColorTo8888Dv4_f0\n\
             %casted_Z17rsPackColorTo8888Dv4_f = OpBitcast %v4uchar %res_Z17rsPackColorTo8888Dv4_f\n\
             \x20     OpReturnValue %casted_Z17rsPackColorTo8888Dv4_f\n\
             \x20     OpFunctionEnd\n",
            p = LINKER_PREFIX
        )?;

        write!(
            self.out,
            "\n\
             {p}_Z5clampDv3_fff = OpFunction %v3float Pure %fun_f3_f3ff\n\
             %param_Z5clampDv3_fff0 = OpFunctionParameter %v3float\n\
             %param_Z5clampDv3_fff1 = OpFunctionParameter %float\n\
             %param_Z5clampDv3_fff2 = OpFunctionParameter %float\n\
             %label_Z5clampDv3_fff = OpLabel\n\
             %arg1_Z5clampDv3_fff = OpCompositeConstruct %v3float %param_Z5clampDv3_fff1 %param_Z5clampDv3_fff1 %param_Z5clampDv3_fff1\n\
             %arg2_Z5clampDv3_fff = OpCompositeConstruct %v3float %param_Z5clampDv3_fff2 %param_Z5clampDv3_fff2 %param_Z5clampDv3_fff2\n\
             %res_Z5clampDv3_fff = OpExtInst %v3float %glsl_ext_ins FClamp %param_Z5clampDv3_fff0 %arg1_Z5clampDv3_fff %arg2_Z5clampDv3_fff\n\
             \x20     OpReturnValue %res_Z5clampDv3_fff\n\
             \x20     OpFunctionEnd\n",
            p = LINKER_PREFIX
        )?;

        write!(
            self.out,
            "\n\
             {p}_Z5clampDv3_iii = OpFunction %v3uint Pure %fun_u3_u3uu\n\
             %param_Z5clampDv3_iii0 = OpFunctionParameter %v3uint\n\
             %param_Z5clampDv3_iii1 = OpFunctionParameter %uint\n\
             %param_Z5clampDv3_iii2 = OpFunctionParameter %uint\n\
             %label_Z5clampDv3_iii = OpLabel\n\
             %arg1_Z5clampDv3_iii = OpCompositeConstruct %v3uint %param_Z5clampDv3_iii1 %param_Z5clampDv3_iii1 %param_Z5clampDv3_iii1\n\
             %arg2_Z5clampDv3_iii = OpCompositeConstruct %v3uint %param_Z5clampDv3_iii2 %param_Z5clampDv3_iii2 %param_Z5clampDv3_iii2\n\
             %res_Z5clampDv3_iii = OpExtInst %v3uint %glsl_ext_ins UClamp %param_Z5clampDv3_iii0 %arg1_Z5clampDv3_iii %arg2_Z5clampDv3_iii\n\
             \x20     OpReturnValue %res_Z5clampDv3_iii\n\
             \x20     OpFunctionEnd\n",
            p = LINKER_PREFIX
        )?;
        Ok(())
    }

    /// Emits the composite coordinate construction shared by the accessor
    /// bodies, returning the identifier to pass to the image op.
    fn emit_coords_arg(&mut self, name: &str, coords: Coords) -> Result<String> {
        if coords.num() == 1 {
            return Ok(format!("%param{}_x", name));
        }
        write!(
            self.out,
            "%arg{} = OpCompositeConstruct %v{}uint",
            name,
            coords.num()
        )?;
        for coord in &Coords::NAMES[..coords.num()] {
            write!(self.out, " %param{}_{}", name, coord)?;
        }
        writeln!(self.out)?;
        Ok(format!("%arg{}", name))
    }

    /// `rsGetElementAt_*`: an `OpImageRead` against the allocation's image,
    /// behind the placeholder-typed signature the inliner expects.
    fn emit_gea(&mut self, access: &AllocationAccess, ret_ty: &str, load: &str) -> Result<()> {
        let name = &access.function_name;
        writeln!(
            self.out,
            "\n{}{} = OpFunction {} None {}",
            LINKER_PREFIX, name, ret_ty, INLINER_PLACEHOLDER_TY
        )?;
        writeln!(
            self.out,
            "%rs_drop_param_{} = OpFunctionParameter {}",
            name, INLINER_PLACEHOLDER_TY
        )?;
        for coord in &Coords::NAMES[..access.coords.num()] {
            writeln!(
                self.out,
                "%param{}_{} = OpFunctionParameter %uint",
                name, coord
            )?;
        }
        writeln!(self.out, "%label{} = OpLabel", name)?;
        let arg = self.emit_coords_arg(name, access.coords)?;
        writeln!(
            self.out,
            "%read{} = OpImageRead {} {} {}",
            name, ret_ty, load, arg
        )?;
        writeln!(self.out, "      OpReturnValue %read{}", name)?;
        writeln!(self.out, "      OpFunctionEnd")?;
        Ok(())
    }

    /// `rsSetElementAt_*`: the `OpImageWrite` counterpart.
    fn emit_sea(&mut self, access: &AllocationAccess, load: &str) -> Result<()> {
        let name = &access.function_name;
        writeln!(
            self.out,
            "\n{}{} = OpFunction %void None {}",
            LINKER_PREFIX, name, INLINER_PLACEHOLDER_TY
        )?;
        writeln!(
            self.out,
            "%rs_placeholder_param_{} = OpFunctionParameter {}",
            name, INLINER_PLACEHOLDER_TY
        )?;
        writeln!(
            self.out,
            "%param{}_new_val = OpFunctionParameter {}",
            name, INLINER_PLACEHOLDER_TY
        )?;
        for coord in &Coords::NAMES[..access.coords.num()] {
            writeln!(
                self.out,
                "%param{}_{} = OpFunctionParameter %uint",
                name, coord
            )?;
        }
        writeln!(self.out, "%label{} = OpLabel", name)?;
        let arg = self.emit_coords_arg(name, access.coords)?;
        writeln!(
            self.out,
            "OpImageWrite {} {} %param{}_new_val",
            load, arg, name
        )?;
        writeln!(self.out, "      OpReturn")?;
        writeln!(self.out, "      OpFunctionEnd")?;
        Ok(())
    }

    /// One accessor function per (allocation, accessor) pair found in the
    /// bitcode, each parameterized by the coordinate kind of its call site.
    fn emit_alloc_accessors(&mut self) -> Result<()> {
        for access in &self.metadata.accessors {
            if access.coords == Coords::None {
                bail!(
                    "allocation accessor {} requires coordinates",
                    access.function_name
                );
            }
            let mapping = RsType::from_name(&access.element_type)?.mapping();
            let load = format!("%{}_load", access.allocation);
            match access.kind {
                AccessKind::GetElementAt => self.emit_gea(access, mapping.spirv_ty, &load)?,
                AccessKind::SetElementAt => self.emit_sea(access, &load)?,
            }
        }
        Ok(())
    }

    /// The per-kernel compute main. Computes the linear element index from
    /// the global invocation id and the dispatch width, loads the input
    /// element, calls the kernel placeholder, and stores the result.
    fn emit_main(&mut self, kernel: &KernelSignature) -> Result<()> {
        debug!("emitting main for kernel {}", kernel.name);
        let ret_ty = kernel.return_type.mapping().spirv_ty;
        let arg_ty = kernel.argument_type.mapping().spirv_ty;
        let tmp = |suffix: &str| kernel.temp_name(suffix);

        writeln!(
            self.out,
            "{} = OpFunction %void None %fun_void",
            kernel.wrapper_name()
        )?;
        writeln!(self.out, "{} = OpLabel", tmp("label"))?;
        writeln!(
            self.out,
            "{} = OpLoad %v3uint %gl_GlobalInvocationID",
            tmp("coords_load")
        )?;
        for (idx, coord) in Coords::NAMES.iter().enumerate() {
            writeln!(
                self.out,
                "{} = OpCompositeExtract %uint {} {}",
                tmp(&format!("coords_{}", coord)),
                tmp("coords_load"),
                idx
            )?;
        }
        writeln!(
            self.out,
            "{} = OpVariable {} Function",
            tmp("res"),
            tmp("ptr_function_ty")
        )?;

        for alloc in &self.metadata.allocations {
            writeln!(
                self.out,
                "%{var}_load = OpLoad %{var}_image_ty %{var}_var",
                var = alloc.var_name
            )?;
        }

        writeln!(
            self.out,
            "{} = OpIMul %uint {} %group_size_x",
            tmp("tmp1"),
            tmp("coords_y")
        )?;
        writeln!(
            self.out,
            "{} = OpAccessChain %_ptr_Input_uint %gl_NumWorkGroups %uint_zero",
            tmp("tmp2")
        )?;
        writeln!(self.out, "{} = OpLoad %uint {}", tmp("tmp3"), tmp("tmp2"))?;
        writeln!(
            self.out,
            "{} = OpIMul %uint {} {}",
            tmp("tmp4"),
            tmp("tmp1"),
            tmp("tmp3")
        )?;
        writeln!(
            self.out,
            "{} = OpIAdd %uint {} {}",
            tmp("tmp5"),
            tmp("tmp4"),
            tmp("coords_x")
        )?;
        writeln!(
            self.out,
            "{} = OpAccessChain {} {} %uint_zero {}",
            tmp("tmp6"),
            tmp("ptr_function_ty"),
            tmp("inputBuffer"),
            tmp("tmp5")
        )?;
        writeln!(
            self.out,
            "{} = OpLoad {} {}",
            tmp("inputPixel"),
            arg_ty,
            tmp("tmp6")
        )?;

        write!(
            self.out,
            "{} = OpFunctionCall {} {} {}",
            tmp("tmp7"),
            ret_ty,
            KERNEL_PLACEHOLDER,
            tmp("inputPixel")
        )?;
        for coord in &Coords::NAMES[..kernel.coords.num()] {
            write!(self.out, " {}{}", tmp("coords_"), coord)?;
        }
        writeln!(self.out)?;

        writeln!(self.out, "OpStore {} {}", tmp("res"), tmp("tmp7"))?;
        writeln!(self.out, "{} = OpLoad {} {}", tmp("tmp8"), ret_ty, tmp("res"))?;
        writeln!(
            self.out,
            "{} = OpAccessChain {} {} %uint_zero {}",
            tmp("tmp9"),
            tmp("ptr_function_ty"),
            tmp("outputBuffer"),
            tmp("tmp5")
        )?;
        writeln!(self.out, "OpStore {} {}", tmp("tmp9"), tmp("tmp8"))?;
        writeln!(self.out, "\n    OpReturn\n    OpFunctionEnd")?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::metadata::{AllocationInfo, ArgumentInfo, FunctionInfo};
    use crate::signature::extract_kernel_signatures;

    fn metadata_with_kernel() -> BitcodeMetadata {
        BitcodeMetadata {
            kernels: vec![
                FunctionInfo {
                    name: "invert".to_owned(),
                    return_type: "uchar4".to_owned(),
                    args: vec![
                        ArgumentInfo::new("in", "uchar4"),
                        ArgumentInfo::new("x", "int"),
                        ArgumentInfo::new("y", "int"),
                    ],
                },
                FunctionInfo {
                    name: "root".to_owned(),
                    return_type: "void".to_owned(),
                    args: vec![ArgumentInfo::new("in", "uchar4")],
                },
            ],
            ..Default::default()
        }
    }

    fn emit(metadata: &BitcodeMetadata) -> String {
        let kernels = extract_kernel_signatures(metadata).unwrap();
        let mut buf = Vec::new();
        ReflectionEmitter::new(&mut buf, metadata, &kernels)
            .emit()
            .unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn test_entry_points_exclude_root() {
        let wrapper = emit(&metadata_with_kernel());
        assert_eq!(wrapper.matches("OpEntryPoint GLCompute").count(), 1);
        assert!(wrapper
            .contains("OpEntryPoint GLCompute %__rsov_entry_invert \"invert\""));
        assert!(!wrapper.contains("\"root\""));
        assert!(wrapper.contains("%RS_KERNELS = OpString \"%invert \""));
    }

    #[test]
    fn test_buffer_bindings() {
        let wrapper = emit(&metadata_with_kernel());
        assert!(wrapper.contains("OpDecorate %__rsov_invertinputBuffer Binding 0"));
        assert!(wrapper.contains("OpDecorate %__rsov_invertoutputBuffer Binding 1"));
        assert!(wrapper.contains("OpDecorate %__rsov_invertinputMemTy ArrayStride 16"));
        assert!(wrapper.contains("OpDecorate %__rsov_invertinputBufferS BufferBlock"));
    }

    #[test]
    fn test_main_calls_placeholder_with_coords() {
        let wrapper = emit(&metadata_with_kernel());
        assert!(wrapper.contains(
            "%__rsov_inverttmp7 = OpFunctionCall %v4uchar %RS_SPIRV_DUMMY_ \
             %__rsov_invertinputPixel %__rsov_invertcoords_x %__rsov_invertcoords_y"
        ));
    }

    #[test]
    fn test_alloc_images_and_accessors() {
        let mut metadata = metadata_with_kernel();
        metadata.allocations.push(AllocationInfo {
            var_name: "g".to_owned(),
            element_type: "uchar4".to_owned(),
        });
        metadata.accessors.push(AllocationAccess {
            function_name: "rsGetElementAt_uchar4".to_owned(),
            allocation: "g".to_owned(),
            kind: AccessKind::GetElementAt,
            element_type: "uchar4".to_owned(),
            coords: Coords::XY,
        });
        let wrapper = emit(&metadata);

        assert!(wrapper.contains("%g_image_ty = OpTypeImage %uchar 2D 0 0 0 2 Rgba8ui"));
        assert!(wrapper.contains("OpDecorate %g_var Binding 3"));
        assert!(wrapper.contains(
            "%rs_linker_rsGetElementAt_uchar4 = OpFunction %v4uchar None \
             %rs_inliner_placeholder_ty"
        ));
        assert!(wrapper.contains(
            "%readrsGetElementAt_uchar4 = OpImageRead %v4uchar %g_load \
             %argrsGetElementAt_uchar4"
        ));
        assert!(wrapper.contains("%g_load = OpLoad %g_image_ty %g_var"));
    }

    #[test]
    fn test_gpu_block_decorations() {
        let mut metadata = metadata_with_kernel();
        metadata.gpu_block = Some(crate::metadata::GpuBlockLayout {
            field_offsets: vec![0, 4, 16],
        });
        let wrapper = emit(&metadata);
        assert!(wrapper
            .contains("OpMemberDecorate %rs_linker_struct___GPUBuffer 1 Offset 4"));
        assert!(wrapper.contains("OpDecorate %rs_linker___GPUBlock Binding 2"));
    }
}
