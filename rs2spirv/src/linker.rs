//! The textual SPIR-V linker: fuses a kernel module with its generated
//! wrapper module.
//!
//! The kernel module arrives from the upstream LLVM-to-SPIR-V translator
//! with OpenCL-flavored header and decoration blocks; both are discarded in
//! favor of the wrapper's compute-shader scaffolding. Kernel identifiers are
//! prefixed on ingest so the merge needs no symbol table, kernel bodies are
//! structurally inlined into the wrapper mains, and types and constants are
//! canonicalized across the fused module.
use fnv::FnvHashMap as HashMap;
use std::collections::HashSet;

use anyhow::{anyhow, bail, Result};
use log::debug;

use rs2spirv_core::block::{Block, BlockKind};
use rs2spirv_core::line::SpirvLine;
use rs2spirv_core::module::TextModule;

use crate::reflection::{KERNEL_PLACEHOLDER, LINKER_PREFIX};

/// Prefixes every identifier in the kernel module with `%rs_linker_`,
/// guaranteeing disjointness from wrapper identifiers.
fn prefix_kernel_ids(module: &mut TextModule) {
    for line in module.lines_mut() {
        if line.contains("%") {
            *line = SpirvLine::new(line.as_str().replace('%', LINKER_PREFIX));
        }
    }
}

/// Rewrites every `Function` storage class in the kernel module to
/// `Uniform`. The upstream translator emits `Function` storage for what are
/// module-level buffers in a compute shader. Known over-approximation: a
/// legitimate `Function`-class use in the kernel body is rewritten too.
fn fix_storage_class(module: &mut TextModule) {
    for line in module.lines_mut() {
        while line.replace_str(" Function", " Uniform") {}
        while line.replace_str("_Function_", "_Uniform_") {}
    }
}

struct FunctionCallInfo {
    ret_val: String,
    callee: String,
    args: Vec<String>,
}

fn function_call_info(line: &SpirvLine) -> Result<FunctionCallInfo> {
    let ret_val = line
        .lhs_ident()
        .ok_or_else(|| anyhow!("OpFunctionCall has no result: {}", line))?
        .to_owned();
    let rhs = line.rhs_idents().map(str::to_owned).collect::<Vec<_>>();
    if rhs.len() < 2 {
        bail!("OpFunctionCall has no return type and function name: {}", line);
    }
    Ok(FunctionCallInfo {
        ret_val,
        callee: rhs[1].clone(),
        args: rhs[2..].to_vec(),
    })
}

/// Splices callee bodies over every call line currently in `main`, recording
/// param-to-argument and return-value renamings, then applies the renamings
/// in reverse order. One pass may expose new calls from inlined bodies;
/// `inline_kernel_into_wrapper` iterates until none remain.
fn inline_function_calls(module: &TextModule, main: &mut Block) -> Result<()> {
    debug!("inlining function calls");
    let mut fused = Block::new(BlockKind::MainFunction);
    let mut renames = Vec::<(String, String)>::new();

    for line in main.lines() {
        if !line.contains("OpFunctionCall") {
            fused.push(line.clone());
            continue;
        }
        let call = function_call_info(line)?;
        debug!("found function call: {}", line);

        let callee = module
            .blocks()
            .iter()
            .filter(|block| block.kind().is_function())
            .find(|block| block.function_name().ok() == Some(call.callee.as_str()))
            .ok_or_else(|| anyhow!("callee not found: {}", call.callee))?;

        if callee.arity() != call.args.len() {
            bail!(
                "arity mismatch calling {} (caller: {}, callee: {})",
                call.callee,
                call.args.len(),
                callee.arity()
            );
        }

        let ret_val = callee.ret_val_name();
        if ret_val.is_none() && !callee.returns_void() {
            bail!(
                "return value not found for {} with non-void return type",
                call.callee
            );
        }

        for (param, arg) in callee.param_names().iter().zip(&call.args) {
            renames.push(((*param).to_owned(), arg.clone()));
        }
        if let Some(ret_val) = ret_val {
            renames.push((call.ret_val.clone(), ret_val.to_owned()));
        }

        for body_line in callee.body()? {
            fused.push(body_line.clone());
        }
    }

    for (old, new) in renames.iter().rev() {
        debug!("replacing {} with {}", old, new);
        fused.replace_all_ids(old, new);
    }

    *main = fused;
    Ok(())
}

fn inline_kernel_into_wrapper(module: &TextModule, main: &mut Block) -> Result<()> {
    while main.has_function_calls() {
        inline_function_calls(module, main)?;
    }
    Ok(())
}

/// `OpInBoundsPtrAccessChain` carries one Element operand that
/// `OpAccessChain` lacks; drop it (RHS identifier index 2) and rename the
/// opcode.
fn translate_inbounds_ptr_access(line: &mut SpirvLine) -> Result<()> {
    const ELEMENT_ARG_POSITION: usize = 2;

    let lhs = line
        .lhs_ident()
        .ok_or_else(|| anyhow!("could not decompose OpInBoundsPtrAccessChain: {}", line))?;
    let ids = line.rhs_idents().collect::<Vec<_>>();
    if ids.len() < 4 {
        bail!("OpInBoundsPtrAccessChain has not enough parameters: {}", line);
    }

    let mut text = format!("{} = OpAccessChain", lhs);
    for (idx, id) in ids.iter().enumerate() {
        if idx != ELEMENT_ARG_POSITION {
            text.push(' ');
            text.push_str(id);
        }
    }
    *line = SpirvLine::new(text);
    Ok(())
}

fn fix_inbounds_ptr_access_chains(main: &mut Block) -> Result<()> {
    for line in main.lines_mut() {
        if line.contains("OpInBoundsPtrAccessChain") {
            translate_inbounds_ptr_access(line)?;
        }
    }
    Ok(())
}

/// Replaces undef components in `OpVectorShuffle` lines with zeros. The
/// result is unused for those lanes, and the target Vulkan backend crashes
/// on the undef marker.
fn fix_vector_shuffles(main: &mut Block) {
    const UNDEF: &str = " 4294967295 ";

    for line in main.lines_mut() {
        if !line.contains("OpVectorShuffle") {
            continue;
        }
        let mut text = line.as_str().to_owned();
        text.push(' ');
        let mut padded = SpirvLine::new(text);
        while padded.contains(UNDEF) {
            padded.replace_str(UNDEF, " 0 ");
        }
        padded.trim();
        *line = padded;
    }
}

/// Keeps exactly the non-main function blocks transitively reachable from
/// the last wrapper main.
fn remove_unused_functions(module: &mut TextModule) -> Result<()> {
    let main = module
        .blocks()
        .iter()
        .filter(|block| block.kind() == BlockKind::MainFunction)
        .last()
        .ok_or_else(|| anyhow!("module has no main function"))?;

    let mut used = HashSet::new();
    let mut worklist = main
        .called_functions()
        .iter()
        .map(|name| (*name).to_owned())
        .collect::<Vec<_>>();
    while let Some(name) = worklist.pop() {
        if !used.insert(name.clone()) {
            continue;
        }
        let callee = module
            .blocks()
            .iter()
            .filter(|block| block.kind().is_function())
            .find(|block| block.function_name().ok() == Some(name.as_str()));
        if let Some(callee) = callee {
            for next in callee.called_functions() {
                worklist.push(next.to_owned());
            }
        }
    }

    module.remove_blocks_if(|block| {
        if !block.kind().is_function() || block.kind() == BlockKind::MainFunction {
            return false;
        }
        let name = match block.function_name() {
            Ok(name) => name,
            Err(_) => return true,
        };
        let unused = !used.contains(name);
        if unused {
            debug!("removing unused function {}", name);
        }
        unused
    });
    Ok(())
}

/// Canonicalizes structurally identical type and constant definitions to a
/// single identifier. `OpTypeStruct` and `OpTypeRuntimeArray` are nominal
/// (merging them would corrupt decoration bindings) and never fuse.
/// Idempotent: a second run finds every surviving definition canonical.
pub fn fuse_types_and_constants(module: &mut TextModule) {
    let mut defs = HashMap::<String, String>::default();
    let mut renames = HashMap::<String, String>::default();

    for block in module.blocks_mut() {
        for line in block.lines_mut() {
            if !line.has_code() {
                continue;
            }

            // Rewrite references to fused-away identifiers first.
            let aliased = line
                .idents()
                .filter(|id| renames.contains_key(*id))
                .map(str::to_owned)
                .collect::<Vec<_>>();
            for alias in aliased {
                let replaced = line.replace_id(&alias, &renames[&alias]);
                debug_assert!(replaced);
            }

            if !line.contains("=") || !(line.contains("OpType") || line.contains("OpConstant")) {
                continue;
            }
            let lhs = match line.lhs_ident() {
                Some(lhs) => lhs.to_owned(),
                None => continue,
            };
            let rhs = match line.rhs() {
                Some(rhs) => rhs.to_owned(),
                None => continue,
            };
            if rhs.starts_with("OpTypeStruct") || rhs.starts_with("OpTypeRuntimeArray") {
                continue;
            }

            if let Some(canonical) = defs.get(&rhs) {
                debug!("new mapping: [{}, {}]", lhs, canonical);
                renames.insert(lhs, canonical.clone());
                line.mark_empty();
            } else {
                debug!("new val: {} : {}", rhs, lhs);
                defs.insert(rhs, lhs);
            }
        }
    }

    module.remove_non_code();
}

/// Links the wrapper and kernel modules into a fused compute module.
pub fn link(wrapper: &TextModule, kernel: &TextModule) -> Result<TextModule> {
    debug!("linking...");
    let kernel_names = wrapper.kernel_names()?;

    let mut kernel = kernel.clone();
    prefix_kernel_ids(&mut kernel);
    fix_storage_class(&mut kernel);

    let mut fused = TextModule::new();

    // The kernel module's header and decoration blocks carry OpenCL-specific
    // content (linkage attributes among others); the wrapper's compute
    // scaffolding replaces both wholesale.
    for block in wrapper.blocks() {
        match block.kind() {
            BlockKind::Header
            | BlockKind::Decoration
            | BlockKind::TypeAndConst
            | BlockKind::Variable
            | BlockKind::Function
            | BlockKind::MainFunction => {
                fused.add_block(block.clone());
            }
            BlockKind::FunctionDecl => {}
        }
    }

    let mut has_main = false;
    for block in fused.blocks() {
        has_main |= block.kind() == BlockKind::MainFunction;
    }
    if !has_main {
        bail!("wrapper module has no main function");
    }

    for block in kernel.blocks() {
        match block.kind() {
            BlockKind::TypeAndConst | BlockKind::Variable => {
                fused.add_block(block.clone());
            }
            BlockKind::Function => {
                if block.is_directly_recursive()? {
                    bail!("function {} is recursive", block.function_name()?);
                }
                fused.add_block(block.clone());
            }
            // Declarations are satisfied by the wrapper's runtime library.
            BlockKind::FunctionDecl => {}
            BlockKind::Header | BlockKind::Decoration => {}
            BlockKind::MainFunction => {
                bail!("kernel module must not define wrapper mains");
            }
        }
    }

    fused.fix_block_order();

    let main_count = fused
        .blocks()
        .iter()
        .filter(|block| block.kind() == BlockKind::MainFunction)
        .count();
    if main_count != kernel_names.len() {
        bail!("inconsistent kernel metadata and definitions");
    }

    for (idx, name) in kernel_names.iter().enumerate() {
        // Retarget the placeholder call at the renamed kernel body, then
        // inline it away together with any runtime-library calls.
        let kernel_fn = format!("{}{}", LINKER_PREFIX, name.trim_start_matches('%'));

        let module_view = fused.clone();
        let main = fused
            .blocks_mut()
            .iter_mut()
            .filter(|block| block.kind() == BlockKind::MainFunction)
            .nth(idx)
            .ok_or_else(|| anyhow!("main function {} not found", idx))?;
        main.replace_all_ids(KERNEL_PLACEHOLDER, &kernel_fn);

        inline_kernel_into_wrapper(&module_view, main)?;
        fix_inbounds_ptr_access_chains(main)?;
        fix_vector_shuffles(main);
    }

    remove_unused_functions(&mut fused)?;
    fuse_types_and_constants(&mut fused);

    Ok(fused)
}
