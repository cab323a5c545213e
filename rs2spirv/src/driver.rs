//! The translation pipeline: wrapper emission, linking and binary fixup.
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use log::debug;

use rs2spirv_core::module::TextModule;

use crate::linker;
use crate::metadata::BitcodeMetadata;
use crate::reflection::ReflectionEmitter;
use crate::signature::extract_kernel_signatures;
use crate::spirit;

/// Knobs of a translation run.
#[derive(Debug, Clone, Default)]
pub struct TranslateOptions {
    /// Write the generated wrapper module to this path during translation.
    pub wrapper_output: Option<PathBuf>,
}

/// Emits the wrapper module for the kernels described by `metadata`.
pub fn emit_wrapper(metadata: &BitcodeMetadata) -> Result<String> {
    let kernels = extract_kernel_signatures(metadata)?;
    let mut buf = Vec::new();
    ReflectionEmitter::new(&mut buf, metadata, &kernels).emit()?;
    Ok(String::from_utf8(buf)?)
}

/// Parses and links a wrapper module with a kernel module.
pub fn link_modules(wrapper: &str, kernel: &str) -> Result<TextModule> {
    let wrapper = TextModule::parse(wrapper).context("could not parse wrapper module")?;
    let kernel = TextModule::parse(kernel).context("could not parse kernel module")?;
    linker::link(&wrapper, &kernel)
}

/// Translates a kernel module, textual in and textual out: emits the
/// wrapper for `metadata`, optionally saves it, and links the kernel
/// against it. The result is ready for the external assembler; the
/// assembled words then go through `run_fixup_passes`.
pub fn translate(
    kernel_spt: &str,
    metadata: &BitcodeMetadata,
    options: &TranslateOptions,
) -> Result<String> {
    let wrapper = emit_wrapper(metadata)?;
    if let Some(path) = &options.wrapper_output {
        debug!("writing wrapper module to {}", path.display());
        fs::write(path, &wrapper)
            .with_context(|| format!("cannot open file: {}", path.display()))?;
    }

    let linked = link_modules(&wrapper, kernel_spt)?;
    linked.to_text()
}

/// Runs the post-assembly binary fixup passes over `words`.
pub fn run_fixup_passes(words: Vec<u32>) -> Result<Vec<u32>> {
    spirit::default_fixup_queue().run(words)
}
