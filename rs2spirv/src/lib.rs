//! # RS2SPIRV: RenderScript Kernels to Vulkan Compute Shaders.
//!
//! RenderScript compute kernels arrive as LLVM bitcode with side-band
//! metadata naming the kernel entry points, their element types and the
//! global allocations they touch. An external translator turns the kernel
//! bodies into a textual SPIR-V module; this crate supplies everything
//! around that module to make it dispatchable on a Vulkan driver:
//!
//! - [`reflection`] emits a wrapper module carrying the compute-shader
//!   scaffolding: entry points, descriptor decorations, buffer layouts, the
//!   runtime library and one `main` per kernel.
//! - [`linker`] fuses the kernel module into the wrapper: identifiers are
//!   renamed apart, kernel bodies are inlined into the mains, and types and
//!   constants are canonicalized.
//! - [`spirit`] rewrites the assembled binary form: allocation accessor
//!   markers become metadata loads and leftover math builtins become
//!   GLSL.std.450 extended instructions.
//!
//! [`driver`] chains the stages; `rs2spirv-link` is the CLI front end.
//!
//! [`reflection`]: reflection/index.html
//! [`linker`]: linker/index.html
//! [`spirit`]: spirit/index.html
//! [`driver`]: driver/index.html
pub mod driver;
pub mod linker;
pub mod metadata;
pub mod reflection;
pub mod signature;
pub mod spirit;

#[cfg(test)]
mod tests;

pub use driver::{emit_wrapper, link_modules, run_fixup_passes, translate, TranslateOptions};
pub use metadata::BitcodeMetadata;
pub use signature::{Coords, KernelSignature, RsType};

/// Error infrastructure.
pub mod error {
    pub use anyhow::{anyhow, Error, Result};
}
