//! # RS2SPIRV-CORE: SPIR-V Module Models for the rs2spirv Compiler.
//!
//! This crate carries the two representations of a SPIR-V module the
//! compiler pipeline works on:
//!
//! - The *textual* model (`line`, `block`, `module`): a SPIR-V assembly
//!   module partitioned into semantically-typed blocks of lines, as produced
//!   by the Khronos assembler's textual form. The linker and the reflection
//!   emitter operate on this model.
//! - The *binary* model (`parse`): a little-endian word stream decoded into
//!   instructions, which the post-link fixup passes rewrite in place.
pub use spirv;

pub mod block;
pub mod line;
pub mod module;
pub mod parse;

pub use block::{Block, BlockKind};
pub use line::SpirvLine;
pub use module::{TextModule, WRAPPER_PREFIX};
pub use parse::SpirvBinary;

/// Error infrastructure.
pub mod error {
    pub use anyhow::{anyhow, Error, Result};
}
