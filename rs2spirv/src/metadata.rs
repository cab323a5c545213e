//! The side-band metadata contract extracted from RenderScript bitcode.
//!
//! Bitcode parsing itself is an external concern. The compiler consumes the
//! records below, which carry everything the reflection emitter and the
//! fixup passes need: the exported kernel list with per-argument names and
//! types, the optional `__GPUBlock` global struct layout, and the global
//! allocations together with the accessor calls made against them.
use anyhow::{bail, Result};

use crate::signature::Coords;

/// One exported function, in bitcode declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionInfo {
    pub name: String,
    /// RenderScript element type name, e.g. `uchar4`.
    pub return_type: String,
    pub args: Vec<ArgumentInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgumentInfo {
    pub name: String,
    /// RenderScript element type name; coordinate arguments are `int`.
    pub ty: String,
}

impl ArgumentInfo {
    pub fn new(name: impl Into<String>, ty: impl Into<String>) -> Self {
        ArgumentInfo {
            name: name.into(),
            ty: ty.into(),
        }
    }
}

/// Layout of the `__GPUBlock` global struct, when the script has one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpuBlockLayout {
    /// Byte offset of each field, in field order.
    pub field_offsets: Vec<u32>,
}

/// A global `rs_allocation` variable and its inferred element type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationInfo {
    /// Variable name without the `%` sigil.
    pub var_name: String,
    pub element_type: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    GetElementAt,
    SetElementAt,
}

/// One `rsGetElementAt_*`/`rsSetElementAt_*` call site found in the bitcode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationAccess {
    /// Mangled name of the called accessor, e.g. `rsGetElementAt_uchar4`.
    pub function_name: String,
    /// `var_name` of the accessed allocation.
    pub allocation: String,
    pub kind: AccessKind,
    pub element_type: String,
    /// Coordinate kind of the enclosing kernel at the call site.
    pub coords: Coords,
}

/// Everything the compiler reads from the bitcode side band.
#[derive(Debug, Clone, Default)]
pub struct BitcodeMetadata {
    pub kernels: Vec<FunctionInfo>,
    pub gpu_block: Option<GpuBlockLayout>,
    pub allocations: Vec<AllocationInfo>,
    pub accessors: Vec<AllocationAccess>,
}

impl BitcodeMetadata {
    /// Cross-checks the records against each other. Accessors must name a
    /// known allocation and carry actual coordinates.
    pub fn validate(&self) -> Result<()> {
        if self.kernels.is_empty() {
            bail!("no kernels found in bitcode metadata");
        }
        for access in &self.accessors {
            if access.coords == Coords::None {
                bail!(
                    "allocation accessor {} carries no coordinates",
                    access.function_name
                );
            }
            if self.allocation(&access.allocation).is_none() {
                bail!(
                    "allocation accessor {} refers to unknown allocation {}",
                    access.function_name,
                    access.allocation
                );
            }
        }
        Ok(())
    }

    pub fn allocation(&self, var_name: &str) -> Option<&AllocationInfo> {
        self.allocations
            .iter()
            .find(|alloc| alloc.var_name == var_name)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_validate_rejects_empty_kernel_list() {
        let metadata = BitcodeMetadata::default();
        assert!(metadata.validate().is_err());
    }

    #[test]
    fn test_validate_cross_checks_accessors() {
        let mut metadata = BitcodeMetadata::default();
        metadata.kernels.push(FunctionInfo {
            name: "invert".to_owned(),
            return_type: "uchar4".to_owned(),
            args: vec![ArgumentInfo::new("in", "uchar4")],
        });
        metadata.accessors.push(AllocationAccess {
            function_name: "rsGetElementAt_uchar4".to_owned(),
            allocation: "g".to_owned(),
            kind: AccessKind::GetElementAt,
            element_type: "uchar4".to_owned(),
            coords: Coords::XY,
        });
        assert!(metadata.validate().is_err());

        metadata.allocations.push(AllocationInfo {
            var_name: "g".to_owned(),
            element_type: "uchar4".to_owned(),
        });
        assert!(metadata.validate().is_ok());
    }
}
