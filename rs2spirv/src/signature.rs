//! Kernel signatures and the RenderScript-to-SPIR-V type table.
use std::fmt;

use anyhow::{anyhow, bail, Result};
use log::debug;

use rs2spirv_core::WRAPPER_PREFIX;

use crate::metadata::{ArgumentInfo, BitcodeMetadata, FunctionInfo};

/// The legacy catch-all kernel name. Never compiled to a compute entry.
pub const ROOT_KERNEL: &str = "root";

/// The element types a kernel signature may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RsType {
    Void,
    Uchar,
    Int,
    Float,
    Uchar4,
    Int4,
    Float4,
}

impl RsType {
    pub fn from_name(name: &str) -> Result<RsType> {
        let ty = match name {
            "void" => RsType::Void,
            "uchar" => RsType::Uchar,
            "int" => RsType::Int,
            "float" => RsType::Float,
            "uchar4" => RsType::Uchar4,
            "int4" => RsType::Int4,
            "float4" => RsType::Float4,
            _ => bail!("unsupported element type: {}", name),
        };
        Ok(ty)
    }

    pub fn name(self) -> &'static str {
        match self {
            RsType::Void => "void",
            RsType::Uchar => "uchar",
            RsType::Int => "int",
            RsType::Float => "float",
            RsType::Uchar4 => "uchar4",
            RsType::Int4 => "int4",
            RsType::Float4 => "float4",
        }
    }

    /// The fixed mapping of this element type onto SPIR-V identifiers.
    pub fn mapping(self) -> &'static TypeMapping {
        match self {
            RsType::Void => &TypeMapping {
                is_vector: false,
                vector_width: 1,
                spirv_ty: "%void",
                scalar_ty: "%void",
                image_format: "",
                image_read_ty: "%void",
            },
            RsType::Uchar => &TypeMapping {
                is_vector: false,
                vector_width: 4,
                spirv_ty: "%uchar",
                scalar_ty: "%uchar",
                image_format: "R8ui",
                image_read_ty: "%v4uchar",
            },
            RsType::Int => &TypeMapping {
                is_vector: false,
                vector_width: 4,
                spirv_ty: "%int",
                scalar_ty: "%int",
                image_format: "R32i",
                image_read_ty: "%v4int",
            },
            RsType::Float => &TypeMapping {
                is_vector: false,
                vector_width: 4,
                spirv_ty: "%float",
                scalar_ty: "%float",
                image_format: "R32f",
                image_read_ty: "%v4float",
            },
            RsType::Uchar4 => &TypeMapping {
                is_vector: true,
                vector_width: 4,
                spirv_ty: "%v4uchar",
                scalar_ty: "%uchar",
                image_format: "Rgba8ui",
                image_read_ty: "%v4uchar",
            },
            RsType::Int4 => &TypeMapping {
                is_vector: true,
                vector_width: 4,
                spirv_ty: "%v4int",
                scalar_ty: "%int",
                image_format: "Rgba32i",
                image_read_ty: "%v4int",
            },
            RsType::Float4 => &TypeMapping {
                is_vector: true,
                vector_width: 4,
                spirv_ty: "%v4float",
                scalar_ty: "%float",
                image_format: "Rgba32f",
                image_read_ty: "%v4float",
            },
        }
    }
}

/// How a kernel signature maps onto SPIR-V. Scalar element types are loaded
/// and stored through their width-4 vector form because the buffer stride is
/// 16 bytes; `image_read_ty` is that widened type.
#[derive(Debug, PartialEq, Eq)]
pub struct TypeMapping {
    pub is_vector: bool,
    pub vector_width: usize,
    pub spirv_ty: &'static str,
    pub scalar_ty: &'static str,
    pub image_format: &'static str,
    pub image_read_ty: &'static str,
}

/// Coordinate arguments a kernel takes. The numeric value is the coordinate
/// count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Coords {
    None = 0,
    X,
    XY,
    XYZ,
}

impl Coords {
    pub const NAMES: [&'static str; 3] = ["x", "y", "z"];

    pub fn num(self) -> usize {
        self as usize
    }

    pub fn from_num(num: usize) -> Result<Coords> {
        let coords = match num {
            0 => Coords::None,
            1 => Coords::X,
            2 => Coords::XY,
            3 => Coords::XYZ,
            _ => bail!("unsupported coordinate count: {}", num),
        };
        Ok(coords)
    }
}

/// The extracted shape of one kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelSignature {
    pub return_type: RsType,
    pub argument_type: RsType,
    pub coords: Coords,
    pub name: String,
}

impl KernelSignature {
    /// Recognizes the trailing coordinate-argument suffix: arguments named
    /// `x`, `y`, `z` in that order, each typed `int`.
    fn coords_kind(args: &[ArgumentInfo]) -> Coords {
        if args.len() <= 1 {
            return Coords::None;
        }

        let mut x_pos = None;
        for (idx, arg) in args.iter().enumerate().rev() {
            if arg.ty != "int" {
                break;
            }
            if arg.name == "x" {
                x_pos = Some(idx);
            }
        }
        let x_pos = match x_pos {
            Some(pos) => pos,
            None => return Coords::None,
        };

        let num = args.len() - x_pos;
        if num > Coords::NAMES.len() {
            return Coords::None;
        }
        for (idx, arg) in args[x_pos..].iter().enumerate() {
            if arg.name != Coords::NAMES[idx] {
                return Coords::None;
            }
        }

        Coords::from_num(num).unwrap_or(Coords::None)
    }

    pub fn from_function(function: &FunctionInfo) -> Result<KernelSignature> {
        let coords = Self::coords_kind(&function.args);
        if function.args.len() != coords.num() + 1 {
            bail!(
                "unsupported kernel signature for {}: expected one element argument \
                 followed by x[, y[, z]] coordinates typed int",
                function.name
            );
        }

        let return_type = RsType::from_name(&function.return_type)
            .map_err(|err| anyhow!("kernel {}: {}", function.name, err))?;
        let argument_type = RsType::from_name(&function.args[0].ty)
            .map_err(|err| anyhow!("kernel {}: {}", function.name, err))?;

        let signature = KernelSignature {
            return_type,
            argument_type,
            coords,
            name: function.name.clone(),
        };
        debug!("extracted kernel signature: {}", signature);
        Ok(signature)
    }

    /// `%__rsov_entry_<name>`, the compute entry wrapping this kernel.
    pub fn wrapper_name(&self) -> String {
        format!("{}entry_{}", WRAPPER_PREFIX, self.name)
    }

    /// `%__rsov_<name><suffix>`, a wrapper-local temporary.
    pub fn temp_name(&self, suffix: &str) -> String {
        format!("{}{}{}", WRAPPER_PREFIX, self.name, suffix)
    }

    pub fn is_wrapper(id: &str) -> bool {
        id.starts_with(WRAPPER_PREFIX)
    }
}

impl fmt::Display for KernelSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}({}",
            self.return_type.name(),
            self.name,
            self.argument_type.name()
        )?;
        for name in &Coords::NAMES[..self.coords.num()] {
            write!(f, ", {}", name)?;
        }
        write!(f, ")")
    }
}

/// Extracts the signature of every kernel in declaration order, filtering
/// out the legacy `root` kernel.
pub fn extract_kernel_signatures(metadata: &BitcodeMetadata) -> Result<Vec<KernelSignature>> {
    metadata.validate()?;
    metadata
        .kernels
        .iter()
        .filter(|function| function.name != ROOT_KERNEL)
        .map(KernelSignature::from_function)
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    fn function(name: &str, ret: &str, args: &[(&str, &str)]) -> FunctionInfo {
        FunctionInfo {
            name: name.to_owned(),
            return_type: ret.to_owned(),
            args: args
                .iter()
                .map(|(name, ty)| ArgumentInfo::new(*name, *ty))
                .collect(),
        }
    }

    #[test]
    fn test_coords_detection() {
        let sig = KernelSignature::from_function(&function(
            "invert",
            "uchar4",
            &[("in", "uchar4"), ("x", "int"), ("y", "int")],
        ))
        .unwrap();
        assert_eq!(sig.coords, Coords::XY);
        assert_eq!(sig.return_type, RsType::Uchar4);
        assert_eq!(sig.argument_type, RsType::Uchar4);

        let sig = KernelSignature::from_function(&function("copy", "int", &[("in", "int")]))
            .unwrap();
        assert_eq!(sig.coords, Coords::None);
    }

    #[test]
    fn test_misnamed_coords_are_rejected() {
        // Trailing int arguments not named x, y, z are not coordinates, and
        // a kernel with extra non-coordinate arguments is unsupported.
        let err = KernelSignature::from_function(&function(
            "bad",
            "float",
            &[("in", "float"), ("col", "int"), ("row", "int")],
        ))
        .unwrap_err();
        assert!(err.to_string().contains("unsupported kernel signature"));

        // y alone, without x, is not a coordinate suffix either.
        assert!(KernelSignature::from_function(&function(
            "bad2",
            "float",
            &[("in", "float"), ("y", "int")],
        ))
        .is_err());
    }

    #[test]
    fn test_unsupported_element_type() {
        let err =
            KernelSignature::from_function(&function("bad", "double", &[("in", "double")]))
                .unwrap_err();
        assert!(err.to_string().contains("unsupported element type"));
    }

    #[test]
    fn test_wrapper_names() {
        let sig = KernelSignature::from_function(&function("invert", "uchar4", &[("in", "uchar4")]))
            .unwrap();
        assert_eq!(sig.wrapper_name(), "%__rsov_entry_invert");
        assert_eq!(sig.temp_name("res"), "%__rsov_invertres");
        assert!(KernelSignature::is_wrapper("%__rsov_entry_invert"));
        assert!(!KernelSignature::is_wrapper("%rs_linker_invert"));
    }

    #[test]
    fn test_root_is_filtered() {
        let metadata = BitcodeMetadata {
            kernels: vec![
                function("root", "void", &[("in", "uchar4")]),
                function("invert", "uchar4", &[("in", "uchar4")]),
            ],
            ..Default::default()
        };
        let signatures = extract_kernel_signatures(&metadata).unwrap();
        assert_eq!(signatures.len(), 1);
        assert_eq!(signatures[0].name, "invert");
    }

    #[test]
    fn test_widened_image_read_types() {
        assert_eq!(RsType::Uchar.mapping().image_read_ty, "%v4uchar");
        assert_eq!(RsType::Float.mapping().image_read_ty, "%v4float");
        assert_eq!(RsType::Uchar4.mapping().spirv_ty, "%v4uchar");
        assert_eq!(RsType::Uchar4.mapping().image_format, "Rgba8ui");
    }
}
