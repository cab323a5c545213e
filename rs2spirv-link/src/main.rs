//! Links a translated RenderScript kernel module against its generated
//! compute wrapper.
//!
//! The kernel arrives in textual SPIR-V from the external LLVM-to-SPIR-V
//! translator; the bitcode side-band metadata arrives as a JSON sidecar.
//! The wrapper is generated from the metadata, optionally written out with
//! `--wo`, and the linked module lands at the output path.
use clap::Parser;
use log::debug;
use rs2spirv::{translate, TranslateOptions};
use serde::Deserialize;
use std::{
    fs,
    io::{stderr, Write},
    path::PathBuf,
    process::exit,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(help = "Input kernel module in textual SPIR-V (.spt).")]
    kernel_path: String,

    #[arg(short, long, help = "Kernel metadata sidecar path (JSON).")]
    metadata: String,

    #[arg(
        short,
        long,
        help = "Output path for the linked module. The output is printed to \
        stdout if this path is not given."
    )]
    out_path: Option<String>,

    #[arg(
        long = "wo",
        value_name = "filename.spt",
        help = "Wrapper output file."
    )]
    wrapper_output: Option<PathBuf>,
}

/// The metadata sidecar schema. Mirrors the library's plain records; the
/// serde derives stay on this side of the boundary.
#[derive(Debug, Deserialize)]
struct MetadataFile {
    kernels: Vec<KernelEntry>,
    #[serde(default)]
    gpu_block_offsets: Option<Vec<u32>>,
    #[serde(default)]
    allocations: Vec<AllocationEntry>,
    #[serde(default)]
    accessors: Vec<AccessorEntry>,
}

#[derive(Debug, Deserialize)]
struct KernelEntry {
    name: String,
    return_type: String,
    #[serde(default)]
    args: Vec<ArgEntry>,
}

#[derive(Debug, Deserialize)]
struct ArgEntry {
    name: String,
    #[serde(rename = "type")]
    ty: String,
}

#[derive(Debug, Deserialize)]
struct AllocationEntry {
    name: String,
    element_type: String,
}

#[derive(Debug, Deserialize)]
struct AccessorEntry {
    function: String,
    allocation: String,
    kind: AccessorKindEntry,
    element_type: String,
    /// Coordinate count at the call site; the historical default is 2.
    #[serde(default = "default_accessor_coords")]
    coords: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum AccessorKindEntry {
    Get,
    Set,
}

fn default_accessor_coords() -> usize {
    2
}

fn into_metadata(file: MetadataFile) -> anyhow::Result<rs2spirv::BitcodeMetadata> {
    use rs2spirv::metadata::*;
    use rs2spirv::Coords;

    let kernels = file
        .kernels
        .into_iter()
        .map(|kernel| FunctionInfo {
            name: kernel.name,
            return_type: kernel.return_type,
            args: kernel
                .args
                .into_iter()
                .map(|arg| ArgumentInfo::new(arg.name, arg.ty))
                .collect(),
        })
        .collect();
    let allocations = file
        .allocations
        .into_iter()
        .map(|alloc| AllocationInfo {
            var_name: alloc.name,
            element_type: alloc.element_type,
        })
        .collect();
    let accessors = file
        .accessors
        .into_iter()
        .map(|access| {
            Ok(AllocationAccess {
                function_name: access.function,
                allocation: access.allocation,
                kind: match access.kind {
                    AccessorKindEntry::Get => AccessKind::GetElementAt,
                    AccessorKindEntry::Set => AccessKind::SetElementAt,
                },
                element_type: access.element_type,
                coords: Coords::from_num(access.coords)?,
            })
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    Ok(rs2spirv::BitcodeMetadata {
        kernels,
        gpu_block: file
            .gpu_block_offsets
            .map(|field_offsets| GpuBlockLayout { field_offsets }),
        allocations,
        accessors,
    })
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let kernel = fs::read_to_string(&args.kernel_path).unwrap_or_else(|e| {
        writeln!(stderr(), "error: failed to read kernel module: {}", e).unwrap();
        exit(1);
    });

    let metadata_text = fs::read_to_string(&args.metadata).unwrap_or_else(|e| {
        writeln!(stderr(), "error: failed to read metadata sidecar: {}", e).unwrap();
        exit(1);
    });
    let metadata_file: MetadataFile =
        serde_json::from_str(&metadata_text).unwrap_or_else(|e| {
            writeln!(stderr(), "error: malformed metadata sidecar: {}", e).unwrap();
            exit(1);
        });
    let metadata = into_metadata(metadata_file).unwrap_or_else(|e| {
        writeln!(stderr(), "error: {}", e).unwrap();
        exit(1);
    });
    debug!("metadata describes {} kernels", metadata.kernels.len());

    let options = TranslateOptions {
        wrapper_output: args.wrapper_output,
    };
    let linked = translate(&kernel, &metadata, &options).unwrap_or_else(|e| {
        writeln!(stderr(), "error: {}", e).unwrap();
        exit(1);
    });

    if let Some(out_path) = args.out_path {
        fs::write(&out_path, linked.into_bytes()).unwrap_or_else(|e| {
            writeln!(stderr(), "error: failed to write output file: {}", e).unwrap();
            exit(1);
        });
    } else {
        println!("{}", linked);
    }
}
