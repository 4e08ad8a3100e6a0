//! Catalog of external Boolean engines.
//!
//! Every engine is described by static data plus one pure function that turns
//! an operation into an argument vector. Nothing here touches the filesystem or
//! spawns processes; availability is decided from environment markers only.

pub mod benchmarks;
mod environment;

pub use benchmarks::{BenchmarkSeries, TRIANGLE_COUNTS};
pub use environment::{EnvironmentProbe, LayeredEnvironment, ProcessEnvironment};

use crate::error::JobError;
use crate::model::{AlgorithmId, MeshFormat, Operator};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Fallback install location inside a SALOME SMESH tree.
const SMESH_ROOT_VAR: &str = "SMESH_ROOT_DIR";
const SMESH_PLUGIN_SUBDIR: [&str; 5] = ["share", "salome", "plugins", "smesh", "meshbooleanplugin"];

/// Inputs to a [`CommandBuilder`].
#[derive(Debug, Clone, Copy)]
pub struct CommandContext<'a> {
    pub executable: &'a Path,
    pub operator: Operator,
    pub left: &'a Path,
    pub right: &'a Path,
    pub output: &'a Path,
}

/// Builds the full argv (executable first) for one backend invocation.
pub type CommandBuilder = fn(&CommandContext<'_>) -> Vec<OsString>;

/// Backend-specific cleanup applied to raw output before conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawFixup {
    None,
    /// ASCII output written with a locale decimal comma.
    DecimalCommas,
}

#[derive(Debug, Clone)]
pub struct AlgorithmDescriptor {
    pub id: AlgorithmId,
    pub display_name: &'static str,
    pub license_label: &'static str,
    pub required_input_format: MeshFormat,
    pub output_format: MeshFormat,
    pub command_builder: CommandBuilder,
    pub benchmarks: &'static BenchmarkSeries,
    /// Environment variables whose presence marks the engine as installed.
    /// The first one is the engine's own root directory.
    pub markers: &'static [&'static str],
    pub binary: &'static str,
    /// Directory name under the SMESH plugin tree.
    pub plugin_dir: &'static str,
    pub raw_fixup: RawFixup,
}

impl AlgorithmDescriptor {
    pub fn is_available(&self, env: &dyn EnvironmentProbe) -> bool {
        self.markers.iter().any(|m| env.var(m).is_some())
    }

    /// Locate the engine executable: `<ROOT>/bin/<binary>`, else the SMESH plugin tree.
    pub fn resolve_executable(&self, env: &dyn EnvironmentProbe) -> Option<PathBuf> {
        if let Some(root) = self.markers.first().and_then(|m| env.var(m)) {
            return Some(Path::new(&root).join("bin").join(self.binary));
        }
        env.var(SMESH_ROOT_VAR).map(|root| {
            let mut path = PathBuf::from(root);
            path.extend(SMESH_PLUGIN_SUBDIR);
            path.push(self.plugin_dir);
            path.push(self.binary);
            path
        })
    }

    pub fn command(&self, ctx: &CommandContext<'_>) -> Vec<OsString> {
        (self.command_builder)(ctx)
    }
}

fn operands_then_output(ctx: &CommandContext<'_>, token: &str) -> Vec<OsString> {
    vec![
        ctx.executable.into(),
        token.into(),
        ctx.left.into(),
        ctx.right.into(),
        ctx.output.into(),
    ]
}

fn plain_command(ctx: &CommandContext<'_>) -> Vec<OsString> {
    operands_then_output(ctx, ctx.operator.as_str())
}

/// The VTK engine is a Python script rather than a native binary.
fn vtk_command(ctx: &CommandContext<'_>) -> Vec<OsString> {
    let mut argv = vec![OsString::from("python3")];
    argv.extend(plain_command(ctx));
    argv
}

fn irmb_command(ctx: &CommandContext<'_>) -> Vec<OsString> {
    let token = match ctx.operator {
        Operator::Difference => "subtraction",
        op => op.as_str(),
    };
    operands_then_output(ctx, token)
}

fn cork_command(ctx: &CommandContext<'_>) -> Vec<OsString> {
    let token = match ctx.operator {
        Operator::Union => "-union",
        Operator::Intersection => "-isct",
        Operator::Difference => "-diff",
    };
    operands_then_output(ctx, token)
}

fn mcut_command(ctx: &CommandContext<'_>) -> Vec<OsString> {
    let token = match ctx.operator {
        Operator::Union => "-u",
        Operator::Intersection => "-i",
        Operator::Difference => "-ds",
    };
    vec![
        ctx.executable.into(),
        ctx.left.into(),
        ctx.right.into(),
        token.into(),
        ctx.output.into(),
    ]
}

/// The six engines shipped with the plugin.
pub fn builtin_descriptors() -> Vec<AlgorithmDescriptor> {
    vec![
        AlgorithmDescriptor {
            id: AlgorithmId::Cgal,
            display_name: "CGAL",
            license_label: "GPL-3.0-or-later",
            required_input_format: MeshFormat::Obj,
            output_format: MeshFormat::Off,
            command_builder: plain_command,
            benchmarks: &benchmarks::CGAL,
            markers: &["CGAL_ROOT_DIR"],
            binary: "exec_cgal",
            plugin_dir: "cgal",
            raw_fixup: RawFixup::None,
        },
        AlgorithmDescriptor {
            id: AlgorithmId::Igl,
            display_name: "libigl",
            license_label: "MPL-2.0",
            required_input_format: MeshFormat::Obj,
            output_format: MeshFormat::Obj,
            command_builder: plain_command,
            benchmarks: &benchmarks::IGL,
            markers: &["LIBIGL_ROOT_DIR"],
            binary: "609_Boolean",
            plugin_dir: "libigl",
            raw_fixup: RawFixup::None,
        },
        AlgorithmDescriptor {
            id: AlgorithmId::Vtk,
            display_name: "VTK",
            license_label: "BSD-3-Clause",
            required_input_format: MeshFormat::Obj,
            output_format: MeshFormat::Stl,
            command_builder: vtk_command,
            benchmarks: &benchmarks::VTK,
            // VTK ships with SALOME itself.
            markers: &["VTK_ROOT_DIR", SMESH_ROOT_VAR],
            binary: "run_vtk.py",
            plugin_dir: "vtk",
            raw_fixup: RawFixup::DecimalCommas,
        },
        AlgorithmDescriptor {
            id: AlgorithmId::Irmb,
            display_name: "Interactive And Robust Mesh Booleans",
            license_label: "MIT",
            required_input_format: MeshFormat::Obj,
            output_format: MeshFormat::Obj,
            command_builder: irmb_command,
            benchmarks: &benchmarks::IRMB,
            markers: &["IRMB_ROOT_DIR"],
            binary: "mesh_booleans",
            plugin_dir: "irmb",
            raw_fixup: RawFixup::None,
        },
        AlgorithmDescriptor {
            id: AlgorithmId::Cork,
            display_name: "Cork",
            license_label: "LGPL-3.0",
            required_input_format: MeshFormat::Off,
            output_format: MeshFormat::Off,
            command_builder: cork_command,
            benchmarks: &benchmarks::CORK,
            markers: &["CORK_ROOT_DIR"],
            binary: "cork_bin",
            plugin_dir: "cork",
            raw_fixup: RawFixup::None,
        },
        AlgorithmDescriptor {
            id: AlgorithmId::Mcut,
            display_name: "mcut",
            license_label: "LGPL-3.0",
            required_input_format: MeshFormat::Obj,
            output_format: MeshFormat::Obj,
            command_builder: mcut_command,
            benchmarks: &benchmarks::MCUT,
            markers: &["MCUT_ROOT_DIR"],
            binary: "CSGBoolean",
            plugin_dir: "mcut",
            raw_fixup: RawFixup::None,
        },
    ]
}

/// Immutable set of engine descriptors, built once at startup.
#[derive(Debug, Clone)]
pub struct AlgorithmRegistry {
    descriptors: Vec<AlgorithmDescriptor>,
}

impl AlgorithmRegistry {
    pub fn builtin() -> Self {
        Self::from_descriptors(builtin_descriptors())
    }

    pub fn from_descriptors(descriptors: Vec<AlgorithmDescriptor>) -> Self {
        Self { descriptors }
    }

    pub fn lookup(&self, id: AlgorithmId) -> Result<&AlgorithmDescriptor, JobError> {
        self.descriptors
            .iter()
            .find(|d| d.id == id)
            .ok_or_else(|| JobError::UnknownAlgorithm(id.to_string()))
    }

    pub fn all(&self) -> &[AlgorithmDescriptor] {
        &self.descriptors
    }

    /// Engines whose environment marker is present, in catalog order.
    pub fn available(&self, env: &dyn EnvironmentProbe) -> Vec<&AlgorithmDescriptor> {
        self.descriptors
            .iter()
            .filter(|d| d.is_available(env))
            .collect()
    }
}
