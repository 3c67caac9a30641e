//! External synteny and overlap backends.
//!
//! Synteny decomposition is done by native tools; this crate owns their
//! discovery, invocation, and file handover. Backends implement one
//! capability trait and register in a table keyed by CLI name, so variant
//! selection stays table-driven.

use core_recipe::{BlockScale, Recipe};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("\"{0}\" is not an available synteny backend")]
    UnknownBackend(String),
    #[error("required binary \"{0}\" was not found on PATH")]
    MissingBinary(String),
    #[error("the {backend} backend needs \"{field}\" in the recipe")]
    MissingInput {
        backend: &'static str,
        field: &'static str,
    },
    #[error("no FASTA path for genome \"{0}\" in the recipe")]
    MissingFasta(String),
    #[error("\"{tool}\" failed with exit status {status}")]
    ToolFailed { tool: String, status: i32 },
    #[error("cannot run \"{tool}\": {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },
    #[error("backend produced no permutations file at \"{0}\"")]
    MissingOutput(String),
}

/// Block-size ladder per named scale, largest first.
pub fn block_sizes(scale: BlockScale) -> &'static [u32] {
    match scale {
        BlockScale::Small => &[1000, 100],
        BlockScale::Medium => &[5000, 500, 100],
        BlockScale::Large => &[10000, 500, 100],
    }
}

/// Resolve a binary on PATH the way a shell would.
pub fn which(binary: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(binary))
        .find(|candidate| candidate.is_file())
}

fn run_tool(mut command: Command) -> Result<(), BackendError> {
    let tool = command.get_program().to_string_lossy().into_owned();
    debug!(target: "backend", tool = tool.as_str(), "running external tool");
    let status = command.status().map_err(|source| BackendError::Spawn {
        tool: tool.clone(),
        source,
    })?;
    if !status.success() {
        return Err(BackendError::ToolFailed {
            tool,
            status: status.code().unwrap_or(-1),
        });
    }
    Ok(())
}

/// Capability set every synteny backend provides.
pub trait SyntenyBackend {
    fn name(&self) -> &'static str;

    /// Native binaries the backend shells out to.
    fn required_binaries(&self) -> &'static [&'static str];

    /// Produce one permutations file per block size, keyed by size.
    fn make_permutations(
        &self,
        recipe: &Recipe,
        sizes: &[u32],
        out_dir: &Path,
        overwrite: bool,
        threads: usize,
    ) -> Result<BTreeMap<u32, PathBuf>, BackendError>;

    /// Pick a block scale from the total reference genome size.
    fn infer_block_scale(&self, recipe: &Recipe) -> BlockScale {
        let mut total: u64 = 0;
        for genome in &recipe.references {
            if let Some(path) = recipe.fasta_for(genome) {
                if let Ok(meta) = fs::metadata(path) {
                    total += meta.len();
                }
            }
        }
        let scale = if total < 10_000_000 {
            BlockScale::Small
        } else if total < 500_000_000 {
            BlockScale::Medium
        } else {
            BlockScale::Large
        };
        info!(target: "backend", total_bp = total, ?scale, "block scale inferred");
        scale
    }

    /// The contigs file of the target genome.
    fn target_fasta(&self, recipe: &Recipe) -> Result<PathBuf, BackendError> {
        let target = recipe.target();
        recipe
            .fasta_for(target)
            .map(Path::to_path_buf)
            .ok_or_else(|| BackendError::MissingFasta(target.to_string()))
    }
}

/// Check that every binary the backend and the overlap post-pass need is
/// resolvable before any real work starts.
pub fn check_native_tools(backend: &dyn SyntenyBackend, with_overlap: bool) -> Result<(), BackendError> {
    for binary in backend.required_binaries() {
        if which(binary).is_none() {
            return Err(BackendError::MissingBinary((*binary).to_string()));
        }
    }
    if with_overlap && which(OVERLAP_EXEC).is_none() {
        return Err(BackendError::MissingBinary(OVERLAP_EXEC.to_string()));
    }
    Ok(())
}

/// The available backends, in CLI order.
pub fn backend_names() -> &'static [&'static str] {
    &["sibelia", "cactus", "maf", "hal"]
}

pub fn backend_by_name(name: &str) -> Result<Box<dyn SyntenyBackend>, BackendError> {
    match name {
        "sibelia" => Ok(Box::new(SibeliaBackend)),
        "cactus" => Ok(Box::new(CactusBackend)),
        "maf" => Ok(Box::new(MafBackend)),
        "hal" => Ok(Box::new(HalBackend)),
        other => Err(BackendError::UnknownBackend(other.to_string())),
    }
}

fn permutations_path(out_dir: &Path, size: u32) -> PathBuf {
    out_dir.join(format!("permutations_{size}.txt"))
}

/// Reuse an existing permutations file unless asked to overwrite.
fn reusable(path: &Path, overwrite: bool) -> bool {
    !overwrite && path.is_file()
}

fn collect_outputs(
    sizes: &[u32],
    out_dir: &Path,
) -> Result<BTreeMap<u32, PathBuf>, BackendError> {
    let mut files = BTreeMap::new();
    for &size in sizes {
        let path = permutations_path(out_dir, size);
        if !path.is_file() {
            return Err(BackendError::MissingOutput(path.display().to_string()));
        }
        files.insert(size, path);
    }
    Ok(files)
}

/// Sibelia: synteny blocks straight from the reference and target FASTAs.
pub struct SibeliaBackend;

impl SyntenyBackend for SibeliaBackend {
    fn name(&self) -> &'static str {
        "sibelia"
    }

    fn required_binaries(&self) -> &'static [&'static str] {
        &["Sibelia"]
    }

    fn make_permutations(
        &self,
        recipe: &Recipe,
        sizes: &[u32],
        out_dir: &Path,
        overwrite: bool,
        threads: usize,
    ) -> Result<BTreeMap<u32, PathBuf>, BackendError> {
        for &size in sizes {
            let output = permutations_path(out_dir, size);
            if reusable(&output, overwrite) {
                debug!(target: "backend", size, "reusing existing permutations");
                continue;
            }
            let mut command = Command::new("Sibelia");
            command
                .arg("--loose")
                .arg("--minblocksize")
                .arg(size.to_string())
                .arg("--threads")
                .arg(threads.to_string())
                .arg("--outdir")
                .arg(out_dir)
                .arg("--permutations")
                .arg(&output);
            for genome in recipe.references.iter().chain(&recipe.targets) {
                let fasta = recipe
                    .fasta_for(genome)
                    .ok_or_else(|| BackendError::MissingFasta(genome.clone()))?;
                command.arg(fasta);
            }
            run_tool(command)?;
        }
        collect_outputs(sizes, out_dir)
    }
}

/// maf2synteny over a user-provided whole-genome alignment.
pub struct MafBackend;

impl MafBackend {
    fn run_maf2synteny(
        maf: &Path,
        sizes: &[u32],
        out_dir: &Path,
        overwrite: bool,
    ) -> Result<BTreeMap<u32, PathBuf>, BackendError> {
        for &size in sizes {
            let output = permutations_path(out_dir, size);
            if reusable(&output, overwrite) {
                continue;
            }
            let mut command = Command::new("maf2synteny");
            command
                .arg("--block-size")
                .arg(size.to_string())
                .arg("--out")
                .arg(&output)
                .arg(maf);
            run_tool(command)?;
        }
        collect_outputs(sizes, out_dir)
    }
}

impl SyntenyBackend for MafBackend {
    fn name(&self) -> &'static str {
        "maf"
    }

    fn required_binaries(&self) -> &'static [&'static str] {
        &["maf2synteny"]
    }

    fn make_permutations(
        &self,
        recipe: &Recipe,
        sizes: &[u32],
        out_dir: &Path,
        overwrite: bool,
        _threads: usize,
    ) -> Result<BTreeMap<u32, PathBuf>, BackendError> {
        let maf = recipe.maf.as_deref().ok_or(BackendError::MissingInput {
            backend: "maf",
            field: "maf",
        })?;
        Self::run_maf2synteny(maf, sizes, out_dir, overwrite)
    }
}

/// hal alignment: exported to MAF first, then maf2synteny.
pub struct HalBackend;

impl HalBackend {
    fn export_maf(recipe: &Recipe, out_dir: &Path, overwrite: bool) -> Result<PathBuf, BackendError> {
        let hal = recipe.hal.as_deref().ok_or(BackendError::MissingInput {
            backend: "hal",
            field: "hal",
        })?;
        let maf = out_dir.join("alignment.maf");
        if !reusable(&maf, overwrite) {
            let mut command = Command::new("hal2maf");
            command
                .arg("--noAncestors")
                .arg(hal)
                .arg(&maf);
            run_tool(command)?;
        }
        Ok(maf)
    }
}

impl SyntenyBackend for HalBackend {
    fn name(&self) -> &'static str {
        "hal"
    }

    fn required_binaries(&self) -> &'static [&'static str] {
        &["hal2maf", "maf2synteny"]
    }

    fn make_permutations(
        &self,
        recipe: &Recipe,
        sizes: &[u32],
        out_dir: &Path,
        overwrite: bool,
        _threads: usize,
    ) -> Result<BTreeMap<u32, PathBuf>, BackendError> {
        let maf = Self::export_maf(recipe, out_dir, overwrite)?;
        MafBackend::run_maf2synteny(&maf, sizes, out_dir, overwrite)
    }
}

/// Progressive Cactus alignments are handed over as hal archives.
pub struct CactusBackend;

impl SyntenyBackend for CactusBackend {
    fn name(&self) -> &'static str {
        "cactus"
    }

    fn required_binaries(&self) -> &'static [&'static str] {
        &["hal2maf", "maf2synteny"]
    }

    fn make_permutations(
        &self,
        recipe: &Recipe,
        sizes: &[u32],
        out_dir: &Path,
        overwrite: bool,
        _threads: usize,
    ) -> Result<BTreeMap<u32, PathBuf>, BackendError> {
        let maf = HalBackend::export_maf(recipe, out_dir, overwrite)?;
        MafBackend::run_maf2synteny(&maf, sizes, out_dir, overwrite)
    }
}

pub const OVERLAP_EXEC: &str = "scarab-overlap";

const MIN_OVERLAP: u32 = 33;
const MAX_OVERLAP: u32 = 100;

/// Run the native overlap tool on the raw contigs, producing a DOT graph.
pub fn make_overlap_graph(contigs: &Path, out_dot: &Path) -> Result<(), BackendError> {
    info!(target: "backend", "building the contig overlap graph");
    if which(OVERLAP_EXEC).is_none() {
        return Err(BackendError::MissingBinary(OVERLAP_EXEC.to_string()));
    }
    let mut command = Command::new(OVERLAP_EXEC);
    command
        .arg(contigs)
        .arg(out_dot)
        .arg(MIN_OVERLAP.to_string())
        .arg(MAX_OVERLAP.to_string());
    run_tool(command)
}
