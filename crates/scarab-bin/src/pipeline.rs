//! Top-level pipeline: stages in block-size order, largest first, each
//! running chimera breaking, graph construction, adjacency inference, and
//! scaffold building, merged into a running accumulator; then the refine
//! stage and the optional overlap post-pass.

use crate::debug::DebugContext;
use core_backend::{
    backend_by_name, block_sizes, check_native_tools, make_overlap_graph, BackendError,
    SyntenyBackend,
};
use core_chimera::ChimeraDetector;
use core_fasta::{make_output, read_fasta, FastaError};
use core_graph::BreakpointGraph;
use core_infer::AdjacencyInferer;
use core_overlap::{refine_with_overlaps, OverlapError, OverlapGraph};
use core_perm::{Filters, PermutationContainer, PermutationError};
use core_phylo::{infer_from_container, Phylogeny, PhylogenyError};
use core_recipe::{Recipe, RecipeError};
use core_scaffold::{
    assign_scaffold_names, build_scaffolds, merge_scaffolds, refine_scaffolds, unplaced_contigs,
    AdjacencyRefiner, Scaffold,
};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Recipe(#[from] RecipeError),
    #[error(transparent)]
    Phylogeny(#[from] PhylogenyError),
    #[error(transparent)]
    Permutation(#[from] PermutationError),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Fasta(#[from] FastaError),
    #[error(transparent)]
    Overlap(#[from] OverlapError),
    #[error("cannot prepare output directory \"{path}\": {source}")]
    OutDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot read \"{path}\": {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub recipe: PathBuf,
    pub out_dir: PathBuf,
    pub synteny: String,
    pub no_refine: bool,
    pub overwrite: bool,
    pub resolve_repeats: bool,
    pub debug: bool,
    pub threads: usize,
}

/// One pass over the data at a fixed block size.
#[derive(Debug, Clone)]
struct RunStage {
    name: String,
    block_size: u32,
    indels: bool,
    repeats: bool,
    rearrange: bool,
    refine: bool,
}

impl RunStage {
    fn filters(&self) -> Filters {
        Filters {
            min_genomes: 2,
            resolve_repeats: self.repeats,
            merge_collinear: !self.indels,
        }
    }
}

/// Every block size gets a plain stage; one trailing refine stage reuses the
/// smallest size with indels kept.
fn make_run_stages(sizes: &[u32], resolve_repeats: bool) -> Vec<RunStage> {
    let mut stages: Vec<RunStage> = sizes
        .iter()
        .map(|&block_size| RunStage {
            name: block_size.to_string(),
            block_size,
            indels: false,
            repeats: false,
            rearrange: true,
            refine: false,
        })
        .collect();
    stages.push(RunStage {
        name: "refine".to_string(),
        block_size: *sizes.last().expect("at least one block size"),
        indels: true,
        repeats: resolve_repeats,
        rearrange: false,
        refine: true,
    });
    stages
}

pub fn run(options: &PipelineOptions) -> Result<(), PipelineError> {
    fs::create_dir_all(&options.out_dir).map_err(|source| PipelineError::OutDir {
        path: options.out_dir.display().to_string(),
        source,
    })?;
    let debug = DebugContext::new(options.out_dir.join("debug"), options.debug);

    let backend = backend_by_name(&options.synteny)?;
    check_native_tools(backend.as_ref(), !options.no_refine)?;
    let recipe = Recipe::load(&options.recipe)?;

    let scale = match recipe.blocks {
        Some(scale) => scale,
        None => backend.infer_block_scale(&recipe),
    };
    let sizes = block_sizes(scale);
    let perm_files = backend.make_permutations(
        &recipe,
        sizes,
        &options.out_dir,
        options.overwrite,
        options.threads,
    )?;
    let stages = make_run_stages(sizes, options.resolve_repeats);

    let phylogeny = load_phylogeny(&recipe, &perm_files, sizes)?;
    let target = recipe.target().to_string();
    let naming_ref = recipe.references[0].clone();

    // Stage containers and the cross-scale chimera detector over their raw
    // graphs.
    let mut containers: BTreeMap<String, PermutationContainer> = BTreeMap::new();
    for stage in &stages {
        let container = PermutationContainer::from_file(
            &perm_files[&stage.block_size],
            &recipe.references,
            &recipe.targets,
            stage.filters(),
        )?;
        containers.insert(stage.name.clone(), container);
    }
    let detector_input: Vec<(String, &PermutationContainer)> = stages
        .iter()
        .map(|stage| (stage.name.clone(), &containers[&stage.name]))
        .collect();
    let detector = ChimeraDetector::from_containers(&detector_input);

    let mut accumulator: Option<Vec<Scaffold>> = None;
    let mut prev_stages: Vec<String> = Vec::new();
    for stage in &stages {
        info!(target: "pipeline", stage = stage.name.as_str(), "stage started");
        let stage_debug = debug.stage(&stage.name);
        prev_stages.push(stage.name.clone());
        let container = &containers[&stage.name];

        if !stage.refine {
            let fixed = detector.break_contigs(container, std::slice::from_ref(&stage.name));
            stage_debug.dump_permutations("permutations.txt", &fixed);
            let graph = BreakpointGraph::build(&fixed);
            let adjacencies =
                AdjacencyInferer::new(&graph, &phylogeny, &target).infer_adjacencies();
            if stage_debug.is_enabled() {
                let dump: String = adjacencies
                    .iter()
                    .map(|adj| format!("{:?} -- {:?}\n", adj.u, adj.v))
                    .collect();
                stage_debug.dump_text("adjacencies.txt", &dump);
            }
            let scaffolds = build_scaffolds(&adjacencies, &fixed, &phylogeny, &target);

            accumulator = Some(match accumulator.take() {
                Some(acc) => {
                    let all_breaks = detector.break_contigs(container, &prev_stages);
                    merge_scaffolds(&acc, &scaffolds, &all_breaks, stage.rearrange)
                }
                None => scaffolds,
            });
        } else {
            let all_breaks = detector.break_contigs(container, &prev_stages);
            stage_debug.dump_permutations("permutations.txt", &all_breaks);
            let refine_graph = BreakpointGraph::build(&all_breaks);
            let refiner = AdjacencyRefiner::new(&refine_graph, &phylogeny, &all_breaks, &target);
            let acc = accumulator.take().unwrap_or_default();
            accumulator = Some(refine_scaffolds(&acc, &refiner));
        }

        if let Some(scaffolds) = accumulator.as_mut() {
            assign_scaffold_names(scaffolds, container, &naming_ref);
            stage_debug.dump_scaffolds("scaffolds.links", scaffolds);
        }
    }
    let mut scaffolds = accumulator.unwrap_or_default();

    if let Some(last) = stages.last() {
        let unplaced = unplaced_contigs(&scaffolds, &containers[&last.name]);
        if !unplaced.is_empty() {
            info!(target: "pipeline", count = unplaced.len(), "contigs left unplaced");
            let list: String = unplaced
                .iter()
                .map(|contig| format!("{}\n", contig.label()))
                .collect();
            debug.dump_text("unplaced.txt", &list);
        }
    }

    info!(target: "pipeline", "reading the contigs file");
    let target_fasta = backend.target_fasta(&recipe)?;
    let contigs = read_fasta(&target_fasta)?;

    if !options.no_refine {
        scaffolds = overlap_pass(&target_fasta, &contigs, &scaffolds, options, &debug)?;
    }
    make_output(&contigs, &scaffolds, &options.out_dir)?;
    Ok(())
}

fn load_phylogeny(
    recipe: &Recipe,
    perm_files: &BTreeMap<u32, PathBuf>,
    sizes: &[u32],
) -> Result<Phylogeny, PipelineError> {
    if let Some(tree) = &recipe.tree {
        info!(target: "pipeline", "phylogeny taken from the recipe");
        let phylogeny = Phylogeny::from_newick(tree)?;
        recipe.check_tree_leaves(phylogeny.leaf_names())?;
        phylogeny.ensure_leaf(recipe.target())?;
        return Ok(phylogeny);
    }

    info!(target: "pipeline", "inferring the phylogeny from synteny blocks");
    let smallest = *sizes.last().expect("at least one block size");
    let container = PermutationContainer::from_file(
        &perm_files[&smallest],
        &recipe.references,
        &recipe.targets,
        Filters::permissive(),
    )?;
    let phylogeny = infer_from_container(&container)?;
    Ok(phylogeny)
}

fn overlap_pass(
    target_fasta: &Path,
    contigs: &BTreeMap<String, String>,
    scaffolds: &[Scaffold],
    options: &PipelineOptions,
    debug: &DebugContext,
) -> Result<Vec<Scaffold>, PipelineError> {
    let out_dot = options.out_dir.join("contigs_overlap.dot");
    make_overlap_graph(target_fasta, &out_dot)?;
    let dot_text = fs::read_to_string(&out_dot).map_err(|source| PipelineError::Read {
        path: out_dot.display().to_string(),
        source,
    })?;
    let lengths: BTreeMap<String, u64> = contigs
        .iter()
        .map(|(name, seq)| (name.clone(), seq.len() as u64))
        .collect();
    let graph = OverlapGraph::from_dot(&dot_text, &lengths)?;
    let refined = refine_with_overlaps(scaffolds, &graph);
    if debug.is_enabled() {
        debug.dump_text("contigs_overlap.dot", &dot_text);
    }
    let _ = fs::remove_file(&out_dot);
    Ok(refined)
}
