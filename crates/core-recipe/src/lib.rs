//! Recipe loading and validation.
//!
//! A recipe is a small TOML file naming the reference genomes, the target
//! genome, and a handful of optional knobs (a Newick tree, a synteny block
//! scale, per-genome FASTA overrides). It is parsed into a plain struct with
//! enumerated options; unknown fields are ignored so recipes stay forward
//! compatible.
//!
//! Invariants (must hold after `Recipe::load`):
//! * `targets` is non-empty.
//! * `references` is non-empty.
//! * `references` and `targets` are disjoint.
//! * Every key of `genomes` names a genome from `references` or `targets`.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum RecipeError {
    #[error("cannot read recipe \"{path}\": {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed recipe: {0}")]
    Malformed(#[from] toml::de::Error),
    #[error("recipe does not name a target genome")]
    MissingTarget,
    #[error("recipe does not name any reference genome")]
    MissingReferences,
    #[error("genome \"{0}\" is listed both as a reference and as a target")]
    AmbiguousRole(String),
    #[error("genome \"{0}\" has overrides but is not a reference or a target")]
    UnknownGenome(String),
    #[error("tree leaf \"{0}\" is not a genome from the recipe")]
    UnknownTreeGenome(String),
}

/// Named synteny block scale; resolved to a block-size ladder by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockScale {
    Small,
    Medium,
    Large,
}

/// Per-genome overrides.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GenomeOptions {
    /// Path to the genome's FASTA file (overrides backend discovery).
    #[serde(default)]
    pub fasta: Option<PathBuf>,
    /// Marks a reference as a draft assembly (fragmented, unordered).
    #[serde(default)]
    pub draft: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RecipeFile {
    #[serde(default)]
    tree: Option<String>,
    #[serde(default)]
    blocks: Option<BlockScale>,
    #[serde(default)]
    references: Vec<String>,
    #[serde(default)]
    targets: Vec<String>,
    #[serde(default)]
    genomes: BTreeMap<String, GenomeOptions>,
    /// Whole-genome alignment inputs for the maf/cactus/hal backends.
    #[serde(default)]
    maf: Option<PathBuf>,
    #[serde(default)]
    hal: Option<PathBuf>,
}

/// A parsed and validated recipe.
#[derive(Debug, Clone)]
pub struct Recipe {
    /// Newick string, if the user supplied one.
    pub tree: Option<String>,
    /// Requested block scale; `None` lets the backend infer one.
    pub blocks: Option<BlockScale>,
    pub references: Vec<String>,
    pub targets: Vec<String>,
    pub genomes: BTreeMap<String, GenomeOptions>,
    /// Whole-genome alignment inputs for the maf/cactus/hal backends.
    pub maf: Option<PathBuf>,
    pub hal: Option<PathBuf>,
}

impl Recipe {
    /// Read and validate a recipe file.
    pub fn load(path: &Path) -> Result<Self, RecipeError> {
        let raw = fs::read_to_string(path).map_err(|source| RecipeError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let file: RecipeFile = toml::from_str(&raw)?;
        let recipe = Self {
            tree: file.tree,
            blocks: file.blocks,
            references: file.references,
            targets: file.targets,
            genomes: file.genomes,
            maf: file.maf,
            hal: file.hal,
        };
        recipe.validate()?;
        debug!(
            target: "recipe",
            references = recipe.references.len(),
            targets = recipe.targets.len(),
            has_tree = recipe.tree.is_some(),
            "recipe loaded"
        );
        Ok(recipe)
    }

    fn validate(&self) -> Result<(), RecipeError> {
        if self.targets.is_empty() {
            return Err(RecipeError::MissingTarget);
        }
        if self.references.is_empty() {
            return Err(RecipeError::MissingReferences);
        }
        for target in &self.targets {
            if self.references.contains(target) {
                return Err(RecipeError::AmbiguousRole(target.clone()));
            }
        }
        for genome in self.genomes.keys() {
            if !self.is_known(genome) {
                return Err(RecipeError::UnknownGenome(genome.clone()));
            }
        }
        Ok(())
    }

    /// The genome whose contigs are being scaffolded. Multiple targets are
    /// accepted in the file; the first one drives inference.
    pub fn target(&self) -> &str {
        &self.targets[0]
    }

    pub fn is_known(&self, genome: &str) -> bool {
        self.references.iter().any(|g| g == genome) || self.targets.iter().any(|g| g == genome)
    }

    /// Check a set of tree leaf names against the recipe's genome set.
    /// A leaf naming an unknown genome is a recipe error, not a tree error:
    /// the tree is well formed, the recipe is incomplete.
    pub fn check_tree_leaves<'a, I>(&self, leaves: I) -> Result<(), RecipeError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        for leaf in leaves {
            if !self.is_known(leaf) {
                return Err(RecipeError::UnknownTreeGenome(leaf.to_string()));
            }
        }
        Ok(())
    }

    /// FASTA override for a genome, if the recipe has one.
    pub fn fasta_for(&self, genome: &str) -> Option<&Path> {
        self.genomes
            .get(genome)
            .and_then(|opts| opts.fasta.as_deref())
    }
}
