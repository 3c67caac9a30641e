//! Per-stage debug artifacts.
//!
//! The context is an explicit value threaded through the pipeline; when
//! disabled every call is a no-op. Debug output is best-effort: a failed
//! write logs a warning and the run continues.

use core_perm::PermutationContainer;
use core_scaffold::{write_links, Scaffold};
use std::fs;
use std::path::PathBuf;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct DebugContext {
    root: Option<PathBuf>,
}

impl DebugContext {
    pub fn new(root: PathBuf, enabled: bool) -> Self {
        Self {
            root: enabled.then_some(root),
        }
    }

    pub fn disabled() -> Self {
        Self { root: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.root.is_some()
    }

    /// A nested context for one pipeline stage.
    pub fn stage(&self, name: &str) -> Self {
        Self {
            root: self.root.as_ref().map(|root| root.join(name)),
        }
    }

    pub fn dir(&self) -> Option<&PathBuf> {
        self.root.as_ref()
    }

    fn write(&self, filename: &str, contents: &str) {
        let Some(root) = &self.root else {
            return;
        };
        let result = fs::create_dir_all(root).and_then(|()| fs::write(root.join(filename), contents));
        if let Err(error) = result {
            warn!(target: "debug", %error, filename, "debug artifact not written");
        }
    }

    pub fn dump_permutations(&self, filename: &str, container: &PermutationContainer) {
        if self.root.is_none() {
            return;
        }
        let mut out = String::new();
        for perm in container.all_perms() {
            out.push_str(&format!(">{}.{}\n", perm.genome, perm.label()));
            for occ in &perm.blocks {
                out.push_str(&format!("{} ", occ.signed_id));
            }
            out.push_str("$\n");
        }
        self.write(filename, &out);
    }

    pub fn dump_scaffolds(&self, filename: &str, scaffolds: &[Scaffold]) {
        if self.root.is_none() {
            return;
        }
        self.write(filename, &write_links(scaffolds));
    }

    pub fn dump_text(&self, filename: &str, text: &str) {
        self.write(filename, text);
    }
}
