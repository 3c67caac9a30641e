//! FASTA reading and the persistent outputs.
//!
//! `make_output` writes the two result files into the output directory:
//! `scaffolds.links` (the human-readable signed order) and `scaffolds.fasta`
//! (contig sequences concatenated per scaffold, joined by `N` runs sized by
//! the estimated gaps, never shorter than [`MIN_GAP_NS`]).

use core_scaffold::{write_links, Scaffold};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum FastaError {
    #[error("cannot read contigs file \"{path}\": {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot write \"{path}\": {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("fasta, line {line}: {what}")]
    Malformed { line: usize, what: String },
    #[error("sequence \"{0}\" appears twice in the contigs file")]
    DuplicateSequence(String),
    #[error("scaffold references unknown contig \"{0}\"")]
    MissingContig(String),
    #[error("contig \"{name}\" is shorter than the requested slice {start}..{end}")]
    SliceOutOfRange { name: String, start: u64, end: u64 },
}

/// Minimum `N` run between scaffolded contigs.
pub const MIN_GAP_NS: i64 = 11;

const FASTA_WIDTH: usize = 60;

/// Read a FASTA file into name -> sequence, keeping sequences uppercase.
/// The name is the header token before the first whitespace.
pub fn read_fasta(path: &Path) -> Result<BTreeMap<String, String>, FastaError> {
    let text = fs::read_to_string(path).map_err(|source| FastaError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let mut sequences: BTreeMap<String, String> = BTreeMap::new();
    let mut current: Option<String> = None;
    for (number, raw) in text.lines().enumerate() {
        let line = raw.trim_end();
        if line.is_empty() {
            continue;
        }
        if let Some(header) = line.strip_prefix('>') {
            let name = header
                .split_whitespace()
                .next()
                .ok_or_else(|| FastaError::Malformed {
                    line: number + 1,
                    what: "empty header".to_string(),
                })?
                .to_string();
            if sequences.contains_key(&name) {
                return Err(FastaError::DuplicateSequence(name));
            }
            sequences.insert(name.clone(), String::new());
            current = Some(name);
        } else {
            let Some(name) = &current else {
                return Err(FastaError::Malformed {
                    line: number + 1,
                    what: "sequence data before the first header".to_string(),
                });
            };
            let seq = sequences.get_mut(name).expect("current header registered");
            seq.extend(line.trim().chars().map(|c| c.to_ascii_uppercase()));
        }
    }
    info!(target: "fasta", sequences = sequences.len(), "contigs file read");
    Ok(sequences)
}

pub fn write_fasta(
    path: &Path,
    records: &[(String, String)],
) -> Result<(), FastaError> {
    let mut out = String::new();
    for (name, seq) in records {
        out.push('>');
        out.push_str(name);
        out.push('\n');
        for chunk in seq.as_bytes().chunks(FASTA_WIDTH) {
            out.push_str(std::str::from_utf8(chunk).expect("sequences are ascii"));
            out.push('\n');
        }
    }
    fs::write(path, out).map_err(|source| FastaError::Write {
        path: path.display().to_string(),
        source,
    })
}

fn reverse_complement(seq: &str) -> String {
    seq.chars()
        .rev()
        .map(|c| match c {
            'A' => 'T',
            'T' => 'A',
            'G' => 'C',
            'C' => 'G',
            other => other,
        })
        .collect()
}

fn scaffold_sequence(
    scaffold: &Scaffold,
    contigs: &BTreeMap<String, String>,
) -> Result<String, FastaError> {
    let mut out = String::new();
    for (pos, placed) in scaffold.contigs.iter().enumerate() {
        let whole = contigs
            .get(&placed.contig.sequence)
            .ok_or_else(|| FastaError::MissingContig(placed.contig.sequence.clone()))?;
        let (start, end) = (placed.contig.start as usize, placed.contig.end as usize);
        // Fragments address the original contig; sub-slicing must fit. For
        // whole contigs the recorded end is the last block boundary at the
        // finest scale, so take the full sequence instead.
        let piece = if placed.contig.fragment {
            whole
                .get(start..end.min(whole.len()))
                .ok_or_else(|| FastaError::SliceOutOfRange {
                    name: placed.contig.sequence.clone(),
                    start: placed.contig.start,
                    end: placed.contig.end,
                })?
        } else {
            whole.as_str()
        };
        if placed.forward {
            out.push_str(piece);
        } else {
            out.push_str(&reverse_complement(piece));
        }
        if pos + 1 < scaffold.contigs.len() {
            let ns = placed.gap_after.max(MIN_GAP_NS) as usize;
            out.extend(std::iter::repeat_n('N', ns));
        }
    }
    Ok(out)
}

/// Write `scaffolds.links` and `scaffolds.fasta` into `out_dir`.
pub fn make_output(
    contigs: &BTreeMap<String, String>,
    scaffolds: &[Scaffold],
    out_dir: &Path,
) -> Result<(), FastaError> {
    let links_path = out_dir.join("scaffolds.links");
    fs::write(&links_path, write_links(scaffolds)).map_err(|source| FastaError::Write {
        path: links_path.display().to_string(),
        source,
    })?;

    let mut records = Vec::with_capacity(scaffolds.len());
    for scaffold in scaffolds {
        records.push((scaffold.name.clone(), scaffold_sequence(scaffold, contigs)?));
    }
    write_fasta(&out_dir.join("scaffolds.fasta"), &records)?;

    let placed: usize = scaffolds.iter().map(|s| s.contigs.len()).sum();
    if placed < contigs.len() {
        warn!(
            target: "output",
            placed,
            total = contigs.len(),
            "some contigs were not placed in any scaffold"
        );
    }
    info!(
        target: "output",
        scaffolds = scaffolds.len(),
        dir = %out_dir.display(),
        "output written"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_scaffold::{parse_links, ContigRef, Placed};

    fn placed(name: &str, len: u64, forward: bool, gap: i64) -> Placed {
        Placed {
            contig: ContigRef {
                sequence: name.to_string(),
                start: 0,
                end: len,
                fragment: false,
            },
            forward,
            gap_after: gap,
        }
    }

    #[test]
    fn fasta_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("contigs.fasta");
        std::fs::write(&path, ">ctg1 extra info\nacgtACGT\nACGT\n>ctg2\nTTTT\n").unwrap();
        let contigs = read_fasta(&path).unwrap();
        assert_eq!(contigs["ctg1"], "ACGTACGTACGT");
        assert_eq!(contigs["ctg2"], "TTTT");
    }

    #[test]
    fn data_before_header_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("contigs.fasta");
        std::fs::write(&path, "ACGT\n>ctg1\nACGT\n").unwrap();
        assert!(matches!(
            read_fasta(&path),
            Err(FastaError::Malformed { line: 1, .. })
        ));
    }

    #[test]
    fn output_concatenates_with_gap_runs() {
        let dir = tempfile::tempdir().unwrap();
        let mut contigs = BTreeMap::new();
        contigs.insert("c1".to_string(), "ACGT".to_string());
        contigs.insert("c2".to_string(), "GGGG".to_string());
        let scaffolds = vec![Scaffold {
            name: "s1".to_string(),
            contigs: vec![placed("c1", 4, true, 13), placed("c2", 4, false, 0)],
        }];
        make_output(&contigs, &scaffolds, dir.path()).unwrap();

        let fasta = std::fs::read_to_string(dir.path().join("scaffolds.fasta")).unwrap();
        assert_eq!(fasta, ">s1\nACGTNNNNNNNNNNNNNCCCC\n");

        let links = std::fs::read_to_string(dir.path().join("scaffolds.links")).unwrap();
        let parsed = parse_links(&links).unwrap();
        assert_eq!(parsed, scaffolds);
    }

    #[test]
    fn short_gaps_are_padded_to_the_minimum() {
        let mut contigs = BTreeMap::new();
        contigs.insert("c1".to_string(), "AC".to_string());
        contigs.insert("c2".to_string(), "GT".to_string());
        let scaffold = Scaffold {
            name: "s1".to_string(),
            contigs: vec![placed("c1", 2, true, -50), placed("c2", 2, true, 0)],
        };
        let seq = scaffold_sequence(&scaffold, &contigs).unwrap();
        assert_eq!(seq, format!("AC{}GT", "N".repeat(MIN_GAP_NS as usize)));
    }

    #[test]
    fn fragments_slice_the_original_contig() {
        let mut contigs = BTreeMap::new();
        contigs.insert("c1".to_string(), "AAAACCCC".to_string());
        let scaffold = Scaffold {
            name: "s1".to_string(),
            contigs: vec![Placed {
                contig: ContigRef {
                    sequence: "c1".to_string(),
                    start: 4,
                    end: 8,
                    fragment: true,
                },
                forward: true,
                gap_after: 0,
            }],
        };
        assert_eq!(scaffold_sequence(&scaffold, &contigs).unwrap(), "CCCC");
    }

    #[test]
    fn unknown_contig_is_an_error() {
        let contigs = BTreeMap::new();
        let scaffold = Scaffold {
            name: "s1".to_string(),
            contigs: vec![placed("ghost", 4, true, 0)],
        };
        assert!(matches!(
            scaffold_sequence(&scaffold, &contigs),
            Err(FastaError::MissingContig(name)) if name == "ghost"
        ));
    }
}
