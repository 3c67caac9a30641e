//! Parser for permutation files emitted by the synteny backends.
//!
//! The format is line oriented, two sections:
//!
//! ```text
//! >genome.sequence
//! +1 -2 +3 $
//! >genome.sequence2
//! ...
//! 1 genome sequence 0 4200 +
//! 2 genome sequence 4200 9000 -
//! ```
//!
//! Stanzas first: a `>genome.sequence` header followed by a whitespace
//! separated signed block sequence terminated by `$` (which may span lines).
//! The coordinate table follows, one block occurrence per line:
//! `block_id genome sequence start end strand`. Stanza occurrences and
//! coordinate rows must agree 1:1 in genomic order; any disagreement is a
//! [`PermutationError`].

use crate::{BlockOcc, PermutationError, Permutation};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

#[derive(Debug)]
struct Stanza {
    genome: String,
    sequence: String,
    signed_blocks: Vec<i64>,
}

#[derive(Debug)]
struct CoordRow {
    block_id: u64,
    start: u64,
    end: u64,
    forward: bool,
}

/// Parse one permutations file into full-coordinate permutations, sorted by
/// `(genome, sequence)`.
pub fn parse_permutations_file(path: &Path) -> Result<Vec<Permutation>, PermutationError> {
    let text = fs::read_to_string(path).map_err(|source| PermutationError::Read {
        path: path.display().to_string(),
        source,
    })?;
    parse_permutations_str(&text)
}

pub fn parse_permutations_str(text: &str) -> Result<Vec<Permutation>, PermutationError> {
    let mut stanzas: Vec<Stanza> = Vec::new();
    let mut coords: BTreeMap<(String, String), Vec<CoordRow>> = BTreeMap::new();
    let mut line_no = 0usize;

    let mut lines = text.lines().peekable();
    while let Some(line) = lines.next() {
        line_no += 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(header) = line.strip_prefix('>') {
            let (genome, sequence) = header.split_once('.').ok_or_else(|| {
                PermutationError::Syntax {
                    line: line_no,
                    what: format!("header \"{header}\" is not of the form genome.sequence"),
                }
            })?;
            let mut signed_blocks = Vec::new();
            let mut terminated = false;
            // The signed sequence may wrap over several lines; `$` ends it.
            'body: while let Some(body) = lines.next() {
                line_no += 1;
                for token in body.split_whitespace() {
                    if token == "$" {
                        terminated = true;
                        break 'body;
                    }
                    let id: i64 = token.parse().map_err(|_| PermutationError::Syntax {
                        line: line_no,
                        what: format!("bad signed block id \"{token}\""),
                    })?;
                    if id == 0 {
                        return Err(PermutationError::Syntax {
                            line: line_no,
                            what: "block id 0 is reserved".to_string(),
                        });
                    }
                    signed_blocks.push(id);
                }
            }
            if !terminated {
                return Err(PermutationError::Syntax {
                    line: line_no,
                    what: format!("stanza \"{header}\" is not terminated by $"),
                });
            }
            stanzas.push(Stanza {
                genome: genome.to_string(),
                sequence: sequence.to_string(),
                signed_blocks,
            });
        } else {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() != 6 {
                return Err(PermutationError::Syntax {
                    line: line_no,
                    what: format!("expected 6 coordinate fields, got {}", fields.len()),
                });
            }
            let parse_num = |field: &str| -> Result<u64, PermutationError> {
                field.parse().map_err(|_| PermutationError::Syntax {
                    line: line_no,
                    what: format!("bad number \"{field}\""),
                })
            };
            let forward = match fields[5] {
                "+" => true,
                "-" => false,
                other => {
                    return Err(PermutationError::Syntax {
                        line: line_no,
                        what: format!("bad strand \"{other}\""),
                    });
                }
            };
            coords
                .entry((fields[1].to_string(), fields[2].to_string()))
                .or_default()
                .push(CoordRow {
                    block_id: parse_num(fields[0])?,
                    start: parse_num(fields[3])?,
                    end: parse_num(fields[4])?,
                    forward,
                });
        }
    }

    let mut perms = Vec::with_capacity(stanzas.len());
    for stanza in stanzas {
        let key = (stanza.genome.clone(), stanza.sequence.clone());
        let mut rows = coords.remove(&key).unwrap_or_default();
        rows.sort_by_key(|row| row.start);
        perms.push(zip_stanza(stanza, rows)?);
    }
    if let Some((genome, sequence)) = coords.keys().next() {
        return Err(PermutationError::CoordMismatch {
            genome: genome.clone(),
            sequence: sequence.clone(),
            what: "coordinate rows without a matching stanza".to_string(),
        });
    }
    perms.sort_by(|a, b| (&a.genome, &a.sequence).cmp(&(&b.genome, &b.sequence)));
    Ok(perms)
}

/// Pair stanza occurrences with coordinate rows. The stanza lists blocks in
/// genomic order, so rows sorted by `start` must agree element by element.
fn zip_stanza(stanza: Stanza, rows: Vec<CoordRow>) -> Result<Permutation, PermutationError> {
    let mismatch = |what: String| PermutationError::CoordMismatch {
        genome: stanza.genome.clone(),
        sequence: stanza.sequence.clone(),
        what,
    };
    if rows.len() != stanza.signed_blocks.len() {
        return Err(mismatch(format!(
            "{} blocks in the stanza, {} coordinate rows",
            stanza.signed_blocks.len(),
            rows.len()
        )));
    }
    let mut blocks = Vec::with_capacity(rows.len());
    for (signed, row) in stanza.signed_blocks.iter().zip(&rows) {
        if signed.unsigned_abs() != row.block_id {
            return Err(mismatch(format!(
                "stanza block {signed} vs coordinate block {}",
                row.block_id
            )));
        }
        if (*signed > 0) != row.forward {
            return Err(mismatch(format!("strand disagreement for block {signed}")));
        }
        if row.end <= row.start {
            return Err(mismatch(format!("empty span for block {signed}")));
        }
        blocks.push(BlockOcc {
            signed_id: *signed,
            start: row.start,
            end: row.end,
        });
    }
    let seq_end = blocks.last().map(|occ| occ.end).unwrap_or(0);
    Ok(Permutation {
        genome: stanza.genome,
        sequence: stanza.sequence,
        seq_start: 0,
        seq_end,
        fragment: false,
        blocks,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
>ref1.chr1
+1 -2 +3 $
>tgt.ctg7
+1 -2 $
1 ref1 chr1 0 100 +
2 ref1 chr1 150 250 -
3 ref1 chr1 300 420 +
1 tgt ctg7 10 110 +
2 tgt ctg7 120 220 -
";

    #[test]
    fn stanza_and_coords_zip() {
        let perms = parse_permutations_str(SAMPLE).unwrap();
        assert_eq!(perms.len(), 2);
        let ref1 = &perms[0];
        assert_eq!(ref1.genome, "ref1");
        assert_eq!(ref1.sequence, "chr1");
        assert_eq!(
            ref1.blocks.iter().map(|b| b.signed_id).collect::<Vec<_>>(),
            vec![1, -2, 3]
        );
        assert_eq!(ref1.blocks[1].start, 150);
        assert_eq!(ref1.seq_end, 420);
    }

    #[test]
    fn missing_coordinate_row_is_an_error() {
        let bad = "\
>ref1.chr1
+1 -2 $
1 ref1 chr1 0 100 +
";
        let err = parse_permutations_str(bad).unwrap_err();
        assert!(matches!(err, PermutationError::CoordMismatch { .. }));
    }

    #[test]
    fn block_id_disagreement_is_an_error() {
        let bad = "\
>ref1.chr1
+1 -2 $
1 ref1 chr1 0 100 +
5 ref1 chr1 150 250 -
";
        let err = parse_permutations_str(bad).unwrap_err();
        assert!(matches!(err, PermutationError::CoordMismatch { .. }));
    }

    #[test]
    fn unterminated_stanza_is_an_error() {
        let err = parse_permutations_str(">ref1.chr1\n+1 -2\n").unwrap_err();
        assert!(matches!(err, PermutationError::Syntax { .. }));
    }
}
