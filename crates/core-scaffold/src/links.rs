//! Human-readable signed order: the `scaffolds.links` format.
//!
//! ```text
//! >chr1_scaffold
//! ctg7            +       0       14002   250
//! ctg3[0:8000]    -       0       8000    -50
//! ```
//!
//! One header per scaffold, then one line per contig with columns
//! `contig_id sign start_bp end_bp gap_to_next` (gap 0 on the last line).
//! Fragment ids carry their sub-range in the id and in the columns. The
//! parser is the exact inverse of the writer, so written output re-parses to
//! an identical scaffold list.

use crate::{ContigRef, Placed, Scaffold, ScaffoldError};

pub fn write_links(scaffolds: &[Scaffold]) -> String {
    let mut out = String::new();
    for scaffold in scaffolds {
        out.push('>');
        out.push_str(&scaffold.name);
        out.push('\n');
        for placed in &scaffold.contigs {
            let sign = if placed.forward { '+' } else { '-' };
            out.push_str(&format!(
                "{}\t{}\t{}\t{}\t{}\n",
                placed.contig.label(),
                sign,
                placed.contig.start,
                placed.contig.end,
                placed.gap_after
            ));
        }
    }
    out
}

pub fn parse_links(text: &str) -> Result<Vec<Scaffold>, ScaffoldError> {
    let mut scaffolds: Vec<Scaffold> = Vec::new();
    for (number, raw) in text.lines().enumerate() {
        let line = number + 1;
        let raw = raw.trim_end();
        if raw.is_empty() {
            continue;
        }
        if let Some(name) = raw.strip_prefix('>') {
            scaffolds.push(Scaffold {
                name: name.to_string(),
                contigs: Vec::new(),
            });
            continue;
        }
        let fields: Vec<&str> = raw.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(ScaffoldError::Syntax {
                line,
                what: format!("expected 5 columns, got {}", fields.len()),
            });
        }
        let forward = match fields[1] {
            "+" => true,
            "-" => false,
            other => {
                return Err(ScaffoldError::Syntax {
                    line,
                    what: format!("bad sign \"{other}\""),
                });
            }
        };
        let number_field = |field: &str| -> Result<i64, ScaffoldError> {
            field.parse().map_err(|_| ScaffoldError::Syntax {
                line,
                what: format!("bad number \"{field}\""),
            })
        };
        let start = number_field(fields[2])? as u64;
        let end = number_field(fields[3])? as u64;
        let gap_after = number_field(fields[4])?;
        let (sequence, fragment) = match fields[0].split_once('[') {
            Some((name, _range)) => (name.to_string(), true),
            None => (fields[0].to_string(), false),
        };
        let Some(scaffold) = scaffolds.last_mut() else {
            return Err(ScaffoldError::Syntax {
                line,
                what: "contig line before any scaffold header".to_string(),
            });
        };
        scaffold.contigs.push(Placed {
            contig: ContigRef {
                sequence,
                start,
                end,
                fragment,
            },
            forward,
            gap_after,
        });
    }
    Ok(scaffolds)
}
