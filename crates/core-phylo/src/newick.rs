//! Minimal Newick parser producing the index arena used by [`crate::Phylogeny`].
//!
//! Supported grammar: `tree := subtree ';'`,
//! `subtree := '(' subtree (',' subtree)* ')' [label] [':' length] | label [':' length]`.
//! Internal labels (bootstrap values, ancestor names) are parsed and
//! discarded; the data model keeps internal nodes unnamed. Branch lengths on
//! leaf and internal edges are mandatory: the parsimony scorer is defined
//! over a weighted tree. A length on the root is ignored.

use crate::{PhylogenyError, TreeNode};

pub(crate) struct ParsedTree {
    pub nodes: Vec<TreeNode>,
    pub root: usize,
}

struct Cursor<'a> {
    text: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn skip_ws(&mut self) {
        while self.pos < self.text.len() && self.text[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    fn peek(&mut self) -> Option<u8> {
        self.skip_ws();
        self.text.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let byte = self.peek()?;
        self.pos += 1;
        Some(byte)
    }

    fn error(&self, what: impl Into<String>) -> PhylogenyError {
        PhylogenyError::Parse {
            pos: self.pos,
            what: what.into(),
        }
    }

    fn label(&mut self) -> String {
        self.skip_ws();
        let start = self.pos;
        while self.pos < self.text.len()
            && !matches!(self.text[self.pos], b'(' | b')' | b',' | b':' | b';')
            && !self.text[self.pos].is_ascii_whitespace()
        {
            self.pos += 1;
        }
        String::from_utf8_lossy(&self.text[start..self.pos]).into_owned()
    }

    fn branch_length(&mut self) -> Result<Option<f64>, PhylogenyError> {
        if self.peek() != Some(b':') {
            return Ok(None);
        }
        self.bump();
        self.skip_ws();
        let start = self.pos;
        while self.pos < self.text.len()
            && matches!(self.text[self.pos], b'0'..=b'9' | b'.' | b'-' | b'+' | b'e' | b'E')
        {
            self.pos += 1;
        }
        let raw = std::str::from_utf8(&self.text[start..self.pos])
            .expect("ascii digits are valid utf-8");
        let value: f64 = raw
            .parse()
            .map_err(|_| self.error(format!("bad branch length \"{raw}\"")))?;
        Ok(Some(value))
    }
}

pub(crate) fn parse(text: &str) -> Result<ParsedTree, PhylogenyError> {
    let mut cursor = Cursor {
        text: text.as_bytes(),
        pos: 0,
    };
    let mut nodes = Vec::new();
    let root = subtree(&mut cursor, &mut nodes)?;
    // Discard a root branch length if present, then require the terminator.
    cursor.branch_length()?;
    match cursor.bump() {
        Some(b';') => {}
        _ => return Err(cursor.error("expected ';'")),
    }
    cursor.skip_ws();
    if cursor.pos != cursor.text.len() {
        return Err(cursor.error("trailing characters after ';'"));
    }
    nodes[root].branch = 0.0;
    Ok(ParsedTree { nodes, root })
}

fn subtree(cursor: &mut Cursor<'_>, nodes: &mut Vec<TreeNode>) -> Result<usize, PhylogenyError> {
    if cursor.peek() == Some(b'(') {
        cursor.bump();
        let mut children = Vec::new();
        loop {
            children.push(subtree(cursor, nodes)?);
            match cursor.bump() {
                Some(b',') => continue,
                Some(b')') => break,
                _ => return Err(cursor.error("expected ',' or ')'")),
            }
        }
        // Internal label, if any, is discarded.
        cursor.label();
        let branch = cursor.branch_length()?.unwrap_or(f64::NAN);
        let idx = nodes.len();
        nodes.push(TreeNode {
            parent: None,
            branch,
            children: children.clone(),
            label: None,
        });
        for &child in &children {
            nodes[child].parent = Some(idx);
        }
        Ok(idx)
    } else {
        let label = cursor.label();
        if label.is_empty() {
            return Err(cursor.error("expected a leaf label"));
        }
        let branch = cursor.branch_length()?.unwrap_or(f64::NAN);
        let idx = nodes.len();
        nodes.push(TreeNode {
            parent: None,
            branch,
            children: Vec::new(),
            label: Some(label),
        });
        Ok(idx)
    }
}
