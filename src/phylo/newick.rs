//! Reading and writing trees in Newick format.
//!
//! Underscores in unquoted labels are kept verbatim (they are *not*
//! converted to blanks), since study labels from phylesystem routinely
//! contain them and must round-trip unchanged.

use crate::phylo::tree::{NodeIndex, Tree};
use crate::utils::error::{Result, ScrapeError};

const FORMAT: &str = "Newick";

/// Characters that terminate an unquoted label.
const LABEL_DELIMITERS: &[u8] = b"(),:;[]";

/// Parses a single Newick tree terminated by `;`.
pub fn parse(input: &str) -> Result<Tree> {
    let mut parser = NewickParser::new(input);
    let tree = parser.parse_tree()?;
    parser.skip_whitespace_and_comments()?;
    if let Some(byte) = parser.peek() {
        return Err(parser.error(format!(
            "unexpected trailing character '{}'",
            byte as char
        )));
    }
    Ok(tree)
}

struct NewickParser<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> NewickParser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            bytes: input.as_bytes(),
            pos: 0,
        }
    }

    fn parse_tree(&mut self) -> Result<Tree> {
        let mut tree = Tree::new();
        let root = tree.root();
        self.skip_whitespace_and_comments()?;
        if self.peek() == Some(b'(') {
            self.parse_children(&mut tree, root)?;
        }
        let (label, length) = self.parse_label_and_length()?;
        tree.node_mut(root).label = label;
        tree.node_mut(root).branch_length = length;

        self.skip_whitespace_and_comments()?;
        match self.next() {
            Some(b';') => Ok(tree),
            Some(other) => Err(self.error(format!("expected ';' but found '{}'", other as char))),
            None => Err(self.error("missing terminating ';'")),
        }
    }

    /// Parses `(child,child,...)` below `parent`.
    fn parse_children(&mut self, tree: &mut Tree, parent: NodeIndex) -> Result<()> {
        self.expect(b'(')?;
        loop {
            self.skip_whitespace_and_comments()?;
            let child = tree.add_child(parent, None, None);
            if self.peek() == Some(b'(') {
                self.parse_children(tree, child)?;
            }
            let (label, length) = self.parse_label_and_length()?;
            tree.node_mut(child).label = label;
            tree.node_mut(child).branch_length = length;

            self.skip_whitespace_and_comments()?;
            match self.next() {
                Some(b',') => continue,
                Some(b')') => return Ok(()),
                Some(other) => {
                    return Err(self.error(format!(
                        "expected ',' or ')' but found '{}'",
                        other as char
                    )))
                }
                None => return Err(self.error("unbalanced parentheses")),
            }
        }
    }

    fn parse_label_and_length(&mut self) -> Result<(Option<String>, Option<f64>)> {
        self.skip_whitespace_and_comments()?;
        let label = match self.peek() {
            Some(b'\'') => Some(self.parse_quoted_label()?),
            Some(byte) if !LABEL_DELIMITERS.contains(&byte) => self.parse_unquoted_label(),
            _ => None,
        };

        self.skip_whitespace_and_comments()?;
        let length = if self.peek() == Some(b':') {
            self.pos += 1;
            self.skip_whitespace_and_comments()?;
            Some(self.parse_branch_length()?)
        } else {
            None
        };
        Ok((label, length))
    }

    fn parse_quoted_label(&mut self) -> Result<String> {
        self.expect(b'\'')?;
        let mut label = Vec::new();
        loop {
            match self.next() {
                Some(b'\'') if self.peek() == Some(b'\'') => {
                    self.pos += 1;
                    label.push(b'\'');
                }
                Some(b'\'') => break,
                Some(byte) => label.push(byte),
                None => return Err(self.error("unterminated quoted label")),
            }
        }
        String::from_utf8(label).map_err(|e| self.error(format!("invalid UTF-8 in label: {}", e)))
    }

    fn parse_unquoted_label(&mut self) -> Option<String> {
        let start = self.pos;
        while let Some(byte) = self.peek() {
            if LABEL_DELIMITERS.contains(&byte) || byte.is_ascii_whitespace() {
                break;
            }
            self.pos += 1;
        }
        let label = String::from_utf8_lossy(&self.bytes[start..self.pos]).into_owned();
        (!label.is_empty()).then_some(label)
    }

    fn parse_branch_length(&mut self) -> Result<f64> {
        let start = self.pos;
        while let Some(byte) = self.peek() {
            if byte.is_ascii_digit() || matches!(byte, b'.' | b'-' | b'+' | b'e' | b'E') {
                self.pos += 1;
            } else {
                break;
            }
        }
        let text = std::str::from_utf8(&self.bytes[start..self.pos]).unwrap_or_default();
        let length: f64 = text
            .parse()
            .map_err(|_| self.error(format!("invalid branch length '{}'", text)))?;
        if length < 0.0 {
            return Err(self.error(format!("negative branch length {}", length)));
        }
        Ok(length)
    }

    fn skip_whitespace_and_comments(&mut self) -> Result<()> {
        loop {
            match self.peek() {
                Some(byte) if byte.is_ascii_whitespace() => self.pos += 1,
                Some(b'[') => {
                    let mut depth = 0usize;
                    loop {
                        match self.next() {
                            Some(b'[') => depth += 1,
                            Some(b']') => {
                                depth -= 1;
                                if depth == 0 {
                                    break;
                                }
                            }
                            Some(_) => {}
                            None => return Err(self.error("unterminated comment")),
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn expect(&mut self, expected: u8) -> Result<()> {
        match self.next() {
            Some(byte) if byte == expected => Ok(()),
            Some(byte) => Err(self.error(format!(
                "expected '{}' but found '{}'",
                expected as char, byte as char
            ))),
            None => Err(self.error(format!("expected '{}' but input ended", expected as char))),
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn next(&mut self) -> Option<u8> {
        let byte = self.peek()?;
        self.pos += 1;
        Some(byte)
    }

    fn error(&self, message: impl Into<String>) -> ScrapeError {
        ScrapeError::parse(
            FORMAT,
            format!("{} (at byte {})", message.into(), self.pos),
        )
    }
}

// ============================================================================
// Writing
// ============================================================================

/// Serialises `tree` to a single-line Newick string terminated by `;`.
pub fn write(tree: &Tree) -> String {
    let mut out = String::new();
    write_node(tree, tree.root(), &mut out);
    out.push(';');
    out
}

fn write_node(tree: &Tree, index: NodeIndex, out: &mut String) {
    let node = tree.node(index);
    if !node.children.is_empty() {
        out.push('(');
        for (i, &child) in node.children.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            write_node(tree, child, out);
        }
        out.push(')');
    }
    if let Some(label) = &node.label {
        out.push_str(&quote_label(label));
    }
    if let Some(length) = node.branch_length {
        out.push(':');
        out.push_str(&length.to_string());
    }
}

/// Quotes a label if it contains whitespace, quotes or Newick punctuation.
pub fn quote_label(label: &str) -> String {
    let needs_quotes = label.is_empty()
        || label
            .bytes()
            .any(|b| LABEL_DELIMITERS.contains(&b) || b == b'\'' || b.is_ascii_whitespace());
    if needs_quotes {
        format!("'{}'", label.replace('\'', "''"))
    } else {
        label.to_string()
    }
}
