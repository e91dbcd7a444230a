//! NEXUS reader for character matrices as served by TreeBASE.
//!
//! Only `CHARACTERS` and `DATA` blocks are interpreted; `TAXA`, `TREES`
//! and any other block are skipped. Matrices keep the order in which
//! they appear in the file.

use crate::domain::model::{CharMatrix, DataSet, MatrixRow};
use crate::utils::error::{Result, ScrapeError};

const FORMAT: &str = "NEXUS";

pub fn parse(input: &str) -> Result<DataSet> {
    let text = strip_comments(input)?;
    let body = text
        .trim_start()
        .strip_prefix_ignore_case("#NEXUS")
        .ok_or_else(|| ScrapeError::parse(FORMAT, "missing #NEXUS header"))?;

    let mut dataset = DataSet::default();
    let mut in_block: Option<String> = None;
    let mut matrix = CharMatrix::default();

    for command in split_commands(body) {
        let (keyword, rest) = split_keyword(&command);
        match keyword.as_str() {
            "BEGIN" => {
                in_block = Some(rest.trim().to_ascii_uppercase());
                matrix = CharMatrix::default();
            }
            "END" | "ENDBLOCK" => {
                if is_character_block(in_block.as_deref()) {
                    dataset.char_matrices.push(std::mem::take(&mut matrix));
                }
                in_block = None;
            }
            _ if !is_character_block(in_block.as_deref()) => {}
            "TITLE" => matrix.title = Some(unquote(rest.trim())),
            "FORMAT" => matrix.data_type = format_value(rest, "DATATYPE"),
            "MATRIX" => matrix.rows = parse_matrix_rows(rest)?,
            _ => {}
        }
    }

    if in_block.is_some() {
        return Err(ScrapeError::parse(FORMAT, "block not terminated by END;"));
    }
    Ok(dataset)
}

fn is_character_block(block: Option<&str>) -> bool {
    matches!(block, Some("CHARACTERS") | Some("DATA"))
}

trait StripPrefixIgnoreCase {
    fn strip_prefix_ignore_case(&self, prefix: &str) -> Option<&str>;
}

impl StripPrefixIgnoreCase for str {
    fn strip_prefix_ignore_case(&self, prefix: &str) -> Option<&str> {
        let head = self.get(..prefix.len())?;
        head.eq_ignore_ascii_case(prefix)
            .then(|| &self[prefix.len()..])
    }
}

/// Removes `[...]` comments (nested) outside quoted tokens.
fn strip_comments(input: &str) -> Result<String> {
    let mut out = String::with_capacity(input.len());
    let mut depth = 0usize;
    let mut in_quotes = false;

    for c in input.chars() {
        match c {
            '\'' if depth == 0 => {
                in_quotes = !in_quotes;
                out.push(c);
            }
            '[' if !in_quotes => depth += 1,
            ']' if !in_quotes && depth > 0 => depth -= 1,
            _ if depth > 0 => {}
            _ => out.push(c),
        }
    }

    if depth > 0 {
        return Err(ScrapeError::parse(FORMAT, "unterminated comment"));
    }
    Ok(out)
}

/// Splits on `;` outside quotes, dropping empty commands.
fn split_commands(text: &str) -> Vec<String> {
    let mut commands = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for c in text.chars() {
        match c {
            '\'' => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            ';' if !in_quotes => {
                let command = current.trim();
                if !command.is_empty() {
                    commands.push(command.to_string());
                }
                current.clear();
            }
            _ => current.push(c),
        }
    }
    commands
}

fn split_keyword(command: &str) -> (String, &str) {
    let end = command
        .find(|c: char| c.is_whitespace())
        .unwrap_or(command.len());
    (command[..end].to_ascii_uppercase(), &command[end..])
}

/// Reads `KEY=value` out of a FORMAT command.
fn format_value(rest: &str, key: &str) -> Option<String> {
    let spaced = rest.replace('=', " = ");
    let tokens: Vec<&str> = spaced.split_whitespace().collect();
    tokens
        .windows(3)
        .find(|w| w[0].eq_ignore_ascii_case(key) && w[1] == "=")
        .map(|w| w[2].to_ascii_uppercase())
}

fn unquote(token: &str) -> String {
    token
        .strip_prefix('\'')
        .and_then(|t| t.strip_suffix('\''))
        .map(|t| t.replace("''", "'"))
        .unwrap_or_else(|| token.to_string())
}

/// Parses MATRIX rows: one taxon per line, sequence chunks separated by
/// whitespace. A label seen again (interleaved matrices) is appended to.
fn parse_matrix_rows(rest: &str) -> Result<Vec<MatrixRow>> {
    let mut rows: Vec<MatrixRow> = Vec::new();

    for line in rest.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (label, sequence) = split_row(line)?;
        let sequence: String = sequence.split_whitespace().collect();

        match rows.iter_mut().find(|row| row.taxon == label) {
            Some(row) => row.sequence.push_str(&sequence),
            None => rows.push(MatrixRow {
                taxon: label,
                sequence,
            }),
        }
    }
    Ok(rows)
}

fn split_row(line: &str) -> Result<(String, &str)> {
    if let Some(quoted) = line.strip_prefix('\'') {
        let mut label = String::new();
        let mut chars = quoted.char_indices().peekable();
        while let Some((i, c)) = chars.next() {
            if c == '\'' {
                if matches!(chars.peek(), Some((_, '\''))) {
                    chars.next();
                    label.push('\'');
                    continue;
                }
                return Ok((label, &quoted[i + 1..]));
            }
            label.push(c);
        }
        return Err(ScrapeError::parse(
            FORMAT,
            format!("unterminated quoted taxon label in row '{}'", line),
        ));
    }

    let end = line
        .find(|c: char| c.is_whitespace())
        .unwrap_or(line.len());
    Ok((line[..end].to_string(), &line[end..]))
}
