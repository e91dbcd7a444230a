//! Minimal FASTA reading/writing for alignments and query files.

use crate::utils::error::{Result, ScrapeError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FastaRecord {
    pub id: String,
    pub sequence: String,
}

/// Parses FASTA text. The record id is the header up to the first whitespace.
pub fn parse(input: &str) -> Result<Vec<FastaRecord>> {
    let mut records: Vec<FastaRecord> = Vec::new();

    for (line_number, line) in input.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with(';') {
            continue;
        }
        if let Some(header) = line.strip_prefix('>') {
            let id = header.split_whitespace().next().unwrap_or_default();
            if id.is_empty() {
                return Err(ScrapeError::parse(
                    "FASTA",
                    format!("empty header at line {}", line_number + 1),
                ));
            }
            records.push(FastaRecord {
                id: id.to_string(),
                sequence: String::new(),
            });
        } else {
            let record = records.last_mut().ok_or_else(|| {
                ScrapeError::parse(
                    "FASTA",
                    format!("sequence data before first header at line {}", line_number + 1),
                )
            })?;
            record
                .sequence
                .extend(line.chars().filter(|c| !c.is_whitespace()));
        }
    }

    Ok(records)
}

/// Writes records unwrapped, one sequence line per record.
pub fn write<'a, I>(records: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut out = String::new();
    for (id, sequence) in records {
        out.push('>');
        out.push_str(id);
        out.push('\n');
        out.push_str(sequence);
        out.push('\n');
    }
    out
}

/// Removes alignment gap characters.
pub fn ungap(sequence: &str) -> String {
    sequence
        .chars()
        .filter(|c| !matches!(c, '-' | '?' | '.') && !c.is_whitespace())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_wrapped_records() {
        let input = ">otu1 Garrulax canorus\nACGT\nAC-T\n\n>otu2\nTTTT\n";
        let records = parse(input).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, "otu1");
        assert_eq!(records[0].sequence, "ACGTAC-T");
        assert_eq!(records[1].sequence, "TTTT");
    }

    #[test]
    fn test_parse_rejects_data_before_header() {
        assert!(parse("ACGT\n>otu1\nACGT\n").is_err());
        assert!(parse(">\nACGT\n").is_err());
    }

    #[test]
    fn test_write_and_ungap() {
        let text = write([("otu1", "AC-GT"), ("otu2", "ACGGT")]);
        assert_eq!(text, ">otu1\nAC-GT\n>otu2\nACGGT\n");
        assert_eq!(ungap("AC-G?T."), "ACGT");
    }
}
