//! Voucher roll file parsing.
//!
//! Roll files exported by the hotspot controller carry a fixed block of
//! metadata rows before the first code. The format is positional: the first
//! seven lines are skipped no matter what they contain. Formats are versioned
//! through [`UploadFormat`] so a self-describing layout can be added without
//! breaking files that are already in circulation.

use crate::errors::{Error, Result};
use std::path::Path;

/// Number of metadata lines at the top of a [`UploadFormat::HeaderSkipV1`] file.
pub const HEADER_LINES: usize = 7;

/// Known voucher file layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UploadFormat {
    /// Seven header lines, then one code per line, optionally double-quoted.
    #[default]
    HeaderSkipV1,
}

impl UploadFormat {
    /// Format version number
    #[must_use]
    pub const fn version(self) -> u32 {
        match self {
            Self::HeaderSkipV1 => 1,
        }
    }

    /// Extracts voucher codes from raw file contents, preserving order.
    #[must_use]
    pub fn parse(self, raw: &str) -> Vec<String> {
        match self {
            Self::HeaderSkipV1 => raw
                .split('\n')
                .skip(HEADER_LINES)
                .map(|line| line.trim().replace('"', ""))
                .filter(|line| !line.is_empty())
                .collect(),
        }
    }
}

/// Parses an uploaded roll file with the default format.
#[must_use]
pub fn parse_uploaded_text(raw: &str) -> Vec<String> {
    UploadFormat::default().parse(raw)
}

/// Reads and parses a roll file from disk.
///
/// Returns the parsed codes and the file name to record on the roll.
pub fn read_roll_file(path: &Path, format: UploadFormat) -> Result<(Vec<String>, String)> {
    let raw = std::fs::read_to_string(path)?;
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| Error::Validation {
            message: format!("{} is not a file", path.display()),
        })?;
    Ok((format.parse(&raw), file_name))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use std::io::Write;

    const HEADER: &str = "Hotspot\nProfile: default\nPrice: 200\nValidity: 1d\nCreated: today\nBy: admin\nCode\n";

    #[test]
    fn test_skips_header_and_drops_empty_lines() {
        let raw = format!("{HEADER}KT-1\nKT-2\n\nKT-3");
        assert_eq!(parse_uploaded_text(&raw), vec!["KT-1", "KT-2", "KT-3"]);
    }

    #[test]
    fn test_strips_quotes_and_whitespace() {
        let raw = format!("{HEADER}\"KT-1\"\r\n  \"KT-2\"  \n\"\"\n");
        assert_eq!(parse_uploaded_text(&raw), vec!["KT-1", "KT-2"]);
    }

    #[test]
    fn test_header_lines_are_skipped_even_if_they_look_like_codes() {
        let raw = "A\nB\nC\nD\nE\nF\nG\nH";
        assert_eq!(parse_uploaded_text(raw), vec!["H"]);
    }

    #[test]
    fn test_short_file_yields_nothing() {
        assert!(parse_uploaded_text("only\nthree\nlines").is_empty());
        assert!(parse_uploaded_text("").is_empty());
    }

    #[test]
    fn test_version() {
        assert_eq!(UploadFormat::HeaderSkipV1.version(), 1);
    }

    #[test]
    fn test_read_roll_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daily.csv");
        let mut file = std::fs::File::create(&path).unwrap();
        write!(file, "{HEADER}\"KT-9\"\n").unwrap();

        let (codes, file_name) = read_roll_file(&path, UploadFormat::HeaderSkipV1).unwrap();
        assert_eq!(codes, vec!["KT-9"]);
        assert_eq!(file_name, "daily.csv");
    }
}
