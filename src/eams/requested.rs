use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

static OFFERING_ID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d+\.\d+$").unwrap());

#[derive(Debug, thiserror::Error)]
pub enum RequestedFileError {
    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("line {line}: {content:?} is not an offering number like 2024001.01")]
    InvalidLine { line: usize, content: String },
    #[error("no offerings listed in {}", path.display())]
    Empty { path: PathBuf },
}

/// Parse a list of offering numbers, one per line.
///
/// Blank lines and `#` comments are skipped; a repeated number is kept once, at its first
/// position.
pub fn parse_requested(text: &str) -> Result<Vec<String>, RequestedFileError> {
    let mut ids: Vec<String> = Vec::new();
    for (index, raw) in text.lines().enumerate() {
        let line = raw.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        if !OFFERING_ID.is_match(line) {
            return Err(RequestedFileError::InvalidLine {
                line: index + 1,
                content: line.to_owned(),
            });
        }
        if !ids.iter().any(|id| id == line) {
            ids.push(line.to_owned());
        }
    }
    Ok(ids)
}

pub fn load_requested(path: &Path) -> Result<Vec<String>, RequestedFileError> {
    let text = std::fs::read_to_string(path).map_err(|source| RequestedFileError::Io {
        path: path.to_owned(),
        source,
    })?;
    let ids = parse_requested(&text)?;
    if ids.is_empty() {
        return Err(RequestedFileError::Empty {
            path: path.to_owned(),
        });
    }
    Ok(ids)
}
