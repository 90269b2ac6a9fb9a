use std::path::PathBuf;

use tracing::debug;

use crate::{write_atomic, StoreError};

/// Plain-text cover letter artifacts, one file per (company, position).
#[derive(Debug, Clone)]
pub struct LetterStore {
    root: PathBuf,
}

impl LetterStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_for(&self, company: &str, position: &str) -> PathBuf {
        self.root.join(cover_letter_file_name(company, position))
    }

    /// Writes (or rewrites) the letter and returns its path.
    pub async fn store(&self, company: &str, position: &str, text: &str) -> Result<PathBuf, StoreError> {
        let path = self.path_for(company, position);
        write_atomic(&path, text.as_bytes()).await?;
        debug!(path = %path.display(), bytes = text.len(), "cover letter stored");
        Ok(path)
    }
}

/// `Cover_Letter_{Company}_{Position}.txt` with filesystem-unsafe characters collapsed to `_`.
pub fn cover_letter_file_name(company: &str, position: &str) -> String {
    format!(
        "Cover_Letter_{}_{}.txt",
        file_component(company, "Unknown_Company"),
        file_component(position, "Unknown_Position")
    )
}

fn file_component(input: &str, fallback: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.trim().chars() {
        if c.is_ascii_alphanumeric() || c == '-' {
            out.push(c);
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    let out = out.trim_matches('_');
    if out.is_empty() {
        fallback.to_string()
    } else {
        out.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn file_names_are_deterministic_and_safe() {
        assert_eq!(
            cover_letter_file_name("PCs for People", "Sr. Engineer / Backend"),
            "Cover_Letter_PCs_for_People_Sr_Engineer_Backend.txt"
        );
        assert_eq!(
            cover_letter_file_name("  ", "Data-Analyst"),
            "Cover_Letter_Unknown_Company_Data-Analyst.txt"
        );
    }

    #[tokio::test]
    async fn store_overwrites_same_listing_letter() {
        let dir = tempdir().expect("tempdir");
        let store = LetterStore::new(dir.path().join("letters"));

        let first = store.store("Acme", "Dev", "v1").await.expect("first");
        let second = store.store("Acme", "Dev", "v2").await.expect("second");

        assert_eq!(first, second);
        assert_eq!(std::fs::read_to_string(&second).unwrap(), "v2");
    }
}
