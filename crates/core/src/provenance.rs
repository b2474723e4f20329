//! Provenance - the source document/page/block justifying a fact

use serde::{Deserialize, Serialize};

/// A reference back to the source material a fact was extracted from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Provenance {
    /// Source document title or file name
    pub document: String,

    /// Page number within the document, if known
    pub page: Option<u32>,

    /// Block identifier within the page, if known
    pub block: Option<String>,
}

impl Provenance {
    pub fn new(document: impl Into<String>) -> Self {
        Self {
            document: document.into(),
            page: None,
            block: None,
        }
    }

    /// Builder: set page number
    pub fn with_page(mut self, page: u32) -> Self {
        self.page = Some(page);
        self
    }

    /// Builder: set block id
    pub fn with_block(mut self, block: impl Into<String>) -> Self {
        self.block = Some(block.into());
        self
    }

    /// Deduplication key: one citation per document/page pair.
    pub fn key(&self) -> String {
        match self.page {
            Some(page) => format!("{}_{}", self.document, page),
            None => self.document.clone(),
        }
    }
}

impl std::fmt::Display for Provenance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.page {
            Some(page) => write!(f, "{}, p.{}", self.document, page),
            None => write!(f, "{}", self.document),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provenance_key() {
        let p = Provenance::new("paper.pdf").with_page(3).with_block("b12");
        assert_eq!(p.key(), "paper.pdf_3");

        let q = Provenance::new("paper.pdf");
        assert_eq!(q.key(), "paper.pdf");
    }

    #[test]
    fn test_provenance_display() {
        let p = Provenance::new("paper.pdf").with_page(7);
        assert_eq!(p.to_string(), "paper.pdf, p.7");
    }
}
