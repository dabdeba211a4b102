use crate::error::IngestError;
use crate::models::PageWarning;
use lopdf::Document;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Where an uploaded document comes from.
#[derive(Debug, Clone)]
pub enum PdfSource {
    Bytes { name: String, bytes: Vec<u8> },
    Path(PathBuf),
}

impl PdfSource {
    pub fn from_bytes(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self::Bytes {
            name: name.into(),
            bytes,
        }
    }

    pub fn name(&self) -> String {
        match self {
            Self::Bytes { name, .. } => name.clone(),
            Self::Path(path) => path
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_else(|| path.display().to_string()),
        }
    }

    /// Loads the raw document bytes. Paths must carry a `.pdf` extension; other
    /// formats are rejected instead of being converted.
    pub async fn load(self) -> Result<(String, Vec<u8>), IngestError> {
        let name = self.name();
        match self {
            Self::Bytes { bytes, .. } => Ok((name, bytes)),
            Self::Path(path) => {
                ensure_pdf_extension(&path)?;
                let bytes = tokio::fs::read(&path).await?;
                Ok((name, bytes))
            }
        }
    }
}

fn ensure_pdf_extension(path: &Path) -> Result<(), IngestError> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or_default();

    if extension.eq_ignore_ascii_case("pdf") {
        Ok(())
    } else {
        Err(IngestError::UnsupportedFormat(format!(
            "only pdf documents can be ingested: {}",
            path.display()
        )))
    }
}

#[derive(Debug, Clone)]
pub struct PageText {
    pub number: u32,
    pub text: String,
}

#[derive(Debug, Clone, Default)]
pub struct ExtractedPages {
    pub page_count: usize,
    pub pages: Vec<PageText>,
    pub warnings: Vec<PageWarning>,
}

impl ExtractedPages {
    /// Page texts in order, each followed by a newline.
    pub fn joined_text(&self) -> String {
        let mut text = String::new();
        for page in &self.pages {
            text.push_str(&page.text);
            text.push('\n');
        }
        text
    }
}

pub trait PdfExtractor {
    fn extract_pages(&self, bytes: &[u8]) -> Result<ExtractedPages, IngestError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LopdfExtractor;

impl PdfExtractor for LopdfExtractor {
    fn extract_pages(&self, bytes: &[u8]) -> Result<ExtractedPages, IngestError> {
        let document =
            Document::load_mem(bytes).map_err(|error| IngestError::PdfParse(error.to_string()))?;

        let numbers: Vec<u32> = document.get_pages().keys().copied().collect();
        let mut extracted = ExtractedPages {
            page_count: numbers.len(),
            ..ExtractedPages::default()
        };

        for number in numbers {
            match document.extract_text(&[number]) {
                Ok(text) if text.trim().is_empty() => {
                    debug!(page = number, "page has no extractable text");
                }
                Ok(text) => extracted.pages.push(PageText { number, text }),
                Err(error) => {
                    warn!(page = number, %error, "skipping page that failed extraction");
                    extracted.warnings.push(PageWarning {
                        page: number,
                        reason: error.to_string(),
                    });
                }
            }
        }

        Ok(extracted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn joined_text_separates_pages_with_newlines() {
        let extracted = ExtractedPages {
            page_count: 3,
            pages: vec![
                PageText {
                    number: 1,
                    text: "First page".to_string(),
                },
                PageText {
                    number: 3,
                    text: "Third page".to_string(),
                },
            ],
            warnings: Vec::new(),
        };

        assert_eq!(extracted.joined_text(), "First page\nThird page\n");
    }

    #[test]
    fn corrupt_pdf_fails_the_whole_document() {
        let result = LopdfExtractor.extract_pages(b"%PDF-1.4\n%broken");
        assert!(matches!(result, Err(IngestError::PdfParse(_))));
    }

    #[tokio::test]
    async fn non_pdf_paths_are_unsupported() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let notes = dir.path().join("notes.docx");
        fs::write(&notes, b"not really a word document")?;

        let result = PdfSource::Path(notes).load().await;
        assert!(matches!(result, Err(IngestError::UnsupportedFormat(_))));
        Ok(())
    }

    #[tokio::test]
    async fn pdf_paths_load_bytes_and_name() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let manual = dir.path().join("Manual.PDF");
        fs::write(&manual, b"%PDF-1.4\n%fake")?;

        let (name, bytes) = PdfSource::Path(manual).load().await?;
        assert_eq!(name, "Manual.PDF");
        assert_eq!(bytes, b"%PDF-1.4\n%fake");
        Ok(())
    }
}
