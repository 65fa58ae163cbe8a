use crate::error::RagError;
use lopdf::Document;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageText {
    /// `None` when the loader cannot tell which page the text came from.
    pub number: Option<u32>,
    pub text: String,
}

pub trait PdfExtractor: Send + Sync {
    fn extract_pages(&self, bytes: &[u8]) -> Result<Vec<PageText>, RagError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LopdfExtractor;

impl PdfExtractor for LopdfExtractor {
    fn extract_pages(&self, bytes: &[u8]) -> Result<Vec<PageText>, RagError> {
        let document = Document::load_mem(bytes).map_err(|error| RagError::Load(error.to_string()))?;

        let mut pages = Vec::new();
        for (page_no, _page_id) in document.get_pages() {
            let text = document
                .extract_text(&[page_no])
                .map_err(|error| RagError::Load(format!("page {page_no}: {error}")))?;

            if !text.trim().is_empty() {
                pages.push(PageText {
                    number: Some(page_no),
                    text,
                });
            }
        }

        if pages.is_empty() {
            return Err(RagError::Load("pdf had no readable page text".to_string()));
        }

        Ok(pages)
    }
}

/// True when the bytes start with the PDF magic header.
pub fn looks_like_pdf(bytes: &[u8]) -> bool {
    bytes.starts_with(b"%PDF-")
}
