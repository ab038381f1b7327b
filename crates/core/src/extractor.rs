use crate::error::IngestError;
use lopdf::Document;
use regex::Regex;
use std::io::Read;
use std::path::Path;
use tracing::warn;

/// Raw per-page text from a native extraction stage.
#[derive(Debug, Clone)]
pub struct PageText {
    pub number: u32,
    pub text: String,
}

/// Seam over native per-page PDF extraction, so the cascade can be driven
/// by fakes in tests.
pub trait PdfExtractor: Send + Sync {
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError>;
}

/// Native PDF text-layer extraction. Fast and lossless when the file has a
/// real text layer; pages whose extraction crashes are kept as empty pages
/// so later cascade stages still get a chance at them.
#[derive(Default)]
pub struct PdfTextExtractor;

impl PdfExtractor for PdfTextExtractor {
    /// A file that fails to open is a file-level failure; a page that fails
    /// to extract is absorbed into an empty page.
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError> {
        let document =
            Document::load(path).map_err(|error| IngestError::PdfParse(error.to_string()))?;

        let mut pages = Vec::new();
        for (page_no, _page_id) in document.get_pages() {
            let text = match document.extract_text(&[page_no]) {
                Ok(text) => text,
                Err(error) => {
                    warn!(path = %path.display(), page = page_no, %error, "page text extraction failed");
                    String::new()
                }
            };
            pages.push(PageText {
                number: page_no,
                text,
            });
        }

        Ok(pages)
    }
}

/// Pattern splitting a layout-preserving line into cells: tabs or runs of
/// two and more spaces.
pub fn table_cell_pattern() -> Result<Regex, regex::Error> {
    Regex::new(r"\t| {2,}")
}

/// Flattens table-like rows of the text layer into pipe-delimited rows.
/// Lines that split into at least two non-empty cells are treated as rows
/// of a cell grid; everything else is ignored.
pub fn flatten_table_rows(text: &str, cell_split: &Regex) -> String {
    let mut rows = Vec::new();

    for line in text.lines() {
        let cells: Vec<&str> = cell_split
            .split(line)
            .map(str::trim)
            .filter(|cell| !cell.is_empty())
            .collect();

        if cells.len() >= 2 {
            rows.push(cells.join(" | "));
        }
    }

    rows.join("\n")
}

/// DOCX extraction: the paragraph text of `word/document.xml`. Word files
/// carry no page geometry here, so the whole document reads as page 1.
#[derive(Default)]
pub struct DocxExtractor;

impl DocxExtractor {
    pub fn extract_text(&self, path: &Path) -> Result<String, IngestError> {
        let bytes = std::fs::read(path)?;
        docx_text_from_bytes(&bytes)
    }
}

pub fn docx_text_from_bytes(bytes: &[u8]) -> Result<String, IngestError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|error| IngestError::DocxParse(error.to_string()))?;

    let mut xml = Vec::new();
    archive
        .by_name("word/document.xml")
        .map_err(|error| IngestError::DocxParse(error.to_string()))?
        .read_to_end(&mut xml)?;

    paragraphs_from_document_xml(&xml)
}

fn paragraphs_from_document_xml(xml: &[u8]) -> Result<String, IngestError> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);

    let mut paragraphs: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut in_text_run = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(element)) => {
                if element.local_name().as_ref() == b"t" {
                    in_text_run = true;
                }
            }
            Ok(quick_xml::events::Event::Text(text)) => {
                if in_text_run {
                    let unescaped = text
                        .unescape()
                        .map_err(|error| IngestError::DocxParse(error.to_string()))?;
                    current.push_str(unescaped.as_ref());
                }
            }
            Ok(quick_xml::events::Event::End(element)) => match element.local_name().as_ref() {
                b"t" => in_text_run = false,
                b"p" => {
                    let paragraph = current.trim().to_string();
                    if !paragraph.is_empty() {
                        paragraphs.push(paragraph);
                    }
                    current.clear();
                }
                _ => {}
            },
            Ok(quick_xml::events::Event::Eof) => break,
            Err(error) => return Err(IngestError::DocxParse(error.to_string())),
            _ => {}
        }
        buf.clear();
    }

    if !current.trim().is_empty() {
        paragraphs.push(current.trim().to_string());
    }

    Ok(paragraphs.join("\n"))
}
