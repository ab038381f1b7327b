use crate::config::ExtractionConfig;
use crate::error::{BackendError, IngestError};
use crate::extractor::{
    flatten_table_rows, table_cell_pattern, DocxExtractor, PdfExtractor, PdfTextExtractor,
};
use crate::llm::TextCleaner;
use crate::models::FragmentKind;
use crate::quality::QualityGate;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

/// One quality-gated extraction result; a source page can contribute
/// several (e.g. a text part and a table part).
#[derive(Debug, Clone)]
pub struct PageExtract {
    pub page: u32,
    pub content: String,
    pub kind: FragmentKind,
}

/// Whole-document structured-layout conversion (scanned-but-structured
/// files). Returns per-page text keyed by page number.
#[async_trait]
pub trait LayoutExtractor: Send + Sync {
    async fn convert(&self, pdf: &[u8], source: &str) -> Result<HashMap<u32, String>, BackendError>;
}

/// Per-page optical character recognition; rasterization happens behind the
/// endpoint.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    async fn recognize(&self, pdf: &[u8], source: &str, page: u32) -> Result<String, BackendError>;
}

#[derive(Debug, Clone, Serialize)]
struct LayoutRequest<'a> {
    pdf_base64: String,
    source_path: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
struct LayoutResponse {
    pages: Option<Vec<LayoutPage>>,
    text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct LayoutPage {
    #[serde(default)]
    page: Option<u32>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct OcrRequest<'a> {
    pdf_base64: String,
    source_path: &'a str,
    page: u32,
}

#[derive(Debug, Clone, Deserialize)]
struct OcrResponse {
    text: Option<String>,
}

/// HTTP client for a layout-model conversion endpoint.
pub struct HttpLayoutClient {
    endpoint: String,
    api_key: Option<String>,
    max_pages: u32,
    client: Client,
}

impl HttpLayoutClient {
    pub fn new(
        endpoint: String,
        api_key: Option<String>,
        timeout_secs: u64,
        max_pages: u32,
    ) -> Result<Self, BackendError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|error| BackendError::from_reqwest("layout", error))?;
        Ok(Self {
            endpoint,
            api_key,
            max_pages,
            client,
        })
    }
}

#[async_trait]
impl LayoutExtractor for HttpLayoutClient {
    async fn convert(&self, pdf: &[u8], source: &str) -> Result<HashMap<u32, String>, BackendError> {
        let payload = LayoutRequest {
            pdf_base64: STANDARD.encode(pdf),
            source_path: source,
        };

        let mut request = self.client.post(&self.endpoint).json(&payload);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|error| BackendError::from_reqwest("layout", error))?;

        if !response.status().is_success() {
            return Err(BackendError::response(
                "layout",
                response.status().to_string(),
            ));
        }

        let parsed: LayoutResponse = response
            .json()
            .await
            .map_err(|error| BackendError::from_reqwest("layout", error))?;

        let mut page_texts = HashMap::new();

        if let Some(listed) = parsed.pages {
            for page in listed {
                let number = page.page.unwrap_or(0);
                if number == 0 || number > self.max_pages {
                    continue;
                }
                if let Some(text) = page.text.map(|t| t.trim().to_string()) {
                    if !text.is_empty() {
                        page_texts.insert(number, text);
                    }
                }
            }
        } else if let Some(raw) = parsed.text {
            // Form-feed separated fallback shape.
            for (index, chunk) in raw.split('\u{000c}').enumerate() {
                let number = (index + 1) as u32;
                if number > self.max_pages {
                    break;
                }
                let trimmed = chunk.trim();
                if !trimmed.is_empty() {
                    page_texts.insert(number, trimmed.to_string());
                }
            }
        }

        info!(source, pages = page_texts.len(), "layout conversion finished");
        Ok(page_texts)
    }
}

/// HTTP client for an OCR endpoint that accepts the document plus a page
/// number and rasterizes server-side.
pub struct HttpOcrClient {
    endpoint: String,
    api_key: Option<String>,
    client: Client,
}

impl HttpOcrClient {
    pub fn new(
        endpoint: String,
        api_key: Option<String>,
        timeout_secs: u64,
    ) -> Result<Self, BackendError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|error| BackendError::from_reqwest("ocr", error))?;
        Ok(Self {
            endpoint,
            api_key,
            client,
        })
    }
}

#[async_trait]
impl OcrEngine for HttpOcrClient {
    async fn recognize(&self, pdf: &[u8], source: &str, page: u32) -> Result<String, BackendError> {
        let payload = OcrRequest {
            pdf_base64: STANDARD.encode(pdf),
            source_path: source,
            page,
        };

        let mut request = self.client.post(&self.endpoint).json(&payload);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|error| BackendError::from_reqwest("ocr", error))?;

        if !response.status().is_success() {
            return Err(BackendError::response("ocr", response.status().to_string()));
        }

        let parsed: OcrResponse = response
            .json()
            .await
            .map_err(|error| BackendError::from_reqwest("ocr", error))?;

        Ok(parsed.text.unwrap_or_default().trim().to_string())
    }
}

/// Per-page extraction pipeline, cheapest stage first, gated between
/// stages:
///
/// 1. native text layer, combined with
/// 2. table rows flattened from the layout lines;
/// 3. structured-layout conversion for pages the combined output failed on;
/// 4. OCR, accepted only if its own output passes the gate;
/// 5. optional LLM cleaning of whichever text won.
///
/// Stage errors are absorbed — a third-party extractor crashing on a
/// malformed page must never take the file down. Only a file that cannot be
/// opened at all is reported as failed.
pub struct ExtractionCascade {
    gate: QualityGate,
    enable_tables: bool,
    cell_split: Regex,
    pdf: Box<dyn PdfExtractor>,
    docx: DocxExtractor,
    layout: Option<Box<dyn LayoutExtractor>>,
    ocr: Option<Box<dyn OcrEngine>>,
    cleaner: Option<TextCleaner>,
}

impl ExtractionCascade {
    pub fn from_config(
        config: &ExtractionConfig,
        gate: QualityGate,
        cleaner: Option<TextCleaner>,
    ) -> Result<Self, IngestError> {
        let layout: Option<Box<dyn LayoutExtractor>> = match &config.layout.endpoint {
            Some(endpoint) => Some(Box::new(HttpLayoutClient::new(
                endpoint.clone(),
                config.layout.api_key.clone(),
                config.layout.timeout_secs,
                config.max_layout_pages,
            )?)),
            None => None,
        };

        let ocr: Option<Box<dyn OcrEngine>> = match &config.ocr.endpoint {
            Some(endpoint) => Some(Box::new(HttpOcrClient::new(
                endpoint.clone(),
                config.ocr.api_key.clone(),
                config.ocr.timeout_secs,
            )?)),
            None => None,
        };

        Ok(Self {
            gate,
            enable_tables: config.enable_tables,
            cell_split: table_cell_pattern()?,
            pdf: Box::new(PdfTextExtractor),
            docx: DocxExtractor,
            layout,
            ocr,
            cleaner,
        })
    }

    /// Test seam: same pipeline over injected stage implementations.
    pub fn with_stages(
        gate: QualityGate,
        pdf: Box<dyn PdfExtractor>,
        layout: Option<Box<dyn LayoutExtractor>>,
        ocr: Option<Box<dyn OcrEngine>>,
        cleaner: Option<TextCleaner>,
    ) -> Result<Self, IngestError> {
        Ok(Self {
            gate,
            enable_tables: true,
            cell_split: table_cell_pattern()?,
            pdf,
            docx: DocxExtractor,
            layout,
            ocr,
            cleaner,
        })
    }

    pub async fn extract_file(&self, path: &Path) -> Result<Vec<PageExtract>, IngestError> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        match extension.as_str() {
            "pdf" => self.extract_pdf(path).await,
            "docx" => self.extract_docx(path).await,
            other => {
                warn!(path = %path.display(), extension = other, "unsupported file type, skipping");
                Ok(Vec::new())
            }
        }
    }

    async fn extract_pdf(&self, path: &Path) -> Result<Vec<PageExtract>, IngestError> {
        let pages = self.pdf.extract_pages(path)?;
        let source = path.to_string_lossy().to_string();
        let file_name = file_name_of(path)?;

        // Whole-document inputs for the fallback stages, fetched lazily and
        // at most once per file.
        let mut pdf_bytes: Option<Vec<u8>> = None;
        let mut layout_pages: Option<HashMap<u32, String>> = None;

        let mut extracts = Vec::new();
        for page in &pages {
            let text = page.text.trim().to_string();
            let tables = if self.enable_tables {
                flatten_table_rows(&page.text, &self.cell_split)
            } else {
                String::new()
            };

            let combined = [text.as_str(), tables.as_str()]
                .iter()
                .filter(|part| !part.is_empty())
                .cloned()
                .collect::<Vec<_>>()
                .join("\n\n");

            if self.gate.is_usable(&combined) {
                if !text.is_empty() {
                    let content = self.clean(&text, &file_name, page.number).await;
                    extracts.push(PageExtract {
                        page: page.number,
                        content,
                        kind: FragmentKind::Text,
                    });
                }
                if !tables.is_empty() {
                    let content = self.clean(&tables, &file_name, page.number).await;
                    extracts.push(PageExtract {
                        page: page.number,
                        content,
                        kind: FragmentKind::Table,
                    });
                }
                continue;
            }

            debug!(file = %file_name, page = page.number, "native text failed the quality gate");

            if let Some(layout) = &self.layout {
                if layout_pages.is_none() {
                    let bytes = self.file_bytes(path, &mut pdf_bytes);
                    layout_pages = Some(match bytes {
                        Some(bytes) => match layout.convert(bytes, &source).await {
                            Ok(map) => map,
                            Err(error) => {
                                warn!(file = %file_name, %error, "layout conversion failed");
                                HashMap::new()
                            }
                        },
                        None => HashMap::new(),
                    });
                }

                if let Some(layout_text) =
                    layout_pages.as_ref().and_then(|map| map.get(&page.number))
                {
                    if self.gate.is_usable(layout_text) {
                        let content = self.clean(layout_text, &file_name, page.number).await;
                        extracts.push(PageExtract {
                            page: page.number,
                            content,
                            kind: FragmentKind::Text,
                        });
                        continue;
                    }
                }
            }

            if let Some(ocr) = &self.ocr {
                let recognized = match self.file_bytes(path, &mut pdf_bytes) {
                    Some(bytes) => match ocr.recognize(bytes, &source, page.number).await {
                        Ok(text) => text,
                        Err(error) => {
                            warn!(file = %file_name, page = page.number, %error, "ocr failed");
                            String::new()
                        }
                    },
                    None => String::new(),
                };

                if self.gate.is_usable(&recognized) {
                    let content = self.clean(&recognized, &file_name, page.number).await;
                    extracts.push(PageExtract {
                        page: page.number,
                        content,
                        kind: FragmentKind::Ocr,
                    });
                    continue;
                }
            }

            // Every stage failed; the page is skipped, not an error.
            debug!(file = %file_name, page = page.number, "no stage produced usable text, skipping page");
        }

        info!(file = %file_name, pages = pages.len(), extracts = extracts.len(), "pdf extraction finished");
        Ok(extracts)
    }

    async fn extract_docx(&self, path: &Path) -> Result<Vec<PageExtract>, IngestError> {
        let file_name = file_name_of(path)?;
        let text = self.docx.extract_text(path)?;

        if !self.gate.is_usable(&text) {
            debug!(file = %file_name, "docx text failed the quality gate");
            return Ok(Vec::new());
        }

        let content = self.clean(&text, &file_name, 1).await;
        Ok(vec![PageExtract {
            page: 1,
            content,
            kind: FragmentKind::Text,
        }])
    }

    fn file_bytes<'a>(&self, path: &Path, slot: &'a mut Option<Vec<u8>>) -> Option<&'a [u8]> {
        if slot.is_none() {
            match std::fs::read(path) {
                Ok(bytes) => *slot = Some(bytes),
                Err(error) => {
                    warn!(path = %path.display(), %error, "could not reread file for fallback stage");
                    return None;
                }
            }
        }
        slot.as_deref()
    }

    async fn clean(&self, text: &str, file_name: &str, page: u32) -> String {
        match &self.cleaner {
            Some(cleaner) => cleaner.clean(text, file_name, page).await,
            None => text.to_string(),
        }
    }
}

fn file_name_of(path: &Path) -> Result<String, IngestError> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .ok_or_else(|| IngestError::MissingFileName(path.display().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QualityConfig;
    use crate::extractor::PageText;
    use tempfile::tempdir;

    struct FakePdf {
        pages: Vec<PageText>,
    }

    impl PdfExtractor for FakePdf {
        fn extract_pages(&self, _path: &Path) -> Result<Vec<PageText>, IngestError> {
            Ok(self.pages.clone())
        }
    }

    struct FakeOcr {
        text: String,
    }

    #[async_trait]
    impl OcrEngine for FakeOcr {
        async fn recognize(
            &self,
            _pdf: &[u8],
            _source: &str,
            _page: u32,
        ) -> Result<String, BackendError> {
            Ok(self.text.clone())
        }
    }

    struct FakeLayout {
        pages: HashMap<u32, String>,
    }

    #[async_trait]
    impl LayoutExtractor for FakeLayout {
        async fn convert(
            &self,
            _pdf: &[u8],
            _source: &str,
        ) -> Result<HashMap<u32, String>, BackendError> {
            Ok(self.pages.clone())
        }
    }

    fn gate() -> QualityGate {
        QualityGate::new(QualityConfig {
            min_chars: 20,
            min_alnum_ratio: 0.3,
        })
    }

    fn pdf_path(dir: &tempfile::TempDir) -> std::path::PathBuf {
        let path = dir.path().join("scan.pdf");
        std::fs::write(&path, b"%PDF-1.4 placeholder").expect("write placeholder");
        path
    }

    #[tokio::test]
    async fn clean_text_layer_wins_without_fallback_stages() {
        let cascade = ExtractionCascade::with_stages(
            gate(),
            Box::new(FakePdf {
                pages: vec![PageText {
                    number: 1,
                    text: "The drive unit requires a 30 minute cool-down after fault F07."
                        .to_string(),
                }],
            }),
            None,
            None,
            None,
        )
        .expect("cascade");

        let dir = tempdir().expect("tempdir");
        let extracts = cascade.extract_file(&pdf_path(&dir)).await.expect("extract");

        assert_eq!(extracts.len(), 1);
        assert_eq!(extracts[0].kind, FragmentKind::Text);
        assert_eq!(extracts[0].page, 1);
    }

    #[tokio::test]
    async fn table_rows_are_emitted_separately_from_text() {
        let page = "Relay assignments are listed below for the main controller.\n\
                    K1    main contactor    24V\n\
                    K3    door relay        12V";
        let cascade = ExtractionCascade::with_stages(
            gate(),
            Box::new(FakePdf {
                pages: vec![PageText {
                    number: 2,
                    text: page.to_string(),
                }],
            }),
            None,
            None,
            None,
        )
        .expect("cascade");

        let dir = tempdir().expect("tempdir");
        let extracts = cascade.extract_file(&pdf_path(&dir)).await.expect("extract");

        assert_eq!(extracts.len(), 2);
        assert_eq!(extracts[0].kind, FragmentKind::Text);
        assert_eq!(extracts[1].kind, FragmentKind::Table);
        assert!(extracts[1].content.contains("K1 | main contactor | 24V"));
    }

    #[tokio::test]
    async fn punctuation_page_falls_through_to_ocr() {
        let cascade = ExtractionCascade::with_stages(
            gate(),
            Box::new(FakePdf {
                pages: vec![PageText {
                    number: 1,
                    text: ".---.....-".to_string(),
                }],
            }),
            None,
            Some(Box::new(FakeOcr {
                text: "Terminal X1 carries the safety chain return signal.".to_string(),
            })),
            None,
        )
        .expect("cascade");

        let dir = tempdir().expect("tempdir");
        let extracts = cascade.extract_file(&pdf_path(&dir)).await.expect("extract");

        assert_eq!(extracts.len(), 1);
        assert_eq!(extracts[0].kind, FragmentKind::Ocr);
    }

    #[tokio::test]
    async fn page_failing_every_stage_contributes_nothing_and_is_not_an_error() {
        let cascade = ExtractionCascade::with_stages(
            gate(),
            Box::new(FakePdf {
                pages: vec![PageText {
                    number: 1,
                    text: ".---.....-".to_string(),
                }],
            }),
            None,
            Some(Box::new(FakeOcr {
                text: "~~ !!".to_string(),
            })),
            None,
        )
        .expect("cascade");

        let dir = tempdir().expect("tempdir");
        let extracts = cascade.extract_file(&pdf_path(&dir)).await.expect("extract");
        assert!(extracts.is_empty());
    }

    #[tokio::test]
    async fn layout_stage_runs_before_ocr_and_wins_when_usable() {
        let mut layout_pages = HashMap::new();
        layout_pages.insert(
            1,
            "Section 4.2 describes the brake adjustment procedure in detail.".to_string(),
        );

        let cascade = ExtractionCascade::with_stages(
            gate(),
            Box::new(FakePdf {
                pages: vec![PageText {
                    number: 1,
                    text: "???".to_string(),
                }],
            }),
            Some(Box::new(FakeLayout {
                pages: layout_pages,
            })),
            Some(Box::new(FakeOcr {
                text: "ocr text that would also pass the quality gate".to_string(),
            })),
            None,
        )
        .expect("cascade");

        let dir = tempdir().expect("tempdir");
        let extracts = cascade.extract_file(&pdf_path(&dir)).await.expect("extract");

        assert_eq!(extracts.len(), 1);
        assert_eq!(extracts[0].kind, FragmentKind::Text);
        assert!(extracts[0].content.contains("brake adjustment"));
    }

    #[tokio::test]
    async fn docx_reads_as_a_single_page() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("notes.docx");
        crate::extractor::test_support::write_docx(
            &path,
            &["Check the governor rope tension every six months."],
        );

        let cascade = ExtractionCascade::with_stages(
            gate(),
            Box::new(FakePdf { pages: Vec::new() }),
            None,
            None,
            None,
        )
        .expect("cascade");

        let extracts = cascade.extract_file(&path).await.expect("extract");
        assert_eq!(extracts.len(), 1);
        assert_eq!(extracts[0].page, 1);
        assert_eq!(extracts[0].kind, FragmentKind::Text);
    }

    #[tokio::test]
    async fn unsupported_extension_is_skipped_quietly() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("readme.txt");
        std::fs::write(&path, "plain text file").expect("write file");

        let cascade = ExtractionCascade::with_stages(
            gate(),
            Box::new(FakePdf { pages: Vec::new() }),
            None,
            None,
            None,
        )
        .expect("cascade");

        let extracts = cascade.extract_file(&path).await.expect("extract");
        assert!(extracts.is_empty());
    }
}
