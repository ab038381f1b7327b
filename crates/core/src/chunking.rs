use crate::cascade::PageExtract;
use crate::config::ChunkingConfig;
use crate::models::Fragment;
use crate::quality::QualityGate;

/// Sliding-window splitter over the character sequence. The window is
/// `[start, start + chunk_size)`, trimmed; `start` advances by
/// `chunk_size - overlap`. `overlap < chunk_size` is a startup invariant
/// (see [`ChunkingConfig::validate`]), not re-checked here.
pub fn split_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() {
        return Vec::new();
    }

    let step = chunk_size - overlap;
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let end = (start + chunk_size).min(chars.len());
        let window: String = chars[start..end].iter().collect();
        let trimmed = window.trim();
        if !trimmed.is_empty() {
            chunks.push(trimmed.to_string());
        }
        start += step;
    }

    chunks
}

/// Turns gated page extracts into indexable fragments. The gate is applied
/// again per chunk so every stored fragment honors the quality invariant
/// even when a window lands on a sparse tail.
pub fn fragment_pages(
    pages: &[PageExtract],
    source_file: &str,
    config: ChunkingConfig,
    gate: &QualityGate,
) -> Vec<Fragment> {
    let mut fragments = Vec::new();

    for page in pages {
        for chunk in split_text(&page.content, config.chunk_size, config.overlap) {
            if !gate.is_usable(&chunk) {
                continue;
            }
            fragments.push(Fragment {
                content: chunk,
                source_file: source_file.to_string(),
                page: page.page,
                kind: page.kind,
            });
        }
    }

    fragments
}
