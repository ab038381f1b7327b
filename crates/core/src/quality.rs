use crate::config::QualityConfig;

/// Decides whether extracted text is worth indexing. This is the pivot of
/// the extraction cascade: every stage's output is tested against it, and
/// failure triggers the next, more expensive stage.
#[derive(Debug, Clone, Copy)]
pub struct QualityGate {
    config: QualityConfig,
}

impl QualityGate {
    pub fn new(config: QualityConfig) -> Self {
        Self { config }
    }

    /// Pure and deterministic. Rejects short text and text dominated by
    /// punctuation or extraction noise.
    pub fn is_usable(&self, text: &str) -> bool {
        let trimmed = text.trim();
        let total = trimmed.chars().count();

        if total < self.config.min_chars {
            return false;
        }

        let alnum = trimmed.chars().filter(|c| is_script_alnum(*c)).count();
        (alnum as f32 / total as f32) >= self.config.min_alnum_ratio
    }
}

impl Default for QualityGate {
    fn default() -> Self {
        Self::new(QualityConfig::default())
    }
}

/// Latin letters, digits, and the Cyrillic block. The manuals this system
/// ingests mix both scripts.
fn is_script_alnum(c: char) -> bool {
    c.is_ascii_alphanumeric() || ('\u{0400}'..='\u{04FF}').contains(&c)
}
