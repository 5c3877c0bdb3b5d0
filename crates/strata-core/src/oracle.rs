//! Oracle interfaces - externally supplied capabilities
//!
//! The embedding model, the LLM used for causal confirmation, and file-format
//! text extraction are not part of this system. Each is reached through one
//! narrow async trait; the engine degrades gracefully when an oracle is
//! unavailable (semantic matching and LLM-assisted inference are skipped,
//! everything else proceeds).

use async_trait::async_trait;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Oracle failure
#[non_exhaustive]
#[derive(Debug, Clone, thiserror::Error)]
pub enum OracleError {
    /// The backing service is down or unreachable
    #[error("oracle unavailable: {0}")]
    Unavailable(String),
    /// The input was rejected (empty text, oversize file, bad mime)
    #[error("oracle rejected input: {0}")]
    InvalidInput(String),
    /// The oracle answered with something unparseable
    #[error("oracle returned malformed output: {0}")]
    MalformedOutput(String),
}

/// Oracle result type
pub type Result<T> = std::result::Result<T, OracleError>;

// ============================================================================
// EMBEDDER
// ============================================================================

/// `Embed(text) -> vector`
///
/// Implementations must return vectors of a fixed dimensionality for the
/// lifetime of the process; the vector index checks dimensions on insert.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch of texts, preserving order
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    /// Embedding dimensionality
    fn dimensions(&self) -> usize;
}

// ============================================================================
// COMPLETION MODEL
// ============================================================================

/// `Complete(prompt) -> text`
///
/// Used only for optional causal confirmation between borderline event
/// pairs; the caller parses a numeric score out of the completion.
#[async_trait]
pub trait CompletionModel: Send + Sync {
    /// Complete a prompt, returning the raw model text
    async fn complete(&self, prompt: &str) -> Result<String>;
}

// ============================================================================
// TEXT EXTRACTOR
// ============================================================================

/// Extracted file content
#[derive(Debug, Clone)]
pub struct ExtractedText {
    /// Plain text pulled out of the file
    pub text: String,
    /// Structured fields the extractor recognized (sheet names, headings, ...)
    pub structured_fields: serde_json::Map<String, serde_json::Value>,
}

/// `(bytes, filename, mime) -> {text, structured_fields}`
///
/// Implementations may refuse oversize inputs with
/// [`OracleError::InvalidInput`]; the pipeline respects the caller's
/// `max_file_size` policy before invoking the extractor at all.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    /// Extract text from an uploaded file
    async fn extract(&self, bytes: &[u8], filename: &str, mime: &str) -> Result<ExtractedText>;
}
