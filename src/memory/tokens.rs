//! Token estimation strategies.

/// Characters per token assumed by the fallback estimator.
pub const CHARS_PER_TOKEN: usize = 4;

/// Estimates how many model tokens a text costs.
pub trait TokenEstimator: Send + Sync {
    fn count(&self, text: &str) -> usize;
}

/// Deterministic fallback: one token per four characters, at least one.
#[derive(Debug, Clone, Copy, Default)]
pub struct CharEstimator;

impl TokenEstimator for CharEstimator {
    fn count(&self, text: &str) -> usize {
        (text.chars().count() / CHARS_PER_TOKEN).max(1)
    }
}

/// Exact counts with the cl100k_base encoding.
#[cfg(feature = "tiktoken")]
pub struct TiktokenEstimator {
    bpe: tiktoken_rs::CoreBPE,
}

#[cfg(feature = "tiktoken")]
impl TiktokenEstimator {
    /// Load the encoding. Fails if the bundled ranks cannot be parsed.
    pub fn cl100k() -> anyhow::Result<Self> {
        Ok(Self {
            bpe: tiktoken_rs::cl100k_base()?,
        })
    }
}

#[cfg(feature = "tiktoken")]
impl TokenEstimator for TiktokenEstimator {
    fn count(&self, text: &str) -> usize {
        self.bpe.encode_ordinary(text).len()
    }
}

/// The most precise estimator compiled in.
pub fn default_estimator() -> Box<dyn TokenEstimator> {
    #[cfg(feature = "tiktoken")]
    {
        match TiktokenEstimator::cl100k() {
            Ok(estimator) => return Box::new(estimator),
            Err(e) => tracing::warn!("tiktoken unavailable, estimating by length: {}", e),
        }
    }
    Box::new(CharEstimator)
}
