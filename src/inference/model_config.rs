use candle_transformers::generation::LogitsProcessor;
use rand::random;

/// Sampling settings for caption generation. No temperature means greedy argmax decoding.
#[derive(Debug, Default, Copy, Clone, PartialEq)]
pub struct GenerationConfig {
    pub seed: Option<u64>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
}

impl GenerationConfig {
    pub fn logits_processor(&self) -> LogitsProcessor {
        LogitsProcessor::new(self.seed.unwrap_or_else(random), self.temperature, self.top_p)
    }
}
