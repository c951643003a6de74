use anyhow::Result;
use candle_core::Tensor;
use image::RgbImage;

/// A pretrained model that describes an image in English.
///
/// Implementations hold immutable, process-wide model state; every call works on its own
/// copy of anything it needs to mutate.
pub trait ImageCaptioner: Send + Sync {
    /// Turns an RGB image into the batched input tensor expected by `generate`.
    fn preprocess(&self, image: &RgbImage) -> Result<Tensor>;

    /// Generates at most `max_length` tokens describing the preprocessed image.
    fn generate(&self, input: &Tensor, max_length: usize) -> Result<Vec<u32>>;

    /// Maps generated tokens to text framed by the start and end of text markers.
    fn decode(&self, tokens: &[u32]) -> Result<String>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaptionOutput {
    pub caption: String,
    pub translation: String,
}
