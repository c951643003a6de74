use anyhow::Result;
use candle_core::{Device, Tensor};
use candle_transformers::models::blip;
use image::RgbImage;
use tracing::info;

use crate::inference::image_pipeline::ImageGeneratorPipeline;
use crate::inference::model_config::GenerationConfig;
use crate::inference::models::model::ModelFile;
use crate::inference::task::caption::ImageCaptioner;

/// Quantized BLIP large image captioning model.
pub struct BlipModel {
    generator_pipeline: ImageGeneratorPipeline,
}

impl BlipModel {
    #[tracing::instrument(level = "info", skip(weights, tokenizer), fields(model = %weights.base.name))]
    pub fn new(
        weights: &ModelFile,
        tokenizer: &ModelFile,
        device: Device,
        generation: GenerationConfig,
    ) -> Result<Self> {
        let weights_path = weights.resolve()?;
        let tokenizer_path = tokenizer.resolve()?;
        info!(
            "Loading {} ({}) on {:?}",
            weights.base.name, weights.base.license, device
        );

        let generator_pipeline = ImageGeneratorPipeline::with_gguf_blip_model(
            &weights_path,
            &tokenizer_path,
            &blip::Config::image_captioning_large(),
            device,
            generation,
        )?;

        Ok(Self { generator_pipeline })
    }
}

impl ImageCaptioner for BlipModel {
    #[tracing::instrument(level = "debug", skip_all)]
    fn preprocess(&self, image: &RgbImage) -> Result<Tensor> {
        self.generator_pipeline.preprocess(image)
    }

    #[tracing::instrument(level = "info", skip(self, input))]
    fn generate(&self, input: &Tensor, max_length: usize) -> Result<Vec<u32>> {
        self.generator_pipeline.generate(input, max_length)
    }

    #[tracing::instrument(level = "debug", skip(self))]
    fn decode(&self, tokens: &[u32]) -> Result<String> {
        self.generator_pipeline.decode(tokens)
    }
}
