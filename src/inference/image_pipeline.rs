#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]

use std::path::Path;

use anyhow::{anyhow, Result};
use candle_core::{DType, Device, Tensor};
use candle_transformers::models::{blip, quantized_blip};
use image::imageops::{self, FilterType};
use image::RgbImage;
use tokenizers::Tokenizer;
use tracing::debug;

use crate::inference::model_config::GenerationConfig;
use crate::inference::sanitize::{END_OF_TEXT, START_OF_TEXT};

pub const IMAGE_SIZE: u32 = 384;
const IMAGE_MEAN: [f32; 3] = [0.481_454_66, 0.457_827_5, 0.408_210_73];
const IMAGE_STD: [f32; 3] = [0.268_629_54, 0.261_302_6, 0.275_777_1];

// [DEC] and [SEP] of the BLIP text decoder vocabulary.
const BOS_TOKEN_ID: u32 = 30522;
const SEP_TOKEN_ID: u32 = 102;

// Taken from https://github.com/huggingface/candle/blob/main/candle-examples/examples/blip/main.rs
pub struct ImageGeneratorPipeline {
    model: quantized_blip::BlipForConditionalGeneration,
    tokenizer: Tokenizer,
    device: Device,
    generation: GenerationConfig,
}

impl ImageGeneratorPipeline {
    pub fn with_gguf_blip_model(
        model_path: &Path,
        tokenizer_path: &Path,
        config: &blip::Config,
        device: Device,
        generation: GenerationConfig,
    ) -> Result<Self> {
        let tokenizer = Tokenizer::from_file(tokenizer_path)
            .map_err(|e| anyhow!("Failed to load tokenizer: {e}"))?;
        let vb = quantized_blip::VarBuilder::from_gguf(model_path, &device)?;
        let model = quantized_blip::BlipForConditionalGeneration::new(config, vb)?;

        Ok(Self {
            model,
            tokenizer,
            device,
            generation,
        })
    }

    pub fn preprocess(&self, image: &RgbImage) -> Result<Tensor> {
        Ok(preprocess_image(image)?)
    }

    /// Greedy (or sampled) decoding on a private copy of the model so the shared weights
    /// and an empty kv cache stay untouched between requests.
    pub fn generate(&self, input: &Tensor, max_length: usize) -> Result<Vec<u32>> {
        let mut model = self.model.clone();
        let mut logits_processor = self.generation.logits_processor();

        let image_embeds = input.to_device(&self.device)?.apply(model.vision_model())?;
        debug!("image embeddings: {:?}", image_embeds.dims());
        model.text_decoder().reset_kv_cache();

        let mut step = 0;
        let token_ids = decode_steps(max_length, |token_ids| {
            let context_size = if step > 0 { 1 } else { token_ids.len() };
            step += 1;
            let start_pos = token_ids.len().saturating_sub(context_size);
            let input_ids = Tensor::new(&token_ids[start_pos..], &self.device)?.unsqueeze(0)?;
            let logits = model.text_decoder().forward(&input_ids, &image_embeds)?;
            let logits = logits.squeeze(0)?;
            let logits = logits.get(logits.dim(0)? - 1)?;

            Ok(logits_processor.sample(&logits)?)
        })?;

        Ok(token_ids)
    }

    pub fn decode(&self, tokens: &[u32]) -> Result<String> {
        frame_tokens(tokens, |run| {
            self.tokenizer
                .decode(run, true)
                .map_err(|e| anyhow!("Failed to decode tokens: {e}"))
        })
    }
}

/// Center crops the largest square, resizes it to `IMAGE_SIZE` and normalizes it with the
/// CLIP statistics. The result has the shape (1, 3, IMAGE_SIZE, IMAGE_SIZE).
///
/// Cropping first keeps the intermediate buffers no larger than the decoded image, whatever
/// its aspect ratio.
pub fn preprocess_image(image: &RgbImage) -> candle_core::Result<Tensor> {
    let (width, height) = image.dimensions();
    let side = width.min(height);
    let left = (width - side) / 2;
    let top = (height - side) / 2;
    let cropped = imageops::crop_imm(image, left, top, side, side).to_image();
    let resized = imageops::resize(&cropped, IMAGE_SIZE, IMAGE_SIZE, FilterType::Triangle);

    let size = IMAGE_SIZE as usize;
    let data = Tensor::from_vec(resized.into_raw(), (size, size, 3), &Device::Cpu)?
        .permute((2, 0, 1))?;
    let mean = Tensor::new(&IMAGE_MEAN, &Device::Cpu)?.reshape((3, 1, 1))?;
    let std = Tensor::new(&IMAGE_STD, &Device::Cpu)?.reshape((3, 1, 1))?;
    (data.to_dtype(DType::F32)? / 255.)?
        .broadcast_sub(&mean)?
        .broadcast_div(&std)?
        .unsqueeze(0)
}

/// Runs `next_token` from a sequence holding only the decoder start token until it emits the
/// separator or the sequence, start token included, holds `max_length` tokens.
fn decode_steps<F>(max_length: usize, mut next_token: F) -> Result<Vec<u32>>
where
    F: FnMut(&[u32]) -> Result<u32>,
{
    let mut token_ids = vec![BOS_TOKEN_ID];
    while token_ids.len() < max_length {
        let token = next_token(&token_ids)?;
        token_ids.push(token);
        if token == SEP_TOKEN_ID {
            break;
        }
    }
    Ok(token_ids)
}

/// Replaces the decoder start and separator tokens with the text markers and decodes the
/// runs in between with `decode_run`.
fn frame_tokens<F>(tokens: &[u32], decode_run: F) -> Result<String>
where
    F: Fn(&[u32]) -> Result<String>,
{
    let mut text = String::new();
    let mut run = Vec::new();
    for &token in tokens {
        let marker = match token {
            BOS_TOKEN_ID => START_OF_TEXT,
            SEP_TOKEN_ID => END_OF_TEXT,
            _ => {
                run.push(token);
                continue;
            }
        };
        if !run.is_empty() {
            text.push_str(&decode_run(&run)?);
            run.clear();
        }
        text.push_str(marker);
    }
    if !run.is_empty() {
        text.push_str(&decode_run(&run)?);
    }
    Ok(text)
}
