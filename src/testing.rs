//! Deterministic captioner and translator doubles.

use std::io::Cursor;
use std::sync::Mutex;

use anyhow::{anyhow, bail, Result};
use axum::async_trait;
use candle_core::{Device, Tensor};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};

use crate::inference::sanitize::{END_OF_TEXT, START_OF_TEXT};
use crate::inference::task::caption::ImageCaptioner;
use crate::inference::task::translate::Translator;

const START_TOKEN: u32 = 1000;
const END_TOKEN: u32 = 1001;
const TRAILING_TOKEN: u32 = 99;
const CAPTIONS: [&str; 3] = ["a red apple", "a green field", "a blue sky"];

pub(crate) fn encoded_image(format: ImageFormat, color: [u8; 3]) -> Vec<u8> {
    let image = RgbImage::from_pixel(16, 12, Rgb(color));
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(image)
        .write_to(&mut Cursor::new(&mut bytes), format)
        .unwrap();
    bytes
}

/// Describes an image by its dominant color channel.
#[derive(Default)]
pub(crate) struct StubCaptioner {
    fail: bool,
}

impl StubCaptioner {
    pub(crate) fn failing() -> Self {
        Self { fail: true }
    }
}

impl ImageCaptioner for StubCaptioner {
    fn preprocess(&self, image: &RgbImage) -> Result<Tensor> {
        let mut sums = [0f32; 3];
        for pixel in image.pixels() {
            for (sum, value) in sums.iter_mut().zip(pixel.0) {
                *sum += f32::from(value);
            }
        }
        Ok(Tensor::new(&sums, &Device::Cpu)?)
    }

    fn generate(&self, input: &Tensor, max_length: usize) -> Result<Vec<u32>> {
        if self.fail {
            bail!("CUDA out of memory");
        }
        let sums: Vec<f32> = input.to_vec1()?;
        let channel = sums
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.total_cmp(b))
            .map(|(i, _)| i as u32)
            .ok_or_else(|| anyhow!("empty input"))?;

        // The start token counts toward max_length and is always present
        let mut tokens = vec![START_TOKEN, channel, END_TOKEN, TRAILING_TOKEN];
        tokens.truncate(max_length.max(1));
        Ok(tokens)
    }

    fn decode(&self, tokens: &[u32]) -> Result<String> {
        tokens
            .iter()
            .map(|&token| match token {
                START_TOKEN => Ok(START_OF_TEXT),
                END_TOKEN => Ok(END_OF_TEXT),
                TRAILING_TOKEN => Ok(" trailing"),
                t => CAPTIONS
                    .get(t as usize)
                    .copied()
                    .ok_or_else(|| anyhow!("unknown token {t}")),
            })
            .collect()
    }
}

/// Records every call and answers from a small dictionary.
#[derive(Default)]
pub(crate) struct RecordingTranslator {
    fail: bool,
    calls: Mutex<Vec<(String, String, String)>>,
}

impl RecordingTranslator {
    pub(crate) fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub(crate) fn calls(&self) -> Vec<(String, String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Translator for RecordingTranslator {
    async fn translate(
        &self,
        text: &str,
        source_language: &str,
        target_language: &str,
    ) -> Result<String> {
        self.calls.lock().unwrap().push((
            text.to_string(),
            source_language.to_string(),
            target_language.to_string(),
        ));
        if self.fail {
            bail!("network unreachable");
        }
        Ok(match text {
            "a red apple" => "赤いリンゴ".to_string(),
            "a green field" => "緑の野原".to_string(),
            "a blue sky" => "青い空".to_string(),
            other => format!("[{target_language}] {other}"),
        })
    }
}
