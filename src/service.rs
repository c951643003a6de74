use std::sync::Arc;

use axum::body::Bytes;
use image::RgbImage;
use tracing::{debug, info, Span};

use crate::error::PipelineError;
use crate::inference::decoder::decode_image;
use crate::inference::sanitize::sanitize;
use crate::inference::task::caption::{CaptionOutput, ImageCaptioner};
use crate::inference::task::translate::Translator;

/// Captions images and translates the caption. Built once at startup and shared read-only
/// between all requests.
pub struct CaptionService {
    captioner: Arc<dyn ImageCaptioner>,
    translator: Arc<dyn Translator>,
    source_language: String,
    target_language: String,
}

impl CaptionService {
    pub fn new(
        captioner: Arc<dyn ImageCaptioner>,
        translator: Arc<dyn Translator>,
        source_language: impl Into<String>,
        target_language: impl Into<String>,
    ) -> Self {
        Self {
            captioner,
            translator,
            source_language: source_language.into(),
            target_language: target_language.into(),
        }
    }

    /// Decodes uploaded image bytes, captions and translates them.
    #[tracing::instrument(level = "info", skip(self, bytes), fields(len = bytes.len()))]
    pub async fn caption_upload(
        &self,
        bytes: Bytes,
        max_length: usize,
    ) -> Result<CaptionOutput, PipelineError> {
        let captioner = Arc::clone(&self.captioner);
        let caption = run_blocking(move || {
            let image = decode_image(&bytes)?;
            describe(captioner.as_ref(), &image, max_length)
        })
        .await?;
        self.translate(caption).await
    }

    /// Captions and translates an already decoded image.
    #[tracing::instrument(level = "info", skip(self, image))]
    pub async fn caption_image(
        &self,
        image: Arc<RgbImage>,
        max_length: usize,
    ) -> Result<CaptionOutput, PipelineError> {
        let captioner = Arc::clone(&self.captioner);
        let caption = run_blocking(move || describe(captioner.as_ref(), &image, max_length)).await?;
        self.translate(caption).await
    }

    async fn translate(&self, caption: String) -> Result<CaptionOutput, PipelineError> {
        let translation = self
            .translator
            .translate(&caption, &self.source_language, &self.target_language)
            .await
            .map_err(PipelineError::Translation)?;
        info!(%caption, %translation, "Captioned image");

        Ok(CaptionOutput {
            caption,
            translation,
        })
    }
}

/// Runs the captioner on one image and strips the generation markers from its output.
pub fn describe(
    captioner: &dyn ImageCaptioner,
    image: &RgbImage,
    max_length: usize,
) -> Result<String, PipelineError> {
    let input = captioner
        .preprocess(image)
        .map_err(PipelineError::Inference)?;
    let tokens = captioner
        .generate(&input, max_length)
        .map_err(PipelineError::Inference)?;
    let raw = captioner
        .decode(&tokens)
        .map_err(PipelineError::Inference)?;
    debug!(%raw, "decoded caption");

    Ok(sanitize(&raw))
}

// Model inference blocks, keep it off the async workers.
async fn run_blocking<F>(f: F) -> Result<String, PipelineError>
where
    F: FnOnce() -> Result<String, PipelineError> + Send + 'static,
{
    let span = Span::current();
    tokio::task::spawn_blocking(move || span.in_scope(f))
        .await
        .map_err(|e| PipelineError::Inference(e.into()))?
}

#[cfg(test)]
mod tests {
    use image::{ImageFormat, Rgb};

    use super::*;
    use crate::testing::{encoded_image, RecordingTranslator, StubCaptioner};

    fn service(captioner: StubCaptioner, translator: Arc<RecordingTranslator>) -> CaptionService {
        CaptionService::new(Arc::new(captioner), translator, "en", "ja")
    }

    #[test]
    fn describe_sanitizes_decoded_text() {
        let image = RgbImage::from_pixel(8, 8, Rgb([250, 5, 5]));
        let caption = describe(&StubCaptioner::default(), &image, 30).unwrap();
        assert_eq!(caption, "a red apple");
    }

    #[test]
    fn describe_keeps_captions_cut_by_max_length() {
        let image = RgbImage::from_pixel(8, 8, Rgb([5, 5, 250]));
        let caption = describe(&StubCaptioner::default(), &image, 2).unwrap();
        assert_eq!(caption, "a blue sky");

        let caption = describe(&StubCaptioner::default(), &image, 1).unwrap();
        assert_eq!(caption, "");
    }

    #[test]
    fn generated_sequences_respect_max_length() {
        let captioner = StubCaptioner::default();
        let input = captioner
            .preprocess(&RgbImage::from_pixel(8, 8, Rgb([250, 5, 5])))
            .unwrap();
        for max_length in 1..6 {
            let tokens = captioner.generate(&input, max_length).unwrap();
            assert!(tokens.len() <= max_length, "{} tokens for {max_length}", tokens.len());
        }
    }

    #[tokio::test]
    async fn upload_is_captioned_and_translated() {
        let translator = Arc::new(RecordingTranslator::default());
        let service = service(StubCaptioner::default(), translator.clone());

        let bytes = Bytes::from(encoded_image(ImageFormat::Png, [10, 240, 10]));
        let output = service.caption_upload(bytes, 30).await.unwrap();

        assert_eq!(
            output,
            CaptionOutput {
                caption: "a green field".into(),
                translation: "緑の野原".into(),
            }
        );
        assert_eq!(
            translator.calls(),
            vec![("a green field".to_string(), "en".to_string(), "ja".to_string())]
        );
    }

    #[tokio::test]
    async fn corrupt_upload_is_a_decode_error() {
        let translator = Arc::new(RecordingTranslator::default());
        let service = service(StubCaptioner::default(), translator.clone());

        let err = service
            .caption_upload(Bytes::from_static(b"GIF89a but not really"), 30)
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Decode(_)));
        assert!(translator.calls().is_empty());
    }

    #[tokio::test]
    async fn captioner_failure_is_an_inference_error() {
        let translator = Arc::new(RecordingTranslator::default());
        let service = service(StubCaptioner::failing(), translator.clone());

        let image = Arc::new(RgbImage::from_pixel(8, 8, Rgb([0, 0, 0])));
        let err = service.caption_image(image, 20).await.unwrap_err();

        assert!(matches!(err, PipelineError::Inference(_)));
        assert_eq!(err.to_string(), "CUDA out of memory");
        assert!(translator.calls().is_empty());
    }

    #[tokio::test]
    async fn translator_failure_is_a_translation_error() {
        let translator = Arc::new(RecordingTranslator::failing());
        let service = service(StubCaptioner::default(), translator);

        let image = Arc::new(RgbImage::from_pixel(8, 8, Rgb([200, 0, 0])));
        let err = service.caption_image(image, 20).await.unwrap_err();

        assert!(matches!(err, PipelineError::Translation(_)));
        assert_eq!(err.to_string(), "network unreachable");
    }

    #[tokio::test]
    async fn repeated_captions_are_translated_every_time() {
        let translator = Arc::new(RecordingTranslator::default());
        let service = service(StubCaptioner::default(), translator.clone());
        let image = Arc::new(RgbImage::from_pixel(8, 8, Rgb([200, 0, 0])));

        service.caption_image(image.clone(), 20).await.unwrap();
        service.caption_image(image, 20).await.unwrap();

        assert_eq!(translator.calls().len(), 2);
    }
}
