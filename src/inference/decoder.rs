use image::RgbImage;

use crate::error::PipelineError;

/// Decodes uploaded bytes of any supported format into an 8-bit RGB bitmap.
#[tracing::instrument(level = "debug", skip(bytes), fields(len = bytes.len()))]
pub fn decode_image(bytes: &[u8]) -> Result<RgbImage, PipelineError> {
    let image = image::load_from_memory(bytes)?;
    Ok(image.to_rgb8())
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};

    use super::*;
    use crate::testing::encoded_image;

    #[test]
    fn decodes_jpeg_and_png() {
        for format in [ImageFormat::Jpeg, ImageFormat::Png] {
            let image = decode_image(&encoded_image(format, [200, 10, 10])).unwrap();
            assert_eq!(image.dimensions(), (16, 12));
            assert!(image.get_pixel(3, 3)[0] > 150);
        }
    }

    #[test]
    fn drops_alpha_channel() {
        let image = RgbaImage::from_pixel(4, 4, Rgba([1, 2, 3, 0]));
        let mut bytes = Vec::new();
        DynamicImage::ImageRgba8(image)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();

        let decoded = decode_image(&bytes).unwrap();
        assert_eq!(decoded.get_pixel(0, 0).0, [1, 2, 3]);
    }

    #[test]
    fn rejects_non_image_bytes() {
        let err = decode_image(b"definitely not an image").unwrap_err();
        assert!(matches!(err, PipelineError::Decode(_)));
        assert!(!err.to_string().is_empty());
    }

    #[test]
    fn rejects_truncated_png() {
        let bytes = encoded_image(ImageFormat::Png, [0, 0, 0]);
        let err = decode_image(&bytes[..bytes.len() / 2]).unwrap_err();
        assert!(matches!(err, PipelineError::Decode(_)));
    }
}
