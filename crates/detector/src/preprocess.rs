//! Decode + resize + tensor construction (spec §4.2 steps 1-4).

use base64::Engine;
use image::imageops::FilterType;
use image::GenericImageView;
use ndarray::Array4;

use glint_protocol::strip_data_uri_prefix;

#[derive(Debug, thiserror::Error)]
pub enum PreprocessError {
    #[error("base64 decode failed: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("image decode failed: {0}")]
    Image(#[from] image::ImageError),
}

/// The result of preprocessing: a `[1,3,size,size]` CHW float tensor
/// normalized to `[0,1]`, plus the original image's dimensions (needed to
/// map normalized detection coordinates back, though in this system
/// detections stay normalized end-to-end so these are mostly diagnostic).
pub struct PreprocessedFrame {
    pub tensor: Array4<f32>,
    pub original_width: u32,
    pub original_height: u32,
}

/// Step 1-4 of spec §4.2: strip the `data:` URI prefix, base64-decode,
/// decode the image, resize to `size x size` and emit a CHW float tensor.
pub fn preprocess(image_data: &str, size: u32) -> Result<PreprocessedFrame, PreprocessError> {
    let raw_b64 = strip_data_uri_prefix(image_data);
    let bytes = base64::engine::general_purpose::STANDARD.decode(raw_b64)?;
    let img = image::load_from_memory(&bytes)?;
    let (original_width, original_height) = img.dimensions();

    let resized = img.resize_exact(size, size, FilterType::Triangle);
    let rgb = resized.to_rgb8();

    let mut tensor = Array4::<f32>::zeros((1, 3, size as usize, size as usize));
    for (x, y, px) in rgb.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        tensor[[0, 0, y, x]] = px[0] as f32 / 255.0;
        tensor[[0, 1, y, x]] = px[1] as f32 / 255.0;
        tensor[[0, 2, y, x]] = px[2] as f32 / 255.0;
    }

    Ok(PreprocessedFrame {
        tensor,
        original_width,
        original_height,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};

    fn encode_test_png(w: u32, h: u32) -> String {
        let buf: ImageBuffer<Rgb<u8>, Vec<u8>> =
            ImageBuffer::from_fn(w, h, |x, _y| Rgb([x as u8, 0, 0]));
        let mut bytes: Vec<u8> = Vec::new();
        image::DynamicImage::ImageRgb8(buf)
            .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        let b64 = base64::engine::general_purpose::STANDARD.encode(bytes);
        format!("data:image/png;base64,{b64}")
    }

    #[test]
    fn preprocess_produces_expected_tensor_shape() {
        let data_uri = encode_test_png(32, 16);
        let out = preprocess(&data_uri, 640).unwrap();
        assert_eq!(out.tensor.shape(), &[1, 3, 640, 640]);
        assert_eq!(out.original_width, 32);
        assert_eq!(out.original_height, 16);
    }

    #[test]
    fn preprocess_normalizes_to_unit_range() {
        let data_uri = encode_test_png(8, 8);
        let out = preprocess(&data_uri, 8).unwrap();
        assert!(out.tensor.iter().all(|&v| (0.0..=1.0).contains(&v)));
    }

    #[test]
    fn preprocess_rejects_garbage_payload() {
        let err = preprocess("data:image/png;base64,not-valid-base64!!!", 640).unwrap_err();
        assert!(matches!(err, PreprocessError::Base64(_)));
    }
}
