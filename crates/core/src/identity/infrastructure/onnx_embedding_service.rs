//! Face embedding via an ONNX export of a FaceNet-style network.
//!
//! Input is a 160x160 RGB crop scaled to [-1, 1] in NCHW layout; the output
//! vector is L2-normalized so Euclidean distances fall in [0, 2].

use std::path::Path;
use std::sync::Mutex;

use crate::detection::domain::perception::{ServiceError, ServiceKind};
use crate::identity::domain::embedding::EmbeddingService;
use crate::shared::bbox::BoundingBox;
use crate::shared::constants::EMBEDDING_INPUT_SIZE;
use crate::shared::frame::Frame;

const NORM_MEAN: f32 = 127.5;
const NORM_STD: f32 = 127.5;

pub struct OnnxEmbeddingService {
    session: Mutex<ort::session::Session>,
}

impl OnnxEmbeddingService {
    pub fn new(model_path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let intra_threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let session = ort::session::Session::builder()?
            .with_optimization_level(ort::session::builder::GraphOptimizationLevel::Level3)?
            .with_inter_threads(1)?
            .with_intra_threads(intra_threads)?
            .commit_from_file(model_path)?;
        Ok(Self {
            session: Mutex::new(session),
        })
    }

    fn run(&self, crop: &Frame) -> Result<Vec<f32>, Box<dyn std::error::Error>> {
        let tensor = preprocess(crop.data(), crop.width(), crop.height(), crop.channels());
        let input_value = ort::value::Tensor::from_array(tensor)?;
        let mut session = self
            .session
            .lock()
            .map_err(|e| format!("Lock poisoned: {e}"))?;
        let outputs = session.run(ort::inputs![input_value])?;
        let embedding_array = outputs[0].try_extract_array::<f32>()?;
        let embedding_slice = embedding_array
            .as_slice()
            .ok_or("Cannot get embedding slice")?;

        let mut embedding = embedding_slice.to_vec();
        l2_normalize(&mut embedding);
        Ok(embedding)
    }
}

impl EmbeddingService for OnnxEmbeddingService {
    fn embed(
        &self,
        frame: &Frame,
        region: Option<&BoundingBox>,
    ) -> Result<Option<Vec<f32>>, ServiceError> {
        let cropped = match region {
            Some(bbox) => match frame.crop(bbox) {
                Some(crop) => Some(crop),
                None => return Ok(None),
            },
            None => None,
        };
        let crop = cropped.as_ref().unwrap_or(frame);
        if crop.width() == 0 || crop.height() == 0 {
            return Ok(None);
        }
        self.run(crop)
            .map(Some)
            .map_err(|e| ServiceError::unavailable(ServiceKind::Embedding, e))
    }
}

/// Resize to 160x160 (nearest), scale to [-1, 1], NCHW layout.
fn preprocess(data: &[u8], width: u32, height: u32, channels: u8) -> ndarray::Array4<f32> {
    let src_w = width as usize;
    let src_h = height as usize;
    let stride = channels as usize;
    let size = EMBEDDING_INPUT_SIZE;

    let mut tensor = ndarray::Array4::<f32>::zeros((1, 3, size, size));
    if src_w == 0 || src_h == 0 || stride < 3 {
        return tensor;
    }

    for y in 0..size {
        let src_y = (((y as f64 + 0.5) * src_h as f64 / size as f64) as usize).min(src_h - 1);
        for x in 0..size {
            let src_x = (((x as f64 + 0.5) * src_w as f64 / size as f64) as usize).min(src_w - 1);
            let offset = (src_y * src_w + src_x) * stride;
            if offset + 2 < data.len() {
                for c in 0..3 {
                    tensor[[0, c, y, x]] = (data[offset + c] as f32 - NORM_MEAN) / NORM_STD;
                }
            }
        }
    }

    tensor
}

pub fn l2_normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_preprocess_shape_and_range() {
        let data = vec![255u8; 20 * 10 * 3];
        let tensor = preprocess(&data, 20, 10, 3);
        assert_eq!(tensor.shape(), &[1, 3, 160, 160]);
        assert_relative_eq!(tensor[[0, 0, 0, 0]], 1.0);
        assert_relative_eq!(tensor[[0, 2, 159, 159]], 1.0);
    }

    #[test]
    fn test_preprocess_black_is_minus_one() {
        let tensor = preprocess(&[0u8; 4 * 4 * 3], 4, 4, 3);
        assert_relative_eq!(tensor[[0, 1, 80, 80]], -1.0);
    }

    #[test]
    fn test_preprocess_reads_rgb_channels() {
        // Single pixel, red only
        let tensor = preprocess(&[255, 0, 0], 1, 1, 3);
        assert_relative_eq!(tensor[[0, 0, 10, 10]], 1.0);
        assert_relative_eq!(tensor[[0, 1, 10, 10]], -1.0);
        assert_relative_eq!(tensor[[0, 2, 10, 10]], -1.0);
    }

    #[test]
    fn test_preprocess_skips_non_rgb() {
        let tensor = preprocess(&[255u8; 16], 4, 4, 1);
        assert!(tensor.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_l2_normalize() {
        let mut v = vec![3.0, 4.0];
        l2_normalize(&mut v);
        assert_relative_eq!(v[0], 0.6);
        assert_relative_eq!(v[1], 0.8);
    }

    #[test]
    fn test_l2_normalize_zero_vector_unchanged() {
        let mut v = vec![0.0, 0.0];
        l2_normalize(&mut v);
        assert_eq!(v, vec![0.0, 0.0]);
    }
}
