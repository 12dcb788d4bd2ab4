use ndarray::ArrayView3;
use thiserror::Error;

use crate::shared::bbox::BoundingBox;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame data length {actual} does not match {width}x{height}x{channels}")]
    SizeMismatch {
        actual: usize,
        width: u32,
        height: u32,
        channels: u8,
    },
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
}

/// A single camera frame: contiguous RGB bytes in row-major order.
///
/// Format conversion happens at the decode boundary only; the rest of the
/// engine treats pixel data as opaque and hands crops to external services.
#[derive(Clone, Debug)]
pub struct Frame {
    data: Vec<u8>,
    width: u32,
    height: u32,
    channels: u8,
    index: usize,
}

impl Frame {
    pub fn new(
        data: Vec<u8>,
        width: u32,
        height: u32,
        channels: u8,
        index: usize,
    ) -> Result<Self, FrameError> {
        let expected = (width as usize) * (height as usize) * (channels as usize);
        if data.len() != expected {
            return Err(FrameError::SizeMismatch {
                actual: data.len(),
                width,
                height,
                channels,
            });
        }
        Ok(Self {
            data,
            width,
            height,
            channels,
            index,
        })
    }

    /// All-black RGB frame, used when a recorded session carries no pixels.
    pub fn blank(width: u32, height: u32, index: usize) -> Self {
        Self {
            data: vec![0u8; (width as usize) * (height as usize) * 3],
            width,
            height,
            channels: 3,
            index,
        }
    }

    /// Decodes an encoded image (PNG, JPEG, ...) into an RGB frame.
    pub fn decode(bytes: &[u8], index: usize) -> Result<Self, FrameError> {
        let image = image::load_from_memory(bytes)
            .map_err(|e| FrameError::InvalidFrame(e.to_string()))?
            .to_rgb8();
        let (width, height) = image.dimensions();
        Self::new(image.into_raw(), width, height, 3, index)
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn as_ndarray(&self) -> Result<ArrayView3<'_, u8>, FrameError> {
        ArrayView3::from_shape(self.shape(), &self.data).map_err(|_| FrameError::SizeMismatch {
            actual: self.data.len(),
            width: self.width,
            height: self.height,
            channels: self.channels,
        })
    }

    /// Copies the pixels under `bbox` into a new frame with the same index.
    ///
    /// Returns `None` when the box lies entirely outside the frame.
    pub fn crop(&self, bbox: &BoundingBox) -> Option<Frame> {
        let (x, y, w, h) = bbox.clamp_to(self.width, self.height)?;
        let ch = self.channels as usize;
        let row_len = self.width as usize * ch;
        let mut data = Vec::with_capacity(w as usize * h as usize * ch);
        for row in y..y + h {
            let start = row as usize * row_len + x as usize * ch;
            data.extend_from_slice(&self.data[start..start + w as usize * ch]);
        }
        Some(Frame {
            data,
            width: w,
            height: h,
            channels: self.channels,
            index: self.index,
        })
    }

    fn shape(&self) -> (usize, usize, usize) {
        (
            self.height as usize,
            self.width as usize,
            self.channels as usize,
        )
    }
}
