/// A grayscale image: `height` rows of `width` 8-bit intensities.
///
/// Samples are stored row-major in one contiguous buffer. Once built a
/// buffer is never mutated; filters produce new buffers.
///
/// Zero-sized buffers are representable so that callers can report them,
/// but the convolution engine rejects them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    width: usize,
    height: usize,
    data: Vec<u8>,
}

impl PixelBuffer {
    /// Wrap row-major samples. `data.len()` must equal `width * height`.
    pub fn from_vec(width: usize, height: usize, data: Vec<u8>) -> Result<Self, FrameError> {
        let expected = sample_count(width, height)?;
        if data.len() != expected {
            return Err(FrameError::DimensionMismatch {
                width,
                height,
                len: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Build from nested rows, which must all have the same length.
    pub fn from_rows<R: AsRef<[u8]>>(rows: &[R]) -> Result<Self, FrameError> {
        let height = rows.len();
        let width = rows.first().map_or(0, |r| r.as_ref().len());
        let mut data = Vec::with_capacity(width * height);
        for (row, r) in rows.iter().enumerate() {
            let r = r.as_ref();
            if r.len() != width {
                return Err(FrameError::RaggedRows {
                    row,
                    expected: width,
                    got: r.len(),
                });
            }
            data.extend_from_slice(r);
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// A `width` x `height` buffer with every sample set to `value`.
    pub fn filled(width: usize, height: usize, value: u8) -> Result<Self, FrameError> {
        let len = sample_count(width, height)?;
        Ok(Self {
            width,
            height,
            data: vec![value; len],
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Sample at column `x`, row `y`. Panics when out of bounds.
    #[inline]
    pub fn get(&self, x: usize, y: usize) -> u8 {
        self.data[y * self.width + x]
    }

    #[inline]
    pub fn row(&self, y: usize) -> &[u8] {
        let start = y * self.width;
        &self.data[start..start + self.width]
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }
}

fn sample_count(width: usize, height: usize) -> Result<usize, FrameError> {
    width
        .checked_mul(height)
        .ok_or(FrameError::TooLarge { width, height })
}

/// A grayscale frame as handed over by the capture layer.
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    pub pixels: PixelBuffer,
    pub captured_at_ms: i64,
    /// Where the frame came from (URL or file path), for display.
    pub source: String,
}

impl CapturedFrame {
    pub fn new(pixels: PixelBuffer, captured_at_ms: i64, source: impl Into<String>) -> Self {
        Self {
            pixels,
            captured_at_ms,
            source: source.into(),
        }
    }

    /// Capture time as an RFC 3339 UTC timestamp.
    pub fn captured_at(&self) -> String {
        chrono::DateTime::from_timestamp_millis(self.captured_at_ms)
            .unwrap_or_else(chrono::Utc::now)
            .format("%Y-%m-%dT%H:%M:%S%.3fZ")
            .to_string()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("pixel data length {len} does not match {width}x{height}")]
    DimensionMismatch {
        width: usize,
        height: usize,
        len: usize,
    },
    #[error("row {row} has {got} samples, expected {expected}")]
    RaggedRows {
        row: usize,
        expected: usize,
        got: usize,
    },
    #[error("{width}x{height} samples overflow the address space")]
    TooLarge { width: usize, height: usize },
}
