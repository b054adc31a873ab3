use kernel_lab_common::frame::PixelBuffer;
use tracing::trace;

use crate::kernel::{Kernel, KERNEL_SIZE};
use crate::FilterError;

/// Apply `kernel` to `input`, producing a new buffer of the same size.
///
/// Each output sample is `sum(kernel[dy + 1][dx + 1] * input[y + dy][x + dx])`
/// over `dy, dx` in `-1..=1`. Neighbours outside the image read as 0 (zero
/// fill, no reflection). The sum is accumulated in `f64`, clamped to
/// `[0, 255]` and then truncated to `u8`.
pub fn convolve(input: &PixelBuffer, kernel: &Kernel) -> Result<PixelBuffer, FilterError> {
    if input.is_empty() {
        return Err(FilterError::EmptyBuffer {
            width: input.width(),
            height: input.height(),
        });
    }

    let (w, h) = (input.width(), input.height());
    let mut out = Vec::with_capacity(w * h);

    for y in 0..h {
        // Rows above and below the image are all zeros and contribute nothing.
        let rows: [Option<&[u8]>; KERNEL_SIZE] = [
            y.checked_sub(1).map(|yy| input.row(yy)),
            Some(input.row(y)),
            (y + 1 < h).then(|| input.row(y + 1)),
        ];

        for x in 0..w {
            let mut acc = 0.0f64;
            for (ky, row) in rows.iter().enumerate() {
                let Some(row) = row else { continue };
                for kx in 0..KERNEL_SIZE {
                    // Source column is x + kx - 1.
                    let Some(sx) = (x + kx).checked_sub(1) else { continue };
                    if sx >= w {
                        continue;
                    }
                    acc += kernel.at(ky, kx) * f64::from(row[sx]);
                }
            }
            out.push(clamp_to_u8(acc));
        }
    }

    trace!(kernel = kernel.name(), width = w, height = h, "convolved");
    PixelBuffer::from_vec(w, h, out).map_err(FilterError::from)
}

/// Clamp to `[0, 255]` first, then truncate toward zero. NaN maps to 0.
#[inline]
pub fn clamp_to_u8(value: f64) -> u8 {
    value.clamp(0.0, 255.0) as u8
}
