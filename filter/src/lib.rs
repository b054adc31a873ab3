//! 3x3 convolution filters over grayscale frames.
//!
//! [`FilterPipeline`] builds a [`KernelRegistry`] (five fixed kernels plus a
//! freshly drawn "Random" one) and applies each kernel to the input with
//! [`convolve`], returning the results in registry order.

pub mod convolve;
pub mod kernel;
pub mod pipeline;
pub mod registry;

pub use convolve::convolve;
pub use kernel::Kernel;
pub use pipeline::{FilterPipeline, FilterResult};
pub use registry::KernelRegistry;

use kernel_lab_common::frame::FrameError;

#[derive(Debug, thiserror::Error)]
pub enum FilterError {
    #[error("kernel must be 3x3, got {rows}x{cols}")]
    InvalidKernelShape { rows: usize, cols: usize },
    #[error("cannot filter an empty {width}x{height} buffer")]
    EmptyBuffer { width: usize, height: usize },
    #[error("invalid pixel buffer: {0}")]
    Frame(#[from] FrameError),
}
