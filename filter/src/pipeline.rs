use std::time::Instant;

use kernel_lab_common::config::PipelineConfig;
use kernel_lab_common::frame::PixelBuffer;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::convolve::convolve;
use crate::kernel::Kernel;
use crate::registry::{KernelRegistry, RANDOM};
use crate::FilterError;

/// Filtered buffers keyed by kernel name, in registry order.
#[derive(Debug, Clone, Default)]
pub struct FilterResult {
    entries: Vec<(String, PixelBuffer)>,
}

impl FilterResult {
    pub fn iter(&self) -> impl Iterator<Item = (&str, &PixelBuffer)> + '_ {
        self.entries.iter().map(|(name, buf)| (name.as_str(), buf))
    }

    pub fn get(&self, name: &str) -> Option<&PixelBuffer> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, buf)| buf)
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Applies every registry kernel to one input frame.
///
/// The generator is consumed once per [`FilterPipeline::run`] to draw the
/// Random kernel.
pub struct FilterPipeline<R = StdRng> {
    rng: R,
    parallel: bool,
}

impl FilterPipeline<StdRng> {
    /// Pipeline for the `request`-th request. With `config.seed` set the
    /// generator is seeded from `seed + request`, otherwise from OS entropy.
    pub fn from_config(config: &PipelineConfig, request: u64) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(request)),
            None => StdRng::from_entropy(),
        };
        Self::new(rng).parallel(config.parallel)
    }
}

impl<R: Rng> FilterPipeline<R> {
    pub fn new(rng: R) -> Self {
        Self {
            rng,
            parallel: false,
        }
    }

    /// Run each convolution on its own scoped thread.
    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn run(&mut self, input: &PixelBuffer) -> Result<FilterResult, FilterError> {
        let registry = KernelRegistry::build(&mut self.rng);
        if let Some(random) = registry.get(RANDOM) {
            debug!(weights = ?random.weights(), "drew Random kernel");
        }
        self.run_with(&registry, input)
    }

    /// Apply an already built registry. Any failing kernel fails the call.
    pub fn run_with(
        &self,
        registry: &KernelRegistry,
        input: &PixelBuffer,
    ) -> Result<FilterResult, FilterError> {
        let start = Instant::now();
        let entries = if self.parallel {
            run_parallel(registry, input)?
        } else {
            registry
                .iter()
                .map(|kernel| apply(kernel, input))
                .collect::<Result<Vec<_>, _>>()?
        };
        debug!(
            kernels = entries.len(),
            width = input.width(),
            height = input.height(),
            parallel = self.parallel,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "filter pipeline finished"
        );
        Ok(FilterResult { entries })
    }
}

fn apply(kernel: &Kernel, input: &PixelBuffer) -> Result<(String, PixelBuffer), FilterError> {
    let start = Instant::now();
    let out = convolve(input, kernel)?;
    debug!(
        kernel = kernel.name(),
        elapsed_us = start.elapsed().as_micros() as u64,
        "kernel applied"
    );
    Ok((kernel.name().to_string(), out))
}

/// One scoped thread per kernel; joined back in registry order.
fn run_parallel(
    registry: &KernelRegistry,
    input: &PixelBuffer,
) -> Result<Vec<(String, PixelBuffer)>, FilterError> {
    std::thread::scope(|scope| {
        let handles: Vec<_> = registry
            .iter()
            .map(|kernel| scope.spawn(move || apply(kernel, input)))
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic)))
            .collect()
    })
}
