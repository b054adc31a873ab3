use rand::Rng;
use rand_distr::StandardNormal;

use crate::FilterError;

/// Side length of every kernel.
pub const KERNEL_SIZE: usize = 3;

pub type Weights = [[f64; KERNEL_SIZE]; KERNEL_SIZE];

pub const IDENTITY: Weights = [[0.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 0.0]];

pub const OUTLINE: Weights = [[-1.0, -1.0, -1.0], [-1.0, 8.0, -1.0], [-1.0, -1.0, -1.0]];

/// Normalised 3x3 Gaussian `[1, 2, 1] x [1, 2, 1] / 16`.
pub const BLUR: Weights = [
    [0.0625, 0.125, 0.0625],
    [0.125, 0.25, 0.125],
    [0.0625, 0.125, 0.0625],
];

pub const EMBOSS: Weights = [[-2.0, -1.0, 0.0], [-1.0, 1.0, 1.0], [0.0, 1.0, 2.0]];

pub const SHARPEN: Weights = [[0.0, -1.0, 0.0], [-1.0, 5.0, -1.0], [0.0, -1.0, 0.0]];

/// A named 3x3 weight matrix, anchored at its centre cell.
#[derive(Debug, Clone, PartialEq)]
pub struct Kernel {
    name: String,
    weights: Weights,
}

impl Kernel {
    pub fn new(name: impl Into<String>, weights: Weights) -> Self {
        Self {
            name: name.into(),
            weights,
        }
    }

    /// Build a kernel from dynamically sized rows.
    ///
    /// Fails with [`FilterError::InvalidKernelShape`] unless there are exactly
    /// three rows of three weights.
    pub fn from_rows<R: AsRef<[f64]>>(
        name: impl Into<String>,
        rows: &[R],
    ) -> Result<Self, FilterError> {
        let cols = rows.first().map_or(0, |r| r.as_ref().len());
        if rows.len() != KERNEL_SIZE {
            return Err(FilterError::InvalidKernelShape {
                rows: rows.len(),
                cols,
            });
        }
        let mut weights = [[0.0; KERNEL_SIZE]; KERNEL_SIZE];
        for (dst, src) in weights.iter_mut().zip(rows) {
            let src = src.as_ref();
            if src.len() != KERNEL_SIZE {
                return Err(FilterError::InvalidKernelShape {
                    rows: rows.len(),
                    cols: src.len(),
                });
            }
            dst.copy_from_slice(src);
        }
        Ok(Self::new(name, weights))
    }

    /// Nine independent draws from the standard normal distribution.
    pub fn random<R: Rng + ?Sized>(name: impl Into<String>, rng: &mut R) -> Self {
        let mut weights = [[0.0; KERNEL_SIZE]; KERNEL_SIZE];
        for w in weights.iter_mut().flatten() {
            *w = rng.sample(StandardNormal);
        }
        Self::new(name, weights)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn weights(&self) -> &Weights {
        &self.weights
    }

    /// Weight at `row`, `col`; the anchor is `(1, 1)`.
    #[inline]
    pub fn at(&self, row: usize, col: usize) -> f64 {
        self.weights[row][col]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn sum(weights: Weights) -> f64 {
        Kernel::new("k", weights).weights().iter().flatten().sum()
    }

    #[test]
    fn blur_is_normalised() {
        assert_eq!(sum(BLUR), 1.0);
        assert_eq!(sum(IDENTITY), 1.0);
        assert_eq!(sum(SHARPEN), 1.0);
        assert_eq!(sum(OUTLINE), 0.0);
    }

    #[test]
    fn emboss_is_anti_symmetric_off_centre() {
        let k = Kernel::new("Emboss", EMBOSS);
        for r in 0..KERNEL_SIZE {
            for c in 0..KERNEL_SIZE {
                if (r, c) != (1, 1) {
                    assert_eq!(k.at(r, c), -k.at(2 - r, 2 - c), "cell ({r}, {c})");
                }
            }
        }
    }

    #[test]
    fn from_rows_accepts_3x3() {
        let rows = vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0], vec![7.0, 8.0, 9.0]];
        let k = Kernel::from_rows("custom", &rows).unwrap();
        assert_eq!(k.name(), "custom");
        assert_eq!(k.at(0, 2), 3.0);
        assert_eq!(k.at(2, 0), 7.0);
    }

    #[test]
    fn from_rows_rejects_wrong_row_count() {
        let rows = vec![vec![0.0; 3], vec![0.0; 3]];
        let err = Kernel::from_rows("short", &rows).unwrap_err();
        assert!(matches!(err, FilterError::InvalidKernelShape { rows: 2, cols: 3 }));
    }

    #[test]
    fn from_rows_rejects_wrong_column_count() {
        let rows = vec![vec![0.0; 3], vec![0.0; 5], vec![0.0; 3]];
        let err = Kernel::from_rows("wide", &rows).unwrap_err();
        assert!(matches!(err, FilterError::InvalidKernelShape { rows: 3, cols: 5 }));
    }

    #[test]
    fn random_kernel_follows_the_generator() {
        let a = Kernel::random("Random", &mut StdRng::seed_from_u64(3));
        let b = Kernel::random("Random", &mut StdRng::seed_from_u64(3));
        let c = Kernel::random("Random", &mut StdRng::seed_from_u64(4));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.weights().iter().flatten().all(|w| w.is_finite()));
    }
}
