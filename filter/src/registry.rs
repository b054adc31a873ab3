use rand::Rng;

use crate::kernel::{Kernel, BLUR, EMBOSS, IDENTITY, OUTLINE, SHARPEN};

pub const RANDOM: &str = "Random";

/// The fixed kernels, in the order they are rendered.
const FIXED: [(&str, crate::kernel::Weights); 5] = [
    ("Identity", IDENTITY),
    ("Outline", OUTLINE),
    ("Blur", BLUR),
    ("Emboss", EMBOSS),
    ("Sharpen", SHARPEN),
];

/// Ordered set of uniquely named kernels.
///
/// Built once per filtering request: the last entry, "Random", is drawn
/// fresh from the caller's generator on every [`KernelRegistry::build`].
#[derive(Debug, Clone)]
pub struct KernelRegistry {
    kernels: Vec<Kernel>,
}

impl KernelRegistry {
    pub fn build<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let mut kernels: Vec<Kernel> = FIXED
            .iter()
            .map(|(name, weights)| Kernel::new(*name, *weights))
            .collect();
        kernels.push(Kernel::random(RANDOM, rng));
        Self { kernels }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Kernel> + '_ {
        self.kernels.iter()
    }

    pub fn get(&self, name: &str) -> Option<&Kernel> {
        self.kernels.iter().find(|k| k.name() == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.kernels.iter().map(Kernel::name).collect()
    }

    pub fn len(&self) -> usize {
        self.kernels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kernels.is_empty()
    }
}
