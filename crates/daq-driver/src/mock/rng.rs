//! Seeded RNG wrapper for reproducible mock noise.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::sync::Mutex;

pub struct MockRng {
 inner: Mutex<ChaCha8Rng>,
}

impl MockRng {
 pub fn new(seed: Option<u64>) -> Self {
 let rng = match seed {
 Some(s) => ChaCha8Rng::seed_from_u64(s),
 None => ChaCha8Rng::from_entropy(),
 };
 Self {
 inner: Mutex::new(rng),
 }
 }

 /// Symmetric noise in `[-amplitude, amplitude]`.
 pub fn noise(&self, amplitude: f64) -> f64 {
 if amplitude <= 0.0 {
 return 0.0;
 }
 let mut rng = self.inner.lock().unwrap();
 rng.gen_range(-amplitude..=amplitude)
 }

 pub fn uniform(&self, lo: f64, hi: f64) -> f64 {
 let mut rng = self.inner.lock().unwrap();
 rng.gen_range(lo..=hi)
 }
}

impl Default for MockRng {
 fn default() -> Self {
 Self::new(None)
 }
}

impl std::fmt::Debug for MockRng {
 fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
 f.debug_struct("MockRng").finish()
 }
}
