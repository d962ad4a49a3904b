//! Random sources used to select outcomes.

use std::{
    fmt,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use rand::{rngs::StdRng, Rng as _, SeedableRng as _};

/// A source of uniformly-distributed floating-point values.
///
/// Implementations must be safe to share between concurrently executing requests.
pub trait RandomSource: Send + Sync {
    /// Returns the next value, uniformly distributed over `[0, 1)`.
    fn next_uniform(&self) -> f64;
}

impl<R> RandomSource for Arc<R>
where
    R: RandomSource + ?Sized,
{
    fn next_uniform(&self) -> f64 {
        (**self).next_uniform()
    }
}

/// A lazily-initialized, thread-local CSPRNG seeded by the operating system.
///
/// Provided by [`rand::rngs::ThreadRng`]. Each thread owns its generator, so no locking happens on the request path,
/// and generators are never reseeded by us.
#[derive(Clone, Copy, Debug, Default)]
pub struct ThreadLocalRandom;

impl RandomSource for ThreadLocalRandom {
    fn next_uniform(&self) -> f64 {
        rand::rng().random::<f64>()
    }
}

/// A deterministic generator seeded from a fixed value.
///
/// The generator is shared behind a mutex, so concurrent callers observe a single interleaved sequence. Useful for
/// reproducing an exact sequence of outcomes across runs.
pub struct SeededRandom {
    seed: u64,
    rng: Mutex<StdRng>,
}

impl SeededRandom {
    /// Creates a new `SeededRandom` from the given seed.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Returns the seed this generator was created with.
    pub fn seed(&self) -> u64 {
        self.seed
    }
}

impl fmt::Debug for SeededRandom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SeededRandom").field("seed", &self.seed).finish()
    }
}

impl RandomSource for SeededRandom {
    fn next_uniform(&self) -> f64 {
        // A poisoned lock only means another caller panicked mid-draw; the generator state itself is still usable.
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        rng.random::<f64>()
    }
}

/// Replays a fixed list of values, wrapping around once exhausted.
///
/// Values are returned as-is, so this source can be used to pin exact boundary values.
#[derive(Debug)]
pub struct SequenceRandom {
    values: Vec<f64>,
    next: AtomicUsize,
}

impl SequenceRandom {
    /// Creates a new `SequenceRandom` that replays `values`.
    ///
    /// If `values` is empty, `0.0` is returned for every draw.
    pub fn new<I>(values: I) -> Self
    where
        I: IntoIterator<Item = f64>,
    {
        Self {
            values: values.into_iter().collect(),
            next: AtomicUsize::new(0),
        }
    }
}

impl RandomSource for SequenceRandom {
    fn next_uniform(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }

        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.values.len();
        self.values[idx]
    }
}

/// A cheaply-cloneable, type-erased random source.
#[derive(Clone)]
pub struct SharedRandomSource(Arc<dyn RandomSource>);

impl SharedRandomSource {
    /// Wraps the given random source.
    pub fn new<R>(source: R) -> Self
    where
        R: RandomSource + 'static,
    {
        Self(Arc::new(source))
    }
}

impl Default for SharedRandomSource {
    fn default() -> Self {
        Self::new(ThreadLocalRandom)
    }
}

impl fmt::Debug for SharedRandomSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SharedRandomSource").finish()
    }
}

impl RandomSource for SharedRandomSource {
    fn next_uniform(&self) -> f64 {
        self.0.next_uniform()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thread_local_is_in_range() {
        let source = ThreadLocalRandom;
        for _ in 0..10_000 {
            let value = source.next_uniform();
            assert!((0.0..1.0).contains(&value));
        }
    }

    #[test]
    fn seeded_is_reproducible() {
        let a = SeededRandom::new(0xdead_beef);
        let b = SeededRandom::new(0xdead_beef);
        let c = SeededRandom::new(7);

        let seq_a = (0..100).map(|_| a.next_uniform()).collect::<Vec<_>>();
        let seq_b = (0..100).map(|_| b.next_uniform()).collect::<Vec<_>>();
        let seq_c = (0..100).map(|_| c.next_uniform()).collect::<Vec<_>>();

        assert_eq!(seq_a, seq_b);
        assert_ne!(seq_a, seq_c);
        assert!(seq_a.iter().all(|v| (0.0..1.0).contains(v)));
    }

    #[test]
    fn sequence_wraps() {
        let source = SequenceRandom::new([0.1, 0.5, 0.9]);
        let drawn = (0..5).map(|_| source.next_uniform()).collect::<Vec<_>>();
        assert_eq!(drawn, vec![0.1, 0.5, 0.9, 0.1, 0.5]);

        let empty = SequenceRandom::new(Vec::new());
        assert_eq!(empty.next_uniform(), 0.0);
    }

    #[test]
    fn shared_source_is_shared() {
        let shared = SharedRandomSource::new(SequenceRandom::new([0.25, 0.75]));
        let cloned = shared.clone();

        assert_eq!(shared.next_uniform(), 0.25);
        assert_eq!(cloned.next_uniform(), 0.75);
    }
}
