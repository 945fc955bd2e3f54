//! Deterministic CPU burn used to exercise multi-core scheduling.
//!
//! Enabled by the `MOCK_CPU_LOAD` environment variable. Runs synchronously
//! for a fixed amount of work immediately after `mark_done`, on the calling
//! consumer's task. Deliberately not async: it's meant to occupy a CPU core,
//! not yield to the runtime.

/// Number of digest rounds performed by [`burn`]. Chosen to take on the
/// order of a few milliseconds on a modern core — enough to be visible in a
/// multi-core trace without meaningfully slowing down a single consumer.
const BURN_ROUNDS: u64 = 200_000;

/// Spin the CPU on a deterministic, side-effect-free computation.
pub fn burn() {
    let mut acc: u64 = 0xDEAD_BEEF;
    for i in 0..BURN_ROUNDS {
        acc = acc.wrapping_mul(6364136223846793005).wrapping_add(i);
        acc ^= acc >> 33;
    }
    // Prevent the optimizer from eliding the loop entirely.
    std::hint::black_box(acc);
}
