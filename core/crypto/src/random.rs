//! CSPRNG access.

use rand::rngs::OsRng;
use rand::RngCore;

/// Fill a fixed-size array from the operating system CSPRNG.
pub fn random_array<const N: usize>() -> [u8; N] {
    let mut out = [0u8; N];
    OsRng.fill_bytes(&mut out);
    out
}

/// Handle to the operating system CSPRNG, for primitives that take an RNG.
pub fn os_rng() -> OsRng {
    OsRng
}
