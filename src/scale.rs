//! Scale filtering
//!
//! The global scale is kept as a sorted, deduplicated list of MIDI pitches.
//! Registers split that list by index: `low` takes the first `ceil(n/2)`
//! pitches and `high` the last `ceil(n/2)`, so an odd-length scale shares its
//! middle pitch between both halves and a non-empty scale never leaves a
//! register empty.

use crate::voice::Register;

/// C major pentatonic around middle C
pub const DEFAULT_SCALE: [u8; 5] = [60, 62, 64, 67, 69];

/// Candidate pitches for a register. Empty scale always yields nothing.
pub fn select_candidates(scale: &[u8], register: Register) -> &[u8] {
    let n = scale.len();
    let half = n.div_ceil(2);
    match register {
        Register::All => scale,
        Register::Low => &scale[..half],
        Register::High => &scale[n - half..],
    }
}

/// Sort, deduplicate and clamp raw pitch values into a usable scale
pub fn normalize<I>(pitches: I) -> Vec<u8>
where
    I: IntoIterator<Item = i64>,
{
    let mut scale: Vec<u8> = pitches
        .into_iter()
        .map(|p| p.clamp(0, 127) as u8)
        .collect();
    scale.sort_unstable();
    scale.dedup();
    scale
}
