use rand::Rng;

/// Rolls an independent percentage chance in `[0, 100]`.
///
/// Chance values at or below 0 never succeed, values at or above 100 always
/// do.
#[inline]
pub fn roll_chance<R: Rng>(rng: &mut R, chance: f32) -> bool {
    rng.gen::<f32>() * 100.0 < chance
}

/// Rolls a percentage chance with the thread-local RNG.
#[inline]
pub fn check_chance(chance: f32) -> bool {
    roll_chance(&mut rand::thread_rng(), chance)
}

/// Returns `part / total` as an `f32` fraction, defined as `0.0` when
/// `total` is zero.
#[inline]
pub fn fraction(part: usize, total: usize) -> f32 {
    if total == 0 {
        0.0
    } else {
        part as f32 / total as f32
    }
}

#[allow(non_upper_case_globals)]
pub mod constants {
    pub const KiB: usize = 1024;
    pub const MiB: usize = 1024 * KiB;
}
