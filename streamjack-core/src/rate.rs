//! The receiver's rate controller: maps how full a session's `audio_device`
//! ring is, relative to the target `SERVER_BUFFER_SECONDS`, to an effective
//! resampler input rate. Pure function of one ratio, easy to test in
//! isolation from the resampler it drives.

/// `buffered_seconds / T` -> multiplier applied to `samplerate_in` to get
/// the resampler's effective input rate for the next driver step.
pub fn rate_multiplier(buffered_seconds: f64, target_seconds: f64) -> f64 {
    let ratio = buffered_seconds / target_seconds;
    if ratio > 1.4 {
        1.03
    } else if ratio > 1.2 {
        1.01
    } else if ratio < 0.6 {
        0.97
    } else if ratio < 0.8 {
        0.99
    } else {
        1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: f64 = 1.0;

    #[test]
    fn thresholds_match_table() {
        assert_eq!(rate_multiplier(1.41 * T, T), 1.03);
        assert_eq!(rate_multiplier(1.21 * T, T), 1.01);
        assert_eq!(rate_multiplier(1.0 * T, T), 1.0);
        assert_eq!(rate_multiplier(0.8 * T, T), 1.0);
        assert_eq!(rate_multiplier(1.2 * T, T), 1.0);
        assert_eq!(rate_multiplier(0.79 * T, T), 0.99);
        assert_eq!(rate_multiplier(0.6 * T, T), 0.99);
        assert_eq!(rate_multiplier(0.59 * T, T), 0.97);
    }

    /// Simulates the driver's feedback loop directly on `buffered_seconds`,
    /// without a real resampler. The resampler always converts declared
    /// `nominal` input to `device_rate` output exactly, so only *clock
    /// drift* between the declared rate and the true arrival rate moves the
    /// buffer: each step, `step_seconds * (true_rate / (nominal * mult))`
    /// seconds of output are produced against `step_seconds` drained. With
    /// true vs. declared rate within 2%, `buffered_seconds` should settle
    /// into `[0.6T, 1.4T]` and stay there.
    #[test]
    fn converges_and_stays_within_bounds_for_close_rates() {
        let nominal = 48_000.0f64;
        let true_rate = 48_960.0f64; // 2% faster than declared

        let mut buffered_seconds = T; // start at target, already warmed up
        let step_seconds = 0.01; // 10ms steps, like the sender's period

        for step in 0..20_000 {
            let mult = rate_multiplier(buffered_seconds, T);
            let produced_seconds = step_seconds * (true_rate / (nominal * mult));
            buffered_seconds += produced_seconds - step_seconds;
            buffered_seconds = buffered_seconds.max(0.0);

            if step > 2_000 {
                // A bang-bang controller settles into a limit cycle that
                // grazes its own switching thresholds; allow a small margin
                // for that and for floating-point accumulation.
                let margin = 1e-3;
                assert!(
                    (0.6 * T - margin..=1.4 * T + margin).contains(&buffered_seconds),
                    "buffered_seconds {buffered_seconds} left bounds at step {step}"
                );
            }
        }
    }
}
