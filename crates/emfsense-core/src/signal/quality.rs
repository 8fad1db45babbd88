//! Depth confidence and signal quality scoring
//!
//! Depth confidence is the product of three independent factors:
//! signal strength, carrier band and depth plausibility. Quality blends a
//! self-noise SNR estimate, phase stability and the same carrier weight.

/// Magnitude thresholds and the signal factor at or above each
const SIGNAL_STEPS: [(f64, f64); 4] = [(1000.0, 1.0), (500.0, 0.8), (100.0, 0.6), (10.0, 0.4)];

/// SNR (dB) that maps to a full SNR factor
const FULL_SCALE_SNR_DB: f64 = 40.0;

/// Phase spread (degrees) at which stability halves
const PHASE_SPREAD_SCALE_DEG: f64 = 10.0;

const QUALITY_SNR_WEIGHT: f64 = 0.5;
const QUALITY_PHASE_WEIGHT: f64 = 0.3;
const QUALITY_FREQUENCY_WEIGHT: f64 = 0.2;

/// Step function over the magnitude
pub fn signal_strength_factor(magnitude: f64) -> f64 {
    if magnitude.is_nan() || magnitude <= 0.0 {
        return 0.0;
    }
    SIGNAL_STEPS
        .iter()
        .find(|(threshold, _)| magnitude >= *threshold)
        .map(|&(_, factor)| factor)
        .unwrap_or(0.2)
}

/// 1.0 in the 70–80 kHz band, 0.8 in 20–130 kHz, 0.6 elsewhere
pub fn frequency_factor(frequency_hz: f64) -> f64 {
    if (70_000.0..=80_000.0).contains(&frequency_hz) {
        1.0
    } else if (20_000.0..=130_000.0).contains(&frequency_hz) {
        0.8
    } else {
        0.6
    }
}

/// 1.0 for 0.1–10 m, degrading outside that band
pub fn depth_plausibility_factor(depth_meters: f64) -> f64 {
    if depth_meters.is_nan() {
        0.0
    } else if depth_meters < 0.1 {
        0.5
    } else if depth_meters <= 10.0 {
        1.0
    } else if depth_meters <= 20.0 {
        // linear fall from 1.0 at 10 m to 0.5 at 20 m
        1.0 - (depth_meters - 10.0) / 20.0
    } else {
        0.3
    }
}

/// Combined depth confidence, clamped to [0, 1]
pub fn depth_confidence(magnitude: f64, frequency_hz: f64, depth_meters: f64) -> f64 {
    (signal_strength_factor(magnitude)
        * frequency_factor(frequency_hz)
        * depth_plausibility_factor(depth_meters))
    .clamp(0.0, 1.0)
}

/// Self-noise estimate of a magnitude (shot-noise model)
pub fn noise_level(magnitude: f64) -> f64 {
    if magnitude > 0.0 {
        magnitude.sqrt()
    } else {
        0.0
    }
}

/// Signal-to-self-noise ratio in dB
pub fn snr_db(magnitude: f64) -> f64 {
    let noise = noise_level(magnitude);
    if noise > 0.0 {
        20.0 * (magnitude / noise).log10()
    } else {
        0.0
    }
}

/// Phase stability over a window of phase angles (degrees)
///
/// Uses the RMS deviation from the circular mean so that windows straddling
/// ±180° are not penalised. Returns 1.0 for fewer than two phases.
pub fn phase_stability(phases: &[f64]) -> f64 {
    if phases.len() < 2 {
        return 1.0;
    }

    let (sin_sum, cos_sum) = phases.iter().fold((0.0, 0.0), |(s, c), p| {
        let r = p.to_radians();
        (s + r.sin(), c + r.cos())
    });
    let mean = sin_sum.atan2(cos_sum).to_degrees();

    let variance = phases
        .iter()
        .map(|p| {
            let d = wrap_degrees(p - mean);
            d * d
        })
        .sum::<f64>()
        / phases.len() as f64;

    1.0 / (1.0 + variance.sqrt() / PHASE_SPREAD_SCALE_DEG)
}

/// Overall quality score, clamped to [0, 1]
pub fn quality_score(magnitude: f64, frequency_hz: f64, phase_stability: f64) -> f64 {
    let snr_factor = (snr_db(magnitude) / FULL_SCALE_SNR_DB).clamp(0.0, 1.0);
    let score = QUALITY_SNR_WEIGHT * snr_factor
        + QUALITY_PHASE_WEIGHT * phase_stability.clamp(0.0, 1.0)
        + QUALITY_FREQUENCY_WEIGHT * frequency_factor(frequency_hz);
    score.clamp(0.0, 1.0)
}

fn wrap_degrees(angle: f64) -> f64 {
    let wrapped = (angle + 180.0).rem_euclid(360.0) - 180.0;
    if wrapped == -180.0 {
        180.0
    } else {
        wrapped
    }
}
