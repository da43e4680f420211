/// Loudness and speech-presence estimate for one block of samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SignalLevel {
    /// Mean absolute amplitude scaled to 0..=100 for meters.
    pub level: u8,
    pub has_speech: bool,
}

const SPEECH_MEAN_THRESHOLD: f32 = 0.003;
const SPEECH_PEAK_THRESHOLD: f32 = 0.03;
const ACTIVE_SAMPLE_THRESHOLD: f32 = 0.01;
const ACTIVE_RATIO_THRESHOLD: f32 = 0.05;

/// Analyze a block of samples in [-1, 1].
///
/// Speech is assumed when the mean amplitude, the peak, or the share of
/// non-quiet samples crosses its threshold. An empty block is silence.
#[must_use]
pub fn analyze(samples: &[f32]) -> SignalLevel {
    if samples.is_empty() {
        return SignalLevel::default();
    }

    let mut sum = 0.0f32;
    let mut peak = 0.0f32;
    let mut active = 0usize;
    for &s in samples {
        let magnitude = s.abs();
        sum += magnitude;
        peak = peak.max(magnitude);
        if magnitude > ACTIVE_SAMPLE_THRESHOLD {
            active += 1;
        }
    }

    let len = samples.len() as f32;
    let mean = sum / len;
    let active_ratio = active as f32 / len;

    SignalLevel {
        level: (mean * 1000.0).round().min(100.0) as u8,
        has_speech: mean > SPEECH_MEAN_THRESHOLD
            || peak > SPEECH_PEAK_THRESHOLD
            || active_ratio > ACTIVE_RATIO_THRESHOLD,
    }
}
