//! Linear 16-bit little-endian PCM, the only wire encoding.

/// Quantize float samples to PCM16LE bytes.
///
/// Samples are clamped to [-1, 1]; negative values scale by 32768 and
/// non-negative values by 32767, then truncate toward zero.
#[must_use]
pub fn encode_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let clamped = sample.clamp(-1.0, 1.0);
        let value = if clamped < 0.0 {
            (clamped * 32768.0) as i16
        } else {
            (clamped * f32::from(i16::MAX)) as i16
        };
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Decode PCM16LE bytes to floats. A trailing odd byte is ignored.
#[must_use]
pub fn decode_pcm16(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|pair| f32::from(i16::from_le_bytes([pair[0], pair[1]])) / 32768.0)
        .collect()
}
