//! Output post-processing and WAV writing.

use crate::config::AudioConfig;
use crate::error::{Result, TtsError};
use hound::{SampleFormat, WavSpec, WavWriter};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

/// Scale so the loudest sample has magnitude `target`. Silence is untouched.
pub fn normalize_peak(samples: &mut [f32], target: f32) {
    let peak = samples.iter().fold(0.0f32, |acc, &s| acc.max(s.abs()));
    if peak > 0.0 {
        let gain = target / peak;
        samples.iter_mut().for_each(|s| *s *= gain);
    }
}

/// Drop trailing blocks whose peak does not exceed `threshold`.
///
/// Only whole blocks are inspected; block 0 is always kept, and inputs with
/// fewer than two whole blocks are returned unchanged.
pub fn trim_trailing_silence(samples: &[f32], block_size: usize, threshold: f32) -> &[f32] {
    if block_size == 0 {
        return samples;
    }
    let total_blocks = samples.len() / block_size;
    if total_blocks <= 1 {
        return samples;
    }

    let mut last_kept = 0;
    for block in (1..total_blocks).rev() {
        let start = block * block_size;
        let peak = samples[start..start + block_size]
            .iter()
            .fold(0.0f32, |acc, &s| acc.max(s.abs()));
        if peak > threshold {
            last_kept = block;
            break;
        }
    }

    let end = (last_kept + 1) * block_size;
    if end >= samples.len() {
        samples
    } else {
        &samples[..end]
    }
}

/// Normalize then trim, as configured.
pub fn post_process(mut samples: Vec<f32>, config: &AudioConfig) -> Vec<f32> {
    if config.normalize {
        normalize_peak(&mut samples, config.normalization_peak);
    }
    if config.trim_silence {
        let kept = trim_trailing_silence(
            &samples,
            config.silence_block_size,
            config.silence_threshold,
        )
        .len();
        samples.truncate(kept);
    }
    samples
}

/// Every sample is finite and within [-1, 1].
pub fn validate_sample_range(samples: &[f32]) -> bool {
    samples.iter().all(|s| s.is_finite() && (-1.0..=1.0).contains(s))
}

/// Write mono 16-bit PCM. Samples are clamped to [-1, 1]; NaN becomes silence.
pub fn save_wav(samples: &[f32], path: &Path, sample_rate: u32) -> Result<()> {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::new(BufWriter::new(File::create(path)?), spec).map_err(wav_error)?;
    for &sample in samples {
        writer.write_sample(to_pcm16(sample)).map_err(wav_error)?;
    }
    writer.finalize().map_err(wav_error)?;
    tracing::debug!(path = ?path, samples = samples.len(), sample_rate, "Wrote WAV");
    Ok(())
}

fn to_pcm16(sample: f32) -> i16 {
    if sample.is_nan() {
        0
    } else {
        (sample.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16
    }
}

fn wav_error(err: hound::Error) -> TtsError {
    match err {
        hound::Error::IoError(err) => TtsError::Io(err),
        other => TtsError::UnsupportedFormat(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn wav_holds_clamped_pcm16() {
        let file = NamedTempFile::new().unwrap();
        save_wav(&[0.0, -0.5, 2.0, f32::NAN, -3.0], file.path(), 44_100).unwrap();

        let mut reader = hound::WavReader::open(file.path()).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.sample_rate, 44_100);
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.bits_per_sample, 16);
        let pcm: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(pcm, vec![0, -16384, 32767, 0, -32767]);
    }

    #[test]
    fn unwritable_path_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("no-such-dir").join("out.wav");
        assert!(matches!(save_wav(&[0.1], &missing, 44_100), Err(TtsError::Io(_))));
    }

    #[test]
    fn peak_normalization() {
        let mut samples = vec![0.1, -0.5, 0.25];
        normalize_peak(&mut samples, 0.95);
        assert!((samples[1] + 0.95).abs() < 1e-6);
        assert!((samples[0] - 0.19).abs() < 1e-6);

        let mut silent = vec![0.0; 4];
        normalize_peak(&mut silent, 0.95);
        assert!(silent.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn trims_whole_silent_blocks() {
        let mut samples = vec![0.5; 512];
        samples.extend(vec![0.001; 1024]);
        let trimmed = trim_trailing_silence(&samples, 512, 0.002);
        assert_eq!(trimmed.len(), 512);
    }

    #[test]
    fn keeps_block_zero_even_if_silent() {
        let samples = vec![0.0; 2048];
        assert_eq!(trim_trailing_silence(&samples, 512, 0.002).len(), 512);
    }

    #[test]
    fn short_input_is_unchanged() {
        let samples = vec![0.0; 700];
        assert_eq!(trim_trailing_silence(&samples, 512, 0.002).len(), 700);
    }

    #[test]
    fn partial_tail_is_cut_at_block_boundary() {
        let mut samples = vec![0.0; 512];
        samples.extend(vec![0.5; 512]);
        samples.extend(vec![0.0; 100]);
        assert_eq!(trim_trailing_silence(&samples, 512, 0.002).len(), 1024);

        // Nothing silent to drop: the input comes back whole.
        let loud = vec![0.5; 1024];
        assert_eq!(trim_trailing_silence(&loud, 512, 0.002).len(), 1024);
    }

    #[test]
    fn post_process_applies_both() {
        let mut samples = vec![0.5; 512];
        samples.extend(vec![0.0; 1024]);
        let out = post_process(samples, &AudioConfig::default());
        assert_eq!(out.len(), 512);
        assert!((out[0] - 0.95).abs() < 1e-6);
        assert!(validate_sample_range(&out));
        assert!(!validate_sample_range(&[1.5]));
    }
}
