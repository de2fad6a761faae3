//! Audio test fixture generator

use std::path::{Path, PathBuf};

/// Configuration for generated audio
#[derive(Debug, Clone)]
pub struct AudioConfig {
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub channels: u16,
    /// Tone frequency; different values give different content hashes
    pub frequency: f32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            duration_seconds: 1.5,
            sample_rate: 44100,
            channels: 2,
            frequency: 440.0,
        }
    }
}

impl AudioConfig {
    pub fn tone(frequency: f32) -> Self {
        Self {
            frequency,
            ..Self::default()
        }
    }
}

/// Write a 16-bit PCM sine tone
pub fn generate_test_wav(path: &Path, config: &AudioConfig) -> anyhow::Result<PathBuf> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let spec = hound::WavSpec {
        channels: config.channels,
        sample_rate: config.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = hound::WavWriter::create(path, spec)?;
    let total_samples = (config.duration_seconds * config.sample_rate as f64) as usize;

    for i in 0..total_samples {
        let t = i as f32 / config.sample_rate as f32;
        let sample = (0.3 * (2.0 * std::f32::consts::PI * config.frequency * t).sin() * i16::MAX as f32) as i16;
        for _ in 0..config.channels {
            writer.write_sample(sample)?;
        }
    }

    writer.finalize()?;
    Ok(path.to_path_buf())
}

/// A WAV cut to two thirds of its length
pub fn generate_truncated_wav(path: &Path) -> anyhow::Result<PathBuf> {
    generate_test_wav(
        path,
        &AudioConfig {
            duration_seconds: 3.0,
            ..AudioConfig::default()
        },
    )?;
    let bytes = std::fs::read(path)?;
    std::fs::write(path, &bytes[..bytes.len() * 2 / 3])?;
    Ok(path.to_path_buf())
}
