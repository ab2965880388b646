//! Pipeline configuration, loaded from JSON.

use crate::constants::SAMPLE_RATE;
use crate::error::{Result, TtsError};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

/// Largest embedding cache the pipeline will allocate.
pub const MAX_CACHE_CAPACITY: usize = 4096;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub normalize: bool,
    pub normalization_peak: f32,
    pub trim_silence: bool,
    pub silence_block_size: usize,
    pub silence_threshold: f32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
            normalize: true,
            normalization_peak: 0.95,
            trim_silence: true,
            silence_block_size: 512,
            silence_threshold: 0.002,
        }
    }
}

/// Default generation parameters applied to new requests.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationDefaults {
    pub sdp_ratio: f32,
    pub noise_scale: f32,
    pub noise_scale_w: f32,
    pub length_scale: f32,
}

impl Default for GenerationDefaults {
    fn default() -> Self {
        Self {
            sdp_ratio: 0.2,
            noise_scale: 0.6,
            noise_scale_w: 0.8,
            length_scale: 1.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// OpenJTalk dictionary directory.
    pub dictionary_path: Option<PathBuf>,
    /// Explicit path to the OpenJTalk wrapper library.
    pub phonemizer_library: Option<PathBuf>,
    pub vocab_path: Option<PathBuf>,
    pub style_vector_path: Option<PathBuf>,
    /// Model `config.json` carrying a `symbols` array.
    pub symbols_config_path: Option<PathBuf>,
    pub audio: AudioConfig,
    pub generation: GenerationDefaults,
    pub enable_warmup: bool,
    pub embedding_cache_capacity: usize,
    /// Worker threads for CPU stages; 0 uses the global rayon pool.
    pub cpu_threads: usize,
    /// 0 = unlimited.
    pub max_text_chars: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            dictionary_path: None,
            phonemizer_library: None,
            vocab_path: None,
            style_vector_path: None,
            symbols_config_path: None,
            audio: AudioConfig::default(),
            generation: GenerationDefaults::default(),
            enable_warmup: true,
            embedding_cache_capacity: 64,
            cpu_threads: 0,
            max_text_chars: 0,
        }
    }
}

impl PipelineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|err| {
            TtsError::Config(format!("Failed to open config {:?}: {}", path, err))
        })?;
        let config: Self = serde_json::from_reader(BufReader::new(file))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let audio = &self.audio;
        if audio.sample_rate == 0 {
            return Err(TtsError::Config("sample_rate must be positive".to_string()));
        }
        if !(audio.normalization_peak > 0.0 && audio.normalization_peak <= 1.0) {
            return Err(TtsError::Config(format!(
                "normalization_peak must be in (0, 1], got {}",
                audio.normalization_peak
            )));
        }
        if audio.silence_block_size == 0 {
            return Err(TtsError::Config("silence_block_size must be positive".to_string()));
        }
        if audio.silence_threshold < 0.0 {
            return Err(TtsError::Config("silence_threshold must not be negative".to_string()));
        }
        if self.embedding_cache_capacity > MAX_CACHE_CAPACITY {
            return Err(TtsError::Config(format!(
                "embedding_cache_capacity {} exceeds {}",
                self.embedding_cache_capacity, MAX_CACHE_CAPACITY
            )));
        }
        if self.generation.length_scale <= 0.0 {
            return Err(TtsError::Config("length_scale must be positive".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn defaults_are_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.audio.sample_rate, 44_100);
        assert_eq!(config.embedding_cache_capacity, 64);
        assert_eq!(config.generation.noise_scale_w, 0.8);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"vocab_path": "vocab.json", "audio": {{"normalization_peak": 0.8}}, "enable_warmup": false}}"#
        )
        .unwrap();
        let config = PipelineConfig::load(file.path()).unwrap();
        assert_eq!(config.vocab_path, Some(PathBuf::from("vocab.json")));
        assert_eq!(config.audio.normalization_peak, 0.8);
        assert_eq!(config.audio.silence_block_size, 512);
        assert!(!config.enable_warmup);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut config = PipelineConfig::default();
        config.audio.normalization_peak = 1.5;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.embedding_cache_capacity = MAX_CACHE_CAPACITY + 1;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.audio.silence_block_size = 0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.generation.length_scale = 0.0;
        assert!(config.validate().is_err());
    }
}
