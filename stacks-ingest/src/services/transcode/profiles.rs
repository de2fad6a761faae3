//! Built-in transcode profiles

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Target rendition settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscodeProfile {
    pub name: String,
    /// ffmpeg audio encoder (`-c:a`)
    pub codec: String,
    /// Output container / file extension
    pub format: String,
    pub bitrate_kbps: u32,
    pub sample_rate: Option<u32>,
    pub channels: Option<u8>,
}

impl TranscodeProfile {
    fn builtin(name: &str, codec: &str, format: &str, bitrate_kbps: u32, sample_rate: Option<u32>) -> Self {
        Self {
            name: name.to_string(),
            codec: codec.to_string(),
            format: format.to_string(),
            bitrate_kbps,
            sample_rate,
            channels: Some(2),
        }
    }
}

/// Profiles by name
#[derive(Debug, Clone)]
pub struct ProfileRegistry {
    profiles: BTreeMap<String, TranscodeProfile>,
}

impl ProfileRegistry {
    pub fn empty() -> Self {
        Self {
            profiles: BTreeMap::new(),
        }
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        for profile in [
            TranscodeProfile::builtin("mp3_320", "libmp3lame", "mp3", 320, Some(44100)),
            TranscodeProfile::builtin("mp3_192", "libmp3lame", "mp3", 192, Some(44100)),
            TranscodeProfile::builtin("opus_128", "libopus", "opus", 128, Some(48000)),
            TranscodeProfile::builtin("aac_256", "aac", "m4a", 256, Some(44100)),
        ] {
            registry.register(profile);
        }
        registry
    }

    pub fn register(&mut self, profile: TranscodeProfile) {
        self.profiles.insert(profile.name.clone(), profile);
    }

    pub fn get(&self, name: &str) -> Option<&TranscodeProfile> {
        self.profiles.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.profiles.keys().map(String::as_str)
    }
}

impl Default for ProfileRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}
