//! Media file validation
//!
//! Gates run in order and the first failure wins:
//! 1. existence and size
//! 2. extension allow-list
//! 3. tag/property extraction
//! 4. stream bounds (duration, sample rate, channels, bitrate, artwork)
//! 5. corruption probe (magic bytes plus a minimal decode)
//!
//! Each gate maps to one quarantine reason. On success the extracted
//! metadata is handed back so later stages do not read the file again.

use stacks_common::config::ValidatorConfig;
use stacks_common::db::QuarantineReason;
use std::fmt;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use thiserror::Error;

use crate::models::media::lowercase_extension;
use crate::models::{AudioFormat, MediaMetadata};
use crate::services::metadata_extractor::{MetadataError, MetadataExtractor};

/// Bytes read at each end of a file nobody can decode
const EDGE_BLOCK: u64 = 4096;
/// Packets tried before the decode probe gives up
const MAX_PROBE_PACKETS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationGate {
    Existence,
    Extension,
    Extraction,
    Bounds,
    Corruption,
}

impl fmt::Display for ValidationGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValidationGate::Existence => "existence",
            ValidationGate::Extension => "extension",
            ValidationGate::Extraction => "extraction",
            ValidationGate::Bounds => "bounds",
            ValidationGate::Corruption => "corruption",
        };
        f.write_str(name)
    }
}

/// First gate a file failed, with the quarantine reason it maps to
#[derive(Debug, Clone, Error)]
#[error("{gate} check failed for {}: {message}", .path.display())]
pub struct ValidationFailure {
    pub path: PathBuf,
    pub gate: ValidationGate,
    pub reason: QuarantineReason,
    pub message: String,
}

impl ValidationFailure {
    fn new(path: &Path, gate: ValidationGate, message: impl Into<String>) -> Self {
        let reason = match gate {
            ValidationGate::Existence | ValidationGate::Bounds => QuarantineReason::ValidationFailed,
            ValidationGate::Extension => QuarantineReason::UnsupportedContainer,
            ValidationGate::Extraction | ValidationGate::Corruption => QuarantineReason::TagParseError,
        };
        Self {
            path: path.to_path_buf(),
            gate,
            reason,
            message: message.into(),
        }
    }
}

/// Validator service
#[derive(Debug, Clone)]
pub struct MediaFileValidator {
    config: Arc<ValidatorConfig>,
    extractor: MetadataExtractor,
}

impl MediaFileValidator {
    pub fn new(config: ValidatorConfig) -> Self {
        Self {
            config: Arc::new(config),
            extractor: MetadataExtractor::new(),
        }
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    /// Run every gate on a blocking thread
    pub async fn validate(&self, path: &Path) -> Result<MediaMetadata, ValidationFailure> {
        let this = self.clone();
        let owned = path.to_path_buf();
        tokio::task::spawn_blocking(move || this.validate_blocking(&owned))
            .await
            .unwrap_or_else(|e| {
                Err(ValidationFailure::new(
                    path,
                    ValidationGate::Extraction,
                    format!("validation task failed: {}", e),
                ))
            })
    }

    /// Run every gate on the current thread
    pub fn validate_blocking(&self, path: &Path) -> Result<MediaMetadata, ValidationFailure> {
        self.check_existence(path)?;
        self.check_extension(path)?;

        let metadata = self.extractor.extract(path).map_err(|e| {
            let message = match e {
                MetadataError::ReadError(msg) => msg,
                MetadataError::IoError(err) => err.to_string(),
            };
            ValidationFailure::new(path, ValidationGate::Extraction, message)
        })?;

        self.check_bounds(&metadata)
            .map_err(|msg| ValidationFailure::new(path, ValidationGate::Bounds, msg))?;

        probe_corruption(path, metadata.format)
            .map_err(|msg| ValidationFailure::new(path, ValidationGate::Corruption, msg))?;

        tracing::debug!(path = %path.display(), format = metadata.format.as_str(), "File passed validation");
        Ok(metadata)
    }

    fn check_existence(&self, path: &Path) -> Result<(), ValidationFailure> {
        let fail = |msg: String| ValidationFailure::new(path, ValidationGate::Existence, msg);

        let meta = std::fs::metadata(path).map_err(|e| fail(format!("cannot stat file: {}", e)))?;
        if !meta.is_file() {
            return Err(fail("not a regular file".to_string()));
        }
        if meta.len() == 0 {
            return Err(fail("file is empty".to_string()));
        }
        if meta.len() > self.config.max_file_size_bytes {
            return Err(fail(format!(
                "file is {} bytes (max {})",
                meta.len(),
                self.config.max_file_size_bytes
            )));
        }
        Ok(())
    }

    fn check_extension(&self, path: &Path) -> Result<(), ValidationFailure> {
        match lowercase_extension(path) {
            Some(ext) if self.config.allowed_extensions.iter().any(|a| a.eq_ignore_ascii_case(&ext)) => Ok(()),
            Some(ext) => Err(ValidationFailure::new(
                path,
                ValidationGate::Extension,
                format!("extension '{}' is not supported", ext),
            )),
            None => Err(ValidationFailure::new(path, ValidationGate::Extension, "file has no extension")),
        }
    }

    fn check_bounds(&self, m: &MediaMetadata) -> Result<(), String> {
        let c = &self.config;

        if m.duration_secs < c.min_duration_secs || m.duration_secs > c.max_duration_secs {
            return Err(format!(
                "duration {:.2}s outside {:.2}..={:.2}s",
                m.duration_secs, c.min_duration_secs, c.max_duration_secs
            ));
        }

        let sample_rate = m.sample_rate.ok_or("sample rate unknown")?;
        if sample_rate < c.min_sample_rate || sample_rate > c.max_sample_rate {
            return Err(format!(
                "sample rate {} Hz outside {}..={} Hz",
                sample_rate, c.min_sample_rate, c.max_sample_rate
            ));
        }

        let channels = m.channels.ok_or("channel count unknown")?;
        if channels < c.min_channels || channels > c.max_channels {
            return Err(format!(
                "{} channels outside {}..={}",
                channels, c.min_channels, c.max_channels
            ));
        }

        if m.format.is_lossless() {
            if let Some(bitrate) = m.bitrate_kbps {
                if bitrate < c.min_bitrate_kbps {
                    return Err(format!("bitrate {} kbps below {} kbps", bitrate, c.min_bitrate_kbps));
                }
            }
        } else {
            let bitrate = m.bitrate_kbps.ok_or("bitrate unknown")?;
            if bitrate < c.min_bitrate_kbps || bitrate > c.max_lossy_bitrate_kbps {
                return Err(format!(
                    "bitrate {} kbps outside {}..={} kbps",
                    bitrate, c.min_bitrate_kbps, c.max_lossy_bitrate_kbps
                ));
            }
        }

        if m.largest_artwork_bytes > c.max_artwork_bytes {
            return Err(format!(
                "embedded artwork is {} bytes (max {})",
                m.largest_artwork_bytes, c.max_artwork_bytes
            ));
        }

        Ok(())
    }
}

/// Cheap structural check that the payload is what the tags claim
fn probe_corruption(path: &Path, format: AudioFormat) -> Result<(), String> {
    let header = read_header(path, 64).map_err(|e| format!("cannot read header: {}", e))?;

    if !magic_matches(format, &header) {
        let detected = infer::get(&header).map(|k| k.mime_type()).unwrap_or("unknown");
        return Err(format!(
            "header does not look like {} (detected {})",
            format.as_str(),
            detected
        ));
    }

    match format {
        AudioFormat::Wav => {
            check_riff_length(path, &header)?;
            decode_first_packet(path)
        }
        AudioFormat::Mp3 | AudioFormat::Flac | AudioFormat::Vorbis | AudioFormat::Aac | AudioFormat::Mp4 => {
            decode_first_packet(path)
        }
        _ => read_edge_blocks(path).map_err(|e| format!("cannot read file edges: {}", e)),
    }
}

fn read_header(path: &Path, len: usize) -> std::io::Result<Vec<u8>> {
    let mut file = File::open(path)?;
    let mut buffer = vec![0u8; len];
    let mut filled = 0;
    while filled < len {
        let n = file.read(&mut buffer[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buffer.truncate(filled);
    Ok(buffer)
}

fn is_mpeg_sync(header: &[u8]) -> bool {
    header.len() >= 2 && header[0] == 0xFF && header[1] & 0xE0 == 0xE0
}

fn magic_matches(format: AudioFormat, header: &[u8]) -> bool {
    let mime = infer::get(header).map(|k| k.mime_type());
    match format {
        AudioFormat::Mp3 => mime == Some("audio/mpeg") || header.starts_with(b"ID3") || is_mpeg_sync(header),
        AudioFormat::Aac => mime == Some("audio/aac") || header.starts_with(b"ID3") || is_mpeg_sync(header),
        AudioFormat::Flac => mime == Some("audio/x-flac") || header.starts_with(b"fLaC") || header.starts_with(b"ID3"),
        AudioFormat::Wav => header.starts_with(b"RIFF") && header.get(8..12) == Some(b"WAVE".as_slice()),
        AudioFormat::Vorbis | AudioFormat::Opus => header.starts_with(b"OggS"),
        AudioFormat::Mp4 => header.get(4..8) == Some(b"ftyp".as_slice()),
        AudioFormat::Aiff => header.starts_with(b"FORM"),
        AudioFormat::WavPack => header.starts_with(b"wvpk"),
        AudioFormat::Ape => header.starts_with(b"MAC ") || header.starts_with(b"ID3"),
        AudioFormat::Unknown => true,
    }
}

/// RIFF size field must not promise more bytes than the file holds
fn check_riff_length(path: &Path, header: &[u8]) -> Result<(), String> {
    let Some(size_bytes) = header.get(4..8) else {
        return Err("RIFF header too short".to_string());
    };
    let declared = u32::from_le_bytes([size_bytes[0], size_bytes[1], size_bytes[2], size_bytes[3]]);
    // Streaming writers leave the field at 0 or all ones
    if declared == 0 || declared == u32::MAX {
        return Ok(());
    }

    let actual = std::fs::metadata(path)
        .map_err(|e| format!("cannot stat file: {}", e))?
        .len();
    if u64::from(declared) + 8 > actual {
        return Err(format!(
            "truncated RIFF stream: header declares {} bytes, file has {}",
            u64::from(declared) + 8,
            actual
        ));
    }
    Ok(())
}

/// Decode packets until one succeeds
fn decode_first_packet(path: &Path) -> Result<(), String> {
    let file = File::open(path).map_err(|e| format!("cannot open file: {}", e))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(extension) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(extension);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| format!("container probe failed: {}", e))?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or("no audio track")?;
    let track_id = track.id;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| format!("no decoder: {}", e))?;

    let mut last_error = String::from("no audio packets");
    for _ in 0..MAX_PROBE_PACKETS {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(symphonia::core::errors::Error::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(e) => return Err(format!("packet read failed: {}", e)),
        };
        if packet.track_id() != track_id {
            continue;
        }
        match decoder.decode(&packet) {
            Ok(_) => return Ok(()),
            Err(symphonia::core::errors::Error::DecodeError(msg)) => last_error = msg.to_string(),
            Err(e) => return Err(format!("decode failed: {}", e)),
        }
    }

    Err(last_error)
}

/// Fallback for formats without a decoder: both ends must be readable
fn read_edge_blocks(path: &Path) -> std::io::Result<()> {
    let mut file = File::open(path)?;
    let len = file.metadata()?.len();
    let block = EDGE_BLOCK.min(len) as usize;
    let mut buffer = vec![0u8; block];

    file.read_exact(&mut buffer)?;
    file.seek(SeekFrom::End(-(block as i64)))?;
    file.read_exact(&mut buffer)?;
    Ok(())
}
