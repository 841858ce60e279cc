//! Minimal RIFF/WAVE header inspection.
//!
//! Only the header is read: enough to refuse files that are not WAVE audio
//! and to know how long a sample plays.  Decoding is the speaker's business.

use std::time::Duration;

use thiserror::Error;

/// Why a file was refused as a sample.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WavError {
    #[error("file is too short to be a WAVE file")]
    Truncated,
    #[error("missing RIFF/WAVE signature")]
    NotWave,
    #[error("no fmt chunk")]
    MissingFormat,
    #[error("no data chunk")]
    MissingData,
    #[error("byte rate is zero")]
    ZeroByteRate,
}

/// What the header says about a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavInfo {
    pub channels: u16,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    pub data_len: u32,
    pub duration: Duration,
}

fn u16_at(bytes: &[u8], at: usize) -> Option<u16> {
    bytes
        .get(at..at + 2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
}

fn u32_at(bytes: &[u8], at: usize) -> Option<u32> {
    bytes
        .get(at..at + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

/// Walks the RIFF chunks of `bytes` and extracts the format and data length.
pub fn inspect(bytes: &[u8]) -> Result<WavInfo, WavError> {
    if bytes.len() < 12 {
        return Err(WavError::Truncated);
    }
    if &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
        return Err(WavError::NotWave);
    }

    let mut format: Option<(u16, u32, u32, u16)> = None;
    let mut data_len: Option<u32> = None;
    let mut at = 12;

    while let (Some(id), Some(size)) = (bytes.get(at..at + 4), u32_at(bytes, at + 4)) {
        let body = at + 8;
        match id {
            b"fmt " => {
                let channels = u16_at(bytes, body + 2).ok_or(WavError::Truncated)?;
                let sample_rate = u32_at(bytes, body + 4).ok_or(WavError::Truncated)?;
                let byte_rate = u32_at(bytes, body + 8).ok_or(WavError::Truncated)?;
                let bits = u16_at(bytes, body + 14).ok_or(WavError::Truncated)?;
                format = Some((channels, sample_rate, byte_rate, bits));
            }
            b"data" => {
                data_len = Some(size);
                break;
            }
            _ => {}
        }
        // Chunks are padded to an even length.
        at = body
            .saturating_add(size as usize)
            .saturating_add(size as usize & 1);
        if at > bytes.len() {
            break;
        }
    }

    let (channels, sample_rate, byte_rate, bits_per_sample) =
        format.ok_or(WavError::MissingFormat)?;
    let data_len = data_len.ok_or(WavError::MissingData)?;
    if byte_rate == 0 {
        return Err(WavError::ZeroByteRate);
    }

    Ok(WavInfo {
        channels,
        sample_rate,
        bits_per_sample,
        data_len,
        duration: Duration::from_secs_f64(f64::from(data_len) / f64::from(byte_rate)),
    })
}

/// Builds a PCM WAVE file of `data_len` silent bytes.  Used by tests.
pub fn silent_pcm(sample_rate: u32, channels: u16, bits_per_sample: u16, data_len: u32) -> Vec<u8> {
    let block_align = channels * (bits_per_sample / 8);
    let byte_rate = sample_rate * u32::from(block_align);
    let mut out = Vec::with_capacity(44 + data_len as usize);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&channels.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&byte_rate.to_le_bytes());
    out.extend_from_slice(&block_align.to_le_bytes());
    out.extend_from_slice(&bits_per_sample.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    out.resize(44 + data_len as usize, 0);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inspect_reads_pcm_header() {
        // 8 kHz mono 16-bit: 16000 bytes per second
        let bytes = silent_pcm(8000, 1, 16, 8000);

        let info = inspect(&bytes).unwrap();

        assert_eq!(info.channels, 1);
        assert_eq!(info.sample_rate, 8000);
        assert_eq!(info.bits_per_sample, 16);
        assert_eq!(info.data_len, 8000);
        assert_eq!(info.duration, Duration::from_millis(500));
    }

    #[test]
    fn test_inspect_skips_unknown_chunks() {
        // Arrange – insert an odd-sized LIST chunk between fmt and data
        let pcm = silent_pcm(8000, 1, 8, 80);
        let mut bytes = pcm[..36].to_vec();
        bytes.extend_from_slice(b"LIST");
        bytes.extend_from_slice(&3u32.to_le_bytes());
        bytes.extend_from_slice(&[1, 2, 3, 0]);
        bytes.extend_from_slice(&pcm[36..]);

        // Act
        let info = inspect(&bytes).unwrap();

        // Assert
        assert_eq!(info.data_len, 80);
    }

    #[test]
    fn test_inspect_refuses_non_wave_input() {
        assert_eq!(inspect(b"RIFF"), Err(WavError::Truncated));
        assert_eq!(inspect(b"ID3\x03 not a wave file"), Err(WavError::NotWave));
        assert_eq!(
            inspect(b"RIFF\x04\x00\x00\x00WAVE"),
            Err(WavError::MissingFormat)
        );
    }
}
