//! WAV container
//!
//! Minimal RIFF/WAVE composer and parser for wrapping committed PCM before
//! it goes to the transcription service. Only PCM (format code 1) is
//! handled; that is all either side of the pipeline produces.

use anyhow::{bail, Result};

/// PCM format parameters carried in the `fmt ` chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavSpec {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

impl WavSpec {
    pub fn mono_16khz() -> Self {
        Self {
            sample_rate: 16_000,
            channels: 1,
            bits_per_sample: 16,
        }
    }

    pub fn block_align(&self) -> u16 {
        self.channels * self.bits_per_sample / 8
    }

    pub fn byte_rate(&self) -> u32 {
        self.sample_rate * self.block_align() as u32
    }
}

const HEADER_LEN: usize = 44;

/// Wrap raw PCM bytes in a RIFF/WAVE container
pub fn encode(pcm: &[u8], spec: WavSpec) -> Vec<u8> {
    let data_len = pcm.len() as u32;
    let mut out = Vec::with_capacity(HEADER_LEN + pcm.len());

    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");

    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes()); // fmt chunk size
    out.extend_from_slice(&1u16.to_le_bytes()); // PCM
    out.extend_from_slice(&spec.channels.to_le_bytes());
    out.extend_from_slice(&spec.sample_rate.to_le_bytes());
    out.extend_from_slice(&spec.byte_rate().to_le_bytes());
    out.extend_from_slice(&spec.block_align().to_le_bytes());
    out.extend_from_slice(&spec.bits_per_sample.to_le_bytes());

    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    out.extend_from_slice(pcm);

    out
}

/// Parse a WAV header, returning the format spec and the byte offset and
/// length of the PCM data chunk.
pub fn parse(bytes: &[u8]) -> Result<(WavSpec, usize, usize)> {
    if bytes.len() < HEADER_LEN {
        bail!("WAV too short: {} bytes", bytes.len());
    }
    if &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
        bail!("not a RIFF/WAVE file");
    }

    let mut pos = 12;
    let mut spec: Option<WavSpec> = None;

    while pos + 8 <= bytes.len() {
        let id = &bytes[pos..pos + 4];
        let size = u32::from_le_bytes([bytes[pos + 4], bytes[pos + 5], bytes[pos + 6], bytes[pos + 7]])
            as usize;
        let body = pos + 8;

        match id {
            b"fmt " => {
                if size < 16 || body + 16 > bytes.len() {
                    bail!("fmt chunk truncated");
                }
                let format = u16::from_le_bytes([bytes[body], bytes[body + 1]]);
                if format != 1 {
                    bail!("unsupported WAV format code {}", format);
                }
                spec = Some(WavSpec {
                    channels: u16::from_le_bytes([bytes[body + 2], bytes[body + 3]]),
                    sample_rate: u32::from_le_bytes([
                        bytes[body + 4],
                        bytes[body + 5],
                        bytes[body + 6],
                        bytes[body + 7],
                    ]),
                    bits_per_sample: u16::from_le_bytes([bytes[body + 14], bytes[body + 15]]),
                });
            }
            b"data" => {
                let spec = spec.ok_or_else(|| anyhow::anyhow!("data chunk before fmt"))?;
                if body + size > bytes.len() {
                    bail!("data chunk claims {} bytes past end", size);
                }
                return Ok((spec, body, size));
            }
            _ => {}
        }

        // Chunks are word-aligned
        pos = body + size + (size & 1);
    }

    bail!("no data chunk found")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_recovers_format() {
        let pcm: Vec<u8> = (0..640u32).map(|i| (i % 251) as u8).collect();
        let spec = WavSpec::mono_16khz();
        let wav = encode(&pcm, spec);

        let (parsed, offset, len) = parse(&wav).unwrap();
        assert_eq!(parsed, spec);
        assert_eq!(len, pcm.len());
        assert_eq!(&wav[offset..offset + len], &pcm[..]);
    }

    #[test]
    fn test_header_fields() {
        let spec = WavSpec::mono_16khz();
        let wav = encode(&[0u8; 100], spec);

        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(wav.len(), 144);
        // byte rate = 16000 * 1 * 16/8 = 32000
        assert_eq!(spec.byte_rate(), 32_000);
        assert_eq!(spec.block_align(), 2);
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(parse(b"nope").is_err());
        assert!(parse(&[0u8; 64]).is_err());

        // Non-PCM format code
        let mut wav = encode(&[0u8; 4], WavSpec::mono_16khz());
        wav[20] = 3; // IEEE float
        assert!(parse(&wav).is_err());
    }

    #[test]
    fn test_empty_data_chunk() {
        let wav = encode(&[], WavSpec::mono_16khz());
        let (_, _, len) = parse(&wav).unwrap();
        assert_eq!(len, 0);
    }
}
