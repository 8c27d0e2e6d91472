use std::io::Cursor;

use audiopus::coder::Decoder as OpusDecoder;
use audiopus::{Channels, SampleRate};
use matroska_demuxer::{Frame, MatroskaFile, TrackType};
use tracing::trace;

use crate::{PIPELINE_SAMPLE_RATE, SOURCE_SAMPLE_RATE};

/// 48kHz → 16kHz by keeping every third sample.
const DECIMATION: usize = (SOURCE_SAMPLE_RATE / PIPELINE_SAMPLE_RATE) as usize;

/// Largest Opus frame: 120ms at 48kHz, per channel.
const MAX_OPUS_FRAME: usize = 5760;

/// Incrementally decodes a WebM/Opus byte stream into 16kHz mono f32 PCM.
///
/// The browser's MediaRecorder emits small WebM fragments that are only
/// meaningful as a prefix of the whole stream (the container header arrives
/// once, up front). The decoder therefore accumulates all bytes and re-demuxes
/// the full buffer on every call, slicing off the samples already handed out
/// so each call yields only the new tail.
///
/// Re-decoding from byte zero with a fresh Opus decoder makes the output a
/// pure function of the buffer prefix, which is what guarantees samples are
/// delivered exactly once and in order across calls.
pub struct StreamDecoder {
    buffer: Vec<u8>,
    delivered: usize,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            delivered: 0,
        }
    }

    /// Appends a stream fragment and returns the newly decoded 16kHz mono
    /// samples, normalized to [-1, 1].
    ///
    /// Returns an empty vec when the buffer does not yet demux to anything
    /// new — an incomplete header or a truncated cluster is "not enough data
    /// yet", never an error.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<f32> {
        self.buffer.extend_from_slice(chunk);

        let pcm_48k = match decode_webm_opus(&self.buffer) {
            Ok(pcm) => pcm,
            Err(e) => {
                trace!(buffered = self.buffer.len(), error = %e, "buffer not decodable yet");
                return Vec::new();
            }
        };

        let pcm_16k = decimate(&pcm_48k, DECIMATION);
        if pcm_16k.len() <= self.delivered {
            return Vec::new();
        }
        let fresh = pcm_16k[self.delivered..].to_vec();
        self.delivered = pcm_16k.len();
        fresh
    }

    /// Decodes the full accumulated stream at the source 48kHz rate.
    ///
    /// Used for session archival, where the recording keeps the original
    /// sample rate instead of the decimated pipeline rate.
    pub fn decoded_48k(&self) -> anyhow::Result<Vec<f32>> {
        decode_webm_opus(&self.buffer)
    }

    /// Total bytes accumulated so far.
    pub fn buffered_bytes(&self) -> usize {
        self.buffer.len()
    }
}

impl Default for StreamDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Demuxes a WebM buffer and decodes its first Opus audio track to 48kHz
/// mono f32.
///
/// A demux error at the tail (truncated cluster) ends the frame walk and
/// keeps whatever decoded cleanly before it.
fn decode_webm_opus(buffer: &[u8]) -> anyhow::Result<Vec<f32>> {
    let mut mkv = MatroskaFile::open(Cursor::new(buffer))
        .map_err(|e| anyhow::anyhow!("webm demux: {e}"))?;

    let (track_number, channels) = {
        let track = mkv
            .tracks()
            .iter()
            .find(|t| t.track_type() == TrackType::Audio)
            .ok_or_else(|| anyhow::anyhow!("no audio track in stream"))?;
        if track.codec_id() != "A_OPUS" {
            anyhow::bail!("unsupported audio codec {}", track.codec_id());
        }
        let channels = track
            .audio()
            .map(|a| a.channels().get() as usize)
            .unwrap_or(1)
            .clamp(1, 2);
        (track.track_number().get(), channels)
    };

    let opus_channels = if channels == 1 {
        Channels::Mono
    } else {
        Channels::Stereo
    };
    let mut decoder = OpusDecoder::new(SampleRate::Hz48000, opus_channels)
        .map_err(|e| anyhow::anyhow!("opus decoder: {e}"))?;

    let mut pcm = Vec::new();
    let mut packet_out = vec![0f32; MAX_OPUS_FRAME * channels];
    let mut frame = Frame::default();

    loop {
        match mkv.next_frame(&mut frame) {
            Ok(true) => {}
            Ok(false) => break,
            // Truncated tail: the rest of this cluster arrives later.
            Err(_) => break,
        }
        if frame.track != track_number || frame.data.is_empty() {
            continue;
        }

        let samples = match decoder.decode_float(Some(&frame.data[..]), &mut packet_out[..], false)
        {
            Ok(n) => n,
            Err(e) => {
                trace!(error = %e, "skipping undecodable opus packet");
                continue;
            }
        };

        let interleaved = &packet_out[..samples * channels];
        if channels == 1 {
            pcm.extend_from_slice(interleaved);
        } else {
            pcm.extend(
                interleaved
                    .chunks_exact(channels)
                    .map(|f| f.iter().sum::<f32>() / channels as f32),
            );
        }
    }

    Ok(pcm)
}

fn decimate(pcm: &[f32], stride: usize) -> Vec<f32> {
    pcm.iter().step_by(stride).copied().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn garbage_bytes_yield_empty_output() {
        let mut decoder = StreamDecoder::new();
        assert!(decoder.push(b"definitely not webm").is_empty());
        assert!(decoder.push(&[0xff; 64]).is_empty());
        assert_eq!(decoder.buffered_bytes(), 19 + 64);
    }

    #[test]
    fn empty_chunk_is_a_no_op() {
        let mut decoder = StreamDecoder::new();
        assert!(decoder.push(&[]).is_empty());
        assert_eq!(decoder.buffered_bytes(), 0);
    }

    #[test]
    fn partial_ebml_header_is_not_enough_data() {
        // EBML magic alone, no document
        let mut decoder = StreamDecoder::new();
        assert!(decoder.push(&[0x1a, 0x45, 0xdf, 0xa3]).is_empty());
    }

    #[test]
    fn decimation_keeps_every_third_sample() {
        let pcm: Vec<f32> = (0..12).map(|i| i as f32).collect();
        assert_eq!(decimate(&pcm, 3), vec![0.0, 3.0, 6.0, 9.0]);
    }

    #[test]
    fn decimation_of_short_input() {
        assert_eq!(decimate(&[1.0, 2.0], 3), vec![1.0]);
        assert!(decimate(&[], 3).is_empty());
    }
}
