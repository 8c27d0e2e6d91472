use std::io::Cursor;
use std::path::Path;

/// Writes mono f32 samples as a 16-bit PCM WAV file.
pub fn write_mono_16bit(
    path: impl AsRef<Path>,
    samples: &[f32],
    sample_rate: u32,
) -> anyhow::Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path.as_ref(), spec).map_err(|e| {
        anyhow::anyhow!("failed to create WAV '{}': {}", path.as_ref().display(), e)
    })?;
    for &sample in samples {
        writer.write_sample(f32_to_i16_sample(sample))?;
    }
    writer.finalize()?;
    Ok(())
}

/// Writes mono i16 samples as a 16-bit PCM WAV file.
pub fn write_mono_i16(
    path: impl AsRef<Path>,
    samples: &[i16],
    sample_rate: u32,
) -> anyhow::Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path.as_ref(), spec).map_err(|e| {
        anyhow::anyhow!("failed to create WAV '{}': {}", path.as_ref().display(), e)
    })?;
    for &sample in samples {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;
    Ok(())
}

/// Playback duration of an in-memory WAV blob, in milliseconds.
///
/// Drives the echo-suppression lockout applied after TTS delivery.
pub fn wav_duration_ms(bytes: &[u8]) -> anyhow::Result<u64> {
    let reader = hound::WavReader::new(Cursor::new(bytes))?;
    let spec = reader.spec();
    let frames = reader.duration() as u64;
    Ok(frames * 1000 / spec.sample_rate as u64)
}

/// Extracts mono i16 PCM and the sample rate from an in-memory WAV blob.
///
/// Multi-channel audio is down-mixed by averaging. Used to concatenate
/// synthesized speech into a session-level recording.
pub fn wav_pcm_mono_i16(bytes: &[u8]) -> anyhow::Result<(Vec<i16>, u32)> {
    let mut reader = hound::WavReader::new(Cursor::new(bytes))?;
    let spec = reader.spec();
    let channels = spec.channels as usize;

    let samples: Vec<i16> = match spec.sample_format {
        hound::SampleFormat::Int => reader
            .samples::<i16>()
            .map(|s| s.unwrap_or(0))
            .collect(),
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .map(|s| f32_to_i16_sample(s.unwrap_or(0.0)))
            .collect(),
    };

    let mono = if channels > 1 {
        samples
            .chunks(channels)
            .map(|frame| (frame.iter().map(|&s| s as i32).sum::<i32>() / channels as i32) as i16)
            .collect()
    } else {
        samples
    };

    Ok((mono, spec.sample_rate))
}

pub fn f32_to_i16_sample(sample: f32) -> i16 {
    (sample * 32767.0).clamp(-32768.0, 32767.0) as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wav_bytes(samples: &[i16], sample_rate: u32) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for &s in samples {
                writer.write_sample(s).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn duration_from_header() {
        // 3s at 22050Hz
        let bytes = wav_bytes(&vec![0i16; 66_150], 22_050);
        assert_eq!(wav_duration_ms(&bytes).unwrap(), 3000);
    }

    #[test]
    fn duration_of_empty_wav_is_zero() {
        let bytes = wav_bytes(&[], 16_000);
        assert_eq!(wav_duration_ms(&bytes).unwrap(), 0);
    }

    #[test]
    fn duration_rejects_non_wav_bytes() {
        assert!(wav_duration_ms(b"not a wav").is_err());
    }

    #[test]
    fn pcm_roundtrip() {
        let samples = vec![0i16, 1000, -1000, 32767];
        let bytes = wav_bytes(&samples, 22_050);
        let (pcm, rate) = wav_pcm_mono_i16(&bytes).unwrap();
        assert_eq!(pcm, samples);
        assert_eq!(rate, 22_050);
    }

    #[test]
    fn write_and_reread_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.wav");
        write_mono_16bit(&path, &[0.0, 0.5, -0.5, 1.0], 48_000).unwrap();
        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().sample_rate, 48_000);
        assert_eq!(reader.spec().channels, 1);
        assert_eq!(reader.duration(), 4);
    }

    #[test]
    fn sample_conversion_saturates() {
        assert_eq!(f32_to_i16_sample(0.0), 0);
        assert_eq!(f32_to_i16_sample(1.0), 32767);
        assert_eq!(f32_to_i16_sample(-2.0), -32768);
    }
}
