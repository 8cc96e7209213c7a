use crate::{MurmurError, Result};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::fs::File;
use std::io::{BufWriter, Cursor};
use std::path::Path;
use tracing::debug;

fn pcm16_spec(sample_rate: u32, channels: u16) -> WavSpec {
    WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    }
}

fn to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

/// Open a 16-bit PCM WAV file for incremental writing
pub fn create_writer<P: AsRef<Path>>(
    path: P,
    sample_rate: u32,
    channels: u16,
) -> Result<WavWriter<BufWriter<File>>> {
    WavWriter::create(path.as_ref(), pcm16_spec(sample_rate, channels))
        .map_err(|e| MurmurError::IOError(format!("Failed to create WAV writer: {}", e)))
}

/// Append `f32` samples (range -1.0 to 1.0) to an open writer
pub fn write_samples<W>(writer: &mut WavWriter<W>, samples: &[f32]) -> Result<()>
where
    W: std::io::Write + std::io::Seek,
{
    for &sample in samples {
        writer
            .write_sample(to_i16(sample))
            .map_err(|e| MurmurError::IOError(format!("Failed to write sample: {}", e)))?;
    }
    Ok(())
}

/// Encode mono samples as an in-memory 16-bit WAV
pub fn encode_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(&mut cursor, pcm16_spec(sample_rate, 1))
            .map_err(|e| MurmurError::IOError(format!("Failed to create WAV writer: {}", e)))?;
        write_samples(&mut writer, samples)?;
        writer
            .finalize()
            .map_err(|e| MurmurError::IOError(format!("Failed to finalize WAV: {}", e)))?;
    }
    Ok(cursor.into_inner())
}

/// Read audio samples from a WAV file
///
/// # Returns
/// * Tuple of (interleaved samples, sample_rate, channels)
pub fn read_wav<P: AsRef<Path>>(path: P) -> Result<(Vec<f32>, u32, u16)> {
    let mut reader = WavReader::open(path.as_ref())
        .map_err(|e| MurmurError::IOError(format!("Failed to open WAV file: {}", e)))?;

    let spec = reader.spec();
    debug!(
        "Reading WAV file: {} Hz, {} channels, {} bits",
        spec.sample_rate, spec.channels, spec.bits_per_sample
    );

    let read_err = |e: hound::Error| MurmurError::IOError(format!("Failed to read sample: {}", e));
    let samples: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Float, _) => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(read_err)?,
        (SampleFormat::Int, 16) => reader
            .samples::<i16>()
            .map(|s| s.map(|v| v as f32 / i16::MAX as f32))
            .collect::<std::result::Result<_, _>>()
            .map_err(read_err)?,
        (SampleFormat::Int, 24) => reader
            .samples::<i32>()
            .map(|s| s.map(|v| v as f32 / 8388608.0)) // 2^23
            .collect::<std::result::Result<_, _>>()
            .map_err(read_err)?,
        (SampleFormat::Int, 32) => reader
            .samples::<i32>()
            .map(|s| s.map(|v| v as f32 / i32::MAX as f32))
            .collect::<std::result::Result<_, _>>()
            .map_err(read_err)?,
        (_, bits) => {
            return Err(MurmurError::IOError(format!(
                "Unsupported bit depth: {}",
                bits
            )))
        }
    };

    Ok((samples, spec.sample_rate, spec.channels))
}

/// Read a WAV file and average its channels down to mono
pub fn read_wav_mono<P: AsRef<Path>>(path: P) -> Result<(Vec<f32>, u32)> {
    let (samples, sample_rate, channels) = read_wav(path)?;
    let channels = channels.max(1) as usize;
    if channels == 1 {
        return Ok((samples, sample_rate));
    }

    let mono = samples
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect();
    Ok((mono, sample_rate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn write_file(path: &Path, samples: &[f32], sample_rate: u32, channels: u16) {
        let mut writer = create_writer(path, sample_rate, channels).unwrap();
        write_samples(&mut writer, samples).unwrap();
        writer.finalize().unwrap();
    }

    fn sine(len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * PI * 440.0 * i as f32 / 16000.0).sin() * 0.5)
            .collect()
    }

    #[test]
    fn test_write_read_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        let samples = sine(16000);

        write_file(&path, &samples, 16000, 1);
        let (read, rate, channels) = read_wav(&path).unwrap();

        assert_eq!(rate, 16000);
        assert_eq!(channels, 1);
        assert_eq!(read.len(), samples.len());
        for (original, read) in samples.iter().zip(read.iter()) {
            assert!((original - read).abs() < 0.001);
        }
    }

    #[test]
    fn test_encode_wav_header() {
        let bytes = encode_wav(&sine(160), 16000).unwrap();
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"WAVE");
        // 44 byte header plus two bytes per sample
        assert_eq!(bytes.len(), 44 + 160 * 2);
    }

    #[test]
    fn test_read_wav_mono_downmix() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        write_file(&path, &[0.5, 0.3, 0.7, 0.1], 8000, 2);

        let (mono, rate) = read_wav_mono(&path).unwrap();
        assert_eq!(rate, 8000);
        assert_eq!(mono.len(), 2);
        assert!((mono[0] - 0.4).abs() < 0.001);
        assert!((mono[1] - 0.4).abs() < 0.001);
    }
}
