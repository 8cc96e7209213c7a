use crate::{MurmurError, Result};
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use tracing::debug;

const CHUNK_SIZE: usize = 1024;

/// Mono resampler fed with arbitrarily sized chunks.
///
/// Input is buffered until a full rubato chunk is available; [`flush`]
/// pushes out whatever remains. The filter delay is trimmed so the output
/// lines up with the input. When both rates match, samples pass through.
///
/// [`flush`]: StreamResampler::flush
pub struct StreamResampler {
    resampler: Option<SincFixedIn<f32>>,
    ratio: f64,
    pending: Vec<f32>,
    consumed: usize,
    produced: usize,
    delay_left: usize,
}

impl StreamResampler {
    /// # Arguments
    /// * `input_rate` - Input sample rate
    /// * `output_rate` - Output sample rate
    pub fn new(input_rate: u32, output_rate: u32) -> Result<Self> {
        if input_rate == 0 || output_rate == 0 {
            return Err(MurmurError::ConfigError(
                "Sample rates must be greater than 0".into(),
            ));
        }

        let ratio = output_rate as f64 / input_rate as f64;
        let resampler = if input_rate == output_rate {
            None
        } else {
            let params = SincInterpolationParameters {
                sinc_len: 256,
                f_cutoff: 0.95,
                interpolation: SincInterpolationType::Linear,
                oversampling_factor: 256,
                window: WindowFunction::BlackmanHarris2,
            };

            let resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, CHUNK_SIZE, 1)
                .map_err(|e| {
                    MurmurError::AudioDeviceError(format!("Failed to create resampler: {}", e))
                })?;
            Some(resampler)
        };

        let delay_left = resampler.as_ref().map(|r| r.output_delay()).unwrap_or(0);

        debug!("Created resampler: {} Hz -> {} Hz", input_rate, output_rate);

        Ok(Self {
            resampler,
            ratio,
            pending: Vec::with_capacity(CHUNK_SIZE * 2),
            consumed: 0,
            produced: 0,
            delay_left,
        })
    }

    /// Resample the next chunk, returning whatever output is ready
    pub fn process(&mut self, input: &[f32]) -> Result<Vec<f32>> {
        if self.resampler.is_none() {
            return Ok(input.to_vec());
        }

        self.pending.extend_from_slice(input);
        let mut output = Vec::new();

        while self.pending.len() >= CHUNK_SIZE {
            let chunk: Vec<f32> = self.pending.drain(..CHUNK_SIZE).collect();
            self.consumed += CHUNK_SIZE;
            let out = self.run_chunk(&chunk)?;
            self.emit(out, &mut output, usize::MAX);
        }

        Ok(output)
    }

    /// Drain the remaining buffered input, zero padded
    pub fn flush(&mut self) -> Result<Vec<f32>> {
        if self.resampler.is_none() {
            return Ok(Vec::new());
        }

        self.consumed += self.pending.len();
        let expected = (self.consumed as f64 * self.ratio).round() as usize;
        let mut output = Vec::new();

        let mut chunk = std::mem::take(&mut self.pending);
        // Bounded: the filter delay is at most a couple of chunks
        for _ in 0..4 {
            if self.produced >= expected {
                break;
            }
            chunk.resize(CHUNK_SIZE, 0.0);
            let out = self.run_chunk(&chunk)?;
            self.emit(out, &mut output, expected);
            chunk.clear();
        }

        Ok(output)
    }

    fn run_chunk(&mut self, chunk: &[f32]) -> Result<Vec<f32>> {
        let Some(resampler) = self.resampler.as_mut() else {
            return Ok(chunk.to_vec());
        };

        let mut out = resampler
            .process(&[chunk], None)
            .map_err(|e| MurmurError::AudioDeviceError(format!("Resampling failed: {}", e)))?;

        Ok(out.pop().unwrap_or_default())
    }

    fn emit(&mut self, out: Vec<f32>, output: &mut Vec<f32>, limit: usize) {
        let skip = self.delay_left.min(out.len());
        self.delay_left -= skip;

        for sample in out.into_iter().skip(skip) {
            if self.produced >= limit {
                break;
            }
            output.push(sample);
            self.produced += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(rate: u32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * std::f32::consts::PI * 440.0 * i as f32 / rate as f32).sin() * 0.5)
            .collect()
    }

    #[test]
    fn test_passthrough_when_rates_match() {
        let mut resampler = StreamResampler::new(16000, 16000).unwrap();
        let input = sine(16000, 300);
        assert_eq!(resampler.process(&input).unwrap(), input);
        assert!(resampler.flush().unwrap().is_empty());
    }

    #[test]
    fn test_downsample_length() {
        let mut resampler = StreamResampler::new(48000, 16000).unwrap();
        let input = sine(48000, 48000);

        let mut output = Vec::new();
        for chunk in input.chunks(480) {
            output.extend(resampler.process(chunk).unwrap());
        }
        output.extend(resampler.flush().unwrap());

        assert_eq!(output.len(), 16000);
    }

    #[test]
    fn test_short_input_still_flushes() {
        let mut resampler = StreamResampler::new(44100, 16000).unwrap();
        assert!(resampler.process(&sine(44100, 100)).unwrap().is_empty());
        let tail = resampler.flush().unwrap();
        assert_eq!(tail.len(), (100.0f64 * 16000.0 / 44100.0).round() as usize);
    }

    #[test]
    fn test_invalid_rates() {
        assert!(StreamResampler::new(0, 16000).is_err());
        assert!(StreamResampler::new(16000, 0).is_err());
    }
}
