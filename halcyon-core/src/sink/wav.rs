//! WAV file sink backed by `hound`.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::{HalcyonError, Result};
use crate::sink::WaveSink;

/// Writes each session to `<output_dir>/processed_<timestamp>.wav` as
/// mono 16-bit PCM.
#[derive(Debug, Clone)]
pub struct WavFileSink {
    output_dir: PathBuf,
}

impl WavFileSink {
    /// Create a sink writing into `output_dir`. The directory is created
    /// on first persist if it does not exist.
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    fn next_file_name() -> String {
        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        format!("processed_{timestamp}.wav")
    }
}

impl WaveSink for WavFileSink {
    fn persist(&mut self, samples: &[i16], sample_rate: u32) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.output_dir)?;
        let path = self.output_dir.join(Self::next_file_name());

        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let mut writer = hound::WavWriter::create(&path, spec)
            .map_err(|e| HalcyonError::Persistence(e.to_string()))?;
        {
            let mut i16_writer = writer.get_i16_writer(samples.len() as u32);
            for &sample in samples {
                i16_writer.write_sample(sample);
            }
            i16_writer
                .flush()
                .map_err(|e| HalcyonError::Persistence(e.to_string()))?;
        }
        writer
            .finalize()
            .map_err(|e| HalcyonError::Persistence(e.to_string()))?;

        info!(
            path = %path.display(),
            samples = samples.len(),
            sample_rate,
            "session audio persisted"
        );
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persist_writes_readable_wav() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let mut sink = WavFileSink::new(dir.path());

        let samples: Vec<i16> = (0..2048)
            .map(|i| ((i as f32 * 0.05).sin() * 12_000.0) as i16)
            .collect();
        let path = sink.persist(&samples, 44_100).expect("persist");

        assert!(path.exists());
        assert!(path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("processed_") && n.ends_with(".wav")));

        let mut reader = hound::WavReader::open(&path).expect("reopen wav");
        let spec = reader.spec();
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.sample_rate, 44_100);
        assert_eq!(spec.bits_per_sample, 16);

        let read_back: Vec<i16> = reader
            .samples::<i16>()
            .collect::<std::result::Result<_, _>>()
            .expect("read samples");
        assert_eq!(read_back, samples);
    }

    #[test]
    fn persist_creates_missing_output_dir() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let nested = dir.path().join("sessions").join("wav");
        let mut sink = WavFileSink::new(&nested);

        let path = sink.persist(&[0, 1, -1], 22_050).expect("persist");
        assert!(path.starts_with(&nested));
    }
}
