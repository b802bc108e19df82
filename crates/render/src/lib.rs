use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use anyhow::Context;
use beatmix_transport::{BitDepth, PcmBuffer};

/// Integer PCM WAV writer that accepts a render one segment at a time.
pub struct WavRenderer {
    writer: hound::WavWriter<BufWriter<File>>,
    channels: u16,
    sample_rate: u32,
    bit_depth: BitDepth,
    frames: u64,
}

impl WavRenderer {
    pub fn create(
        path: &Path,
        sample_rate: u32,
        channels: u16,
        bit_depth: BitDepth,
    ) -> anyhow::Result<Self> {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: bit_depth.bits(),
            sample_format: hound::SampleFormat::Int,
        };
        let writer = hound::WavWriter::create(path, spec)
            .with_context(|| format!("creating {}", path.display()))?;
        Ok(Self {
            writer,
            channels,
            sample_rate,
            bit_depth,
            frames: 0,
        })
    }

    /// Append one buffer. Its format has to match the file's.
    pub fn write(&mut self, pcm: &PcmBuffer) -> anyhow::Result<()> {
        if pcm.channels != self.channels
            || pcm.sample_rate != self.sample_rate
            || pcm.bit_depth != self.bit_depth
        {
            anyhow::bail!(
                "segment format {} Hz/{} ch/{} does not match render format {} Hz/{} ch/{}",
                pcm.sample_rate,
                pcm.channels,
                pcm.bit_depth,
                self.sample_rate,
                self.channels,
                self.bit_depth
            );
        }
        for &sample in &pcm.samples {
            self.writer.write_sample(sample)?;
        }
        self.frames += pcm.frames() as u64;
        Ok(())
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Flush the header; returns the number of frames written.
    pub fn finalize(self) -> anyhow::Result<u64> {
        self.writer.finalize()?;
        Ok(self.frames)
    }
}

/// Write a single buffer to a WAV file.
pub fn write_wav(pcm: &PcmBuffer, path: &Path) -> anyhow::Result<()> {
    let mut renderer = WavRenderer::create(path, pcm.sample_rate, pcm.channels, pcm.bit_depth)?;
    renderer.write(pcm)?;
    renderer.finalize()?;
    Ok(())
}
