//! Microphone capture that streams 16-bit mono PCM in fixed-duration chunks.
//!
//! The first chunk of every recording starts with a streaming WAV header so
//! the backend can treat the concatenated upload as one decodable file.

use crate::lock_or_recover;
use crate::log_debug;
use anyhow::{anyhow, bail, Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};
use crossbeam_channel::Sender;
use std::env;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const TEST_DEVICES_ENV: &str = "ESSENCE_TEST_DEVICES";
const WAV_HEADER_LEN: usize = 44;
const BITS_PER_SAMPLE: u16 = 16;

/// One upload unit. `seq` restarts at zero for every recording.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    pub seq: u64,
    pub bytes: Vec<u8>,
}

/// Names of the available input devices. `ESSENCE_TEST_DEVICES` (comma separated)
/// replaces the host query.
pub fn list_input_devices() -> Result<Vec<String>> {
    if let Ok(fake) = env::var(TEST_DEVICES_ENV) {
        return Ok(fake
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect());
    }
    let host = cpal::default_host();
    let devices = host.input_devices().context("enumerate input devices")?;
    Ok(devices.filter_map(|device| device.name().ok()).collect())
}

/// WAV header for a stream of unknown length (sizes set to `u32::MAX`).
#[must_use]
pub fn wav_stream_header(sample_rate: u32) -> [u8; WAV_HEADER_LEN] {
    let block_align: u16 = BITS_PER_SAMPLE / 8;
    let byte_rate = sample_rate.saturating_mul(u32::from(block_align));
    let mut header = [0u8; WAV_HEADER_LEN];
    header[0..4].copy_from_slice(b"RIFF");
    header[4..8].copy_from_slice(&u32::MAX.to_le_bytes());
    header[8..12].copy_from_slice(b"WAVE");
    header[12..16].copy_from_slice(b"fmt ");
    header[16..20].copy_from_slice(&16u32.to_le_bytes());
    header[20..22].copy_from_slice(&1u16.to_le_bytes());
    header[22..24].copy_from_slice(&1u16.to_le_bytes());
    header[24..28].copy_from_slice(&sample_rate.to_le_bytes());
    header[28..32].copy_from_slice(&byte_rate.to_le_bytes());
    header[32..34].copy_from_slice(&block_align.to_le_bytes());
    header[34..36].copy_from_slice(&BITS_PER_SAMPLE.to_le_bytes());
    header[36..40].copy_from_slice(b"data");
    header[40..44].copy_from_slice(&u32::MAX.to_le_bytes());
    header
}

/// Rewrite the streaming sizes of a complete recording so strict decoders accept it.
pub fn finalize_wav(bytes: &mut [u8]) -> Result<()> {
    if bytes.len() < WAV_HEADER_LEN || &bytes[0..4] != b"RIFF" || &bytes[36..40] != b"data" {
        bail!("recording does not start with a WAV header");
    }
    let total = u32::try_from(bytes.len()).context("recording too large for WAV")?;
    bytes[4..8].copy_from_slice(&(total - 8).to_le_bytes());
    bytes[40..44].copy_from_slice(&(total - WAV_HEADER_LEN as u32).to_le_bytes());
    Ok(())
}

/// Downmixes interleaved frames to mono PCM16 and cuts them into chunks.
#[derive(Debug)]
pub struct ChunkEncoder {
    sample_rate: u32,
    channels: usize,
    samples_per_chunk: usize,
    pending: Vec<i16>,
    header_sent: bool,
    next_seq: u64,
}

impl ChunkEncoder {
    #[must_use]
    pub fn new(sample_rate: u32, channels: u16, chunk: Duration) -> Self {
        let samples = (u128::from(sample_rate) * chunk.as_millis() / 1000).max(1);
        Self {
            sample_rate,
            channels: usize::from(channels.max(1)),
            samples_per_chunk: usize::try_from(samples).unwrap_or(usize::MAX),
            pending: Vec::new(),
            header_sent: false,
            next_seq: 0,
        }
    }

    /// Feed interleaved samples; returns every chunk that filled up.
    pub fn push_interleaved(&mut self, data: &[f32]) -> Vec<AudioChunk> {
        for frame in data.chunks(self.channels) {
            let sum: f32 = frame.iter().sum();
            let mono = (sum / frame.len() as f32).clamp(-1.0, 1.0);
            self.pending.push((mono * f32::from(i16::MAX)) as i16);
        }
        let mut ready = Vec::new();
        while self.pending.len() >= self.samples_per_chunk {
            let rest = self.pending.split_off(self.samples_per_chunk);
            let full = std::mem::replace(&mut self.pending, rest);
            ready.push(self.emit(&full));
        }
        ready
    }

    /// Emit whatever is left as a short final chunk.
    pub fn flush(&mut self) -> Option<AudioChunk> {
        if self.pending.is_empty() && self.header_sent {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(self.emit(&rest))
    }

    fn emit(&mut self, samples: &[i16]) -> AudioChunk {
        let mut bytes = Vec::with_capacity(samples.len() * 2 + WAV_HEADER_LEN);
        if !self.header_sent {
            bytes.extend_from_slice(&wav_stream_header(self.sample_rate));
            self.header_sent = true;
        }
        for sample in samples {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        AudioChunk { seq, bytes }
    }
}

/// A live microphone stream. Dropping it stops capture.
pub struct MicRecorder {
    stream: cpal::Stream,
    encoder: Arc<Mutex<ChunkEncoder>>,
    chunks: Sender<AudioChunk>,
    device_name: String,
}

impl MicRecorder {
    /// Open the named device (or the default) and start streaming chunks to `chunks`.
    pub fn start(
        device_name: Option<&str>,
        chunk: Duration,
        chunks: Sender<AudioChunk>,
    ) -> Result<Self> {
        let host = cpal::default_host();
        let device = match device_name {
            Some(wanted) => host
                .input_devices()
                .context("enumerate input devices")?
                .find(|device| device.name().map(|n| n == wanted).unwrap_or(false))
                .ok_or_else(|| anyhow!("input device not found: {wanted}"))?,
            None => host
                .default_input_device()
                .ok_or_else(|| anyhow!("no default input device"))?,
        };
        let name = device.name().unwrap_or_else(|_| "unknown".to_string());
        let supported = device
            .default_input_config()
            .with_context(|| format!("query input config for {name}"))?;
        let format = supported.sample_format();
        let config: cpal::StreamConfig = supported.into();
        let encoder = Arc::new(Mutex::new(ChunkEncoder::new(
            config.sample_rate.0,
            config.channels,
            chunk,
        )));

        let stream = match format {
            cpal::SampleFormat::F32 => {
                build_stream::<f32>(&device, &config, Arc::clone(&encoder), chunks.clone())
            }
            cpal::SampleFormat::I16 => {
                build_stream::<i16>(&device, &config, Arc::clone(&encoder), chunks.clone())
            }
            cpal::SampleFormat::U16 => {
                build_stream::<u16>(&device, &config, Arc::clone(&encoder), chunks.clone())
            }
            other => Err(anyhow!("unsupported sample format {other:?}")),
        }?;
        stream.play().context("start input stream")?;
        log_debug(&format!(
            "mic started: device={name} rate={} channels={}",
            config.sample_rate.0, config.channels
        ));
        Ok(Self {
            stream,
            encoder,
            chunks,
            device_name: name,
        })
    }

    #[must_use]
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Stop capture and push the trailing partial chunk.
    pub fn stop(self) {
        let _ = self.stream.pause();
        drop(self.stream);
        let tail = lock_or_recover(&self.encoder, "mic stop").flush();
        if let Some(tail) = tail {
            let _ = self.chunks.send(tail);
        }
        log_debug("mic stopped");
    }

    /// Stop capture and discard anything not yet emitted.
    pub fn cancel(self) {
        let _ = self.stream.pause();
        log_debug("mic cancelled");
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    encoder: Arc<Mutex<ChunkEncoder>>,
    chunks: Sender<AudioChunk>,
) -> Result<cpal::Stream>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let mut scratch: Vec<f32> = Vec::new();
    let stream = device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                scratch.clear();
                scratch.extend(data.iter().map(|s| f32::from_sample(*s)));
                let ready = lock_or_recover(&encoder, "mic callback").push_interleaved(&scratch);
                for chunk in ready {
                    if chunks.send(chunk).is_err() {
                        break;
                    }
                }
            },
            |err| log_debug(&format!("input stream error: {err}")),
            None,
        )
        .context("build input stream")?;
    Ok(stream)
}
