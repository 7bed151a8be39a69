use std::fs::File;
use std::io::Cursor;
use std::path::Path;

use echoguard_domain::{EchoguardError, Result};
use serde::{Deserialize, Serialize};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, warn};

use crate::dsp::{downmix, resample};

/// Decoded audio. Samples are interleaved when `channels > 1`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Waveform {
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<f32>,
}

impl Waveform {
    pub fn mono(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            sample_rate,
            channels: 1,
            samples,
        }
    }

    pub fn is_mono(&self) -> bool {
        self.channels == 1
    }

    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    pub fn duration_secs(&self) -> f64 {
        self.frames() as f64 / self.sample_rate.max(1) as f64
    }

    /// Downmixes to one channel and resamples to `target_rate`, the shape the
    /// feature extractor expects.
    pub fn into_analysis(self, target_rate: u32) -> Result<Waveform> {
        let mono = if self.is_mono() {
            self.samples
        } else {
            downmix(&self.samples, self.channels)
        };
        let samples = resample(&mono, self.sample_rate, target_rate)?;
        Ok(Waveform::mono(samples, target_rate))
    }
}

pub struct AudioDecoder;

impl AudioDecoder {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Waveform> {
        let path_ref = path.as_ref();
        let file = File::open(path_ref)
            .map_err(|err| EchoguardError::decode(format!("open {:?}: {err}", path_ref)))?;
        let extension = path_ref.extension().and_then(|ext| ext.to_str());
        Self::decode(Box::new(file), extension)
    }

    /// Decodes an in-memory upload. `extension` is only a probing hint.
    pub fn decode_bytes(bytes: Vec<u8>, extension: Option<&str>) -> Result<Waveform> {
        Self::decode(Box::new(Cursor::new(bytes)), extension)
    }

    /// Opens `path` and returns mono samples at `target_rate`.
    pub fn load<P: AsRef<Path>>(path: P, target_rate: u32) -> Result<Waveform> {
        let path_ref = path.as_ref();
        let waveform = Self::open(path_ref)?;
        debug!(
            path = %path_ref.display(),
            sample_rate = waveform.sample_rate,
            channels = waveform.channels,
            frames = waveform.frames(),
            "decoded audio"
        );
        waveform.into_analysis(target_rate)
    }

    fn decode(source: Box<dyn MediaSource>, extension: Option<&str>) -> Result<Waveform> {
        let mss = MediaSourceStream::new(source, Default::default());
        let mut hint = Hint::new();
        if let Some(ext) = extension {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|err| EchoguardError::decode(format!("unrecognised container: {err}")))?;
        let mut format = probed.format;
        let track = format
            .default_track()
            .ok_or_else(|| EchoguardError::decode("no default track found"))?;
        let track_id = track.id;
        let sample_rate = track
            .codec_params
            .sample_rate
            .ok_or_else(|| EchoguardError::decode("track has no sample rate"))?;
        let mut channels = track
            .codec_params
            .channels
            .map(|c| c.count() as u16)
            .unwrap_or(1);
        let mut decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|err| EchoguardError::decode(format!("unsupported codec: {err}")))?;

        let mut samples = Vec::new();
        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(SymphError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    break;
                }
                Err(SymphError::ResetRequired) => break,
                Err(err) => return Err(EchoguardError::decode(err.to_string())),
            };
            if packet.track_id() != track_id {
                continue;
            }
            match decoder.decode(&packet) {
                Ok(buffer) => {
                    let spec = *buffer.spec();
                    channels = spec.channels.count() as u16;
                    let mut out = SampleBuffer::<f32>::new(buffer.capacity() as u64, spec);
                    out.copy_interleaved_ref(buffer);
                    samples.extend_from_slice(out.samples());
                }
                Err(SymphError::DecodeError(reason)) => {
                    warn!(reason, "skipping undecodable packet");
                }
                Err(err) => return Err(EchoguardError::decode(err.to_string())),
            }
        }

        if samples.is_empty() {
            return Err(EchoguardError::decode("stream contains no audio samples"));
        }

        Ok(Waveform {
            sample_rate,
            channels,
            samples,
        })
    }
}
