// Audio clips - Decoded lane audio and the reader interface the mixer pulls from
//
// Files are decoded once, converted to stereo at the engine sample rate and kept in
// memory. Reading is allocation-free so readers can be driven from the audio callback.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use claxon::FlacReader;
use hound::WavReader;
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::error::EngineError;

const RESAMPLE_CHUNK: usize = 1024;

/// Streaming view over a lane's audio, one stereo frame = two samples
pub trait LaneReader: Send {
    /// Fill `out` (interleaved stereo) from the cursor and advance it.
    /// Frames past the end are written as silence; returns the number of real frames.
    fn read_frames(&mut self, out: &mut [f32]) -> usize;

    /// Move the cursor, clamped to `[0, len_frames]`
    fn seek(&mut self, frame: u64);

    fn position(&self) -> u64;

    fn len_frames(&self) -> u64;
}

/// Description of a decoded file
#[derive(Debug, Clone, PartialEq)]
pub struct AudioMetadata {
    pub duration: f64,
    /// Rate of the decoded data (the engine rate after conversion)
    pub sample_rate: u32,
    /// Channel count of the source file
    pub channels: u16,
    pub frames: u64,
    pub format_name: String,
}

/// Decoded stereo audio shared between readers
#[derive(Debug, Clone)]
pub struct AudioClip {
    samples: Arc<[f32]>,
    cursor: u64,
    metadata: AudioMetadata,
}

impl AudioClip {
    /// Decode `path` and convert it to stereo at `target_rate`
    pub fn load(path: impl AsRef<Path>, target_rate: u32) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let extension = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or("")
            .to_lowercase();

        let decoded = match extension.as_str() {
            "wav" | "wave" => decode_wav(path)?,
            "flac" => decode_flac(path)?,
            "mp3" | "ogg" | "m4a" | "aac" | "aif" | "aiff" => decode_with_symphonia(path)?,
            other => return Err(EngineError::UnsupportedAudioFormat(other.to_string())),
        };

        let source_channels = decoded.channels;
        let mut stereo = to_stereo(&decoded.samples, source_channels as usize);
        if decoded.sample_rate != target_rate && target_rate > 0 {
            log::debug!(
                "Resampling {} from {} Hz to {} Hz",
                path.display(),
                decoded.sample_rate,
                target_rate
            );
            stereo = resample_stereo(&stereo, decoded.sample_rate, target_rate)?;
        }

        let frames = (stereo.len() / 2) as u64;
        let metadata = AudioMetadata {
            duration: frames as f64 / target_rate.max(1) as f64,
            sample_rate: target_rate,
            channels: source_channels,
            frames,
            format_name: extension.to_uppercase(),
        };
        log::info!(
            "Loaded {}: {:.2}s, {} channel(s), {}",
            path.display(),
            metadata.duration,
            metadata.channels,
            metadata.format_name
        );

        Ok(Self {
            samples: stereo.into(),
            cursor: 0,
            metadata,
        })
    }

    /// Clip from interleaved stereo samples already at `sample_rate`
    pub fn from_interleaved(samples: Vec<f32>, sample_rate: u32) -> Self {
        let mut samples = samples;
        samples.truncate(samples.len() / 2 * 2);
        let frames = (samples.len() / 2) as u64;
        Self {
            samples: samples.into(),
            cursor: 0,
            metadata: AudioMetadata {
                duration: frames as f64 / sample_rate.max(1) as f64,
                sample_rate,
                channels: 2,
                frames,
                format_name: "RAW".to_string(),
            },
        }
    }

    pub fn metadata(&self) -> &AudioMetadata {
        &self.metadata
    }

    /// Current cursor in seconds
    pub fn current_time(&self) -> f64 {
        self.cursor as f64 / self.metadata.sample_rate.max(1) as f64
    }

    pub fn seek_time(&mut self, seconds: f64) {
        let frame = (seconds.max(0.0) * self.metadata.sample_rate as f64) as u64;
        self.seek(frame);
    }
}

impl LaneReader for AudioClip {
    fn read_frames(&mut self, out: &mut [f32]) -> usize {
        let total = self.len_frames();
        let wanted = out.len() / 2;
        let available = total.saturating_sub(self.cursor).min(wanted as u64) as usize;

        let start = self.cursor as usize * 2;
        out[..available * 2].copy_from_slice(&self.samples[start..start + available * 2]);
        out[available * 2..].fill(0.0);

        self.cursor = (self.cursor + wanted as u64).min(total);
        available
    }

    fn seek(&mut self, frame: u64) {
        self.cursor = frame.min(self.len_frames());
    }

    fn position(&self) -> u64 {
        self.cursor
    }

    fn len_frames(&self) -> u64 {
        self.metadata.frames
    }
}

struct Decoded {
    samples: Vec<f32>,
    channels: u16,
    sample_rate: u32,
}

fn decode_wav(path: &Path) -> Result<Decoded, EngineError> {
    let mut reader = WavReader::open(path).map_err(|e| EngineError::decode(path, e))?;
    let spec = reader.spec();

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<Result<_, _>>()
            .map_err(|e| EngineError::decode(path, e))?,
        hound::SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample.max(1) - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|s| s as f32 / scale))
                .collect::<Result<_, _>>()
                .map_err(|e| EngineError::decode(path, e))?
        }
    };

    Ok(Decoded {
        samples,
        channels: spec.channels,
        sample_rate: spec.sample_rate,
    })
}

fn decode_flac(path: &Path) -> Result<Decoded, EngineError> {
    let mut reader = FlacReader::open(path).map_err(|e| EngineError::decode(path, e))?;
    let info = reader.streaminfo();
    let scale = (1i64 << (info.bits_per_sample.max(1) - 1)) as f32;

    let samples: Vec<f32> = reader
        .samples()
        .map(|s| s.map(|s| s as f32 / scale))
        .collect::<Result<_, _>>()
        .map_err(|e| EngineError::decode(path, e))?;

    Ok(Decoded {
        samples,
        channels: info.channels as u16,
        sample_rate: info.sample_rate,
    })
}

fn decode_with_symphonia(path: &Path) -> Result<Decoded, EngineError> {
    let file = File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());
    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| EngineError::decode(path, e))?;
    let mut format = probed.format;
    let track = format
        .default_track()
        .ok_or_else(|| EngineError::decode(path, "no decodable audio track"))?;
    let track_id = track.id;
    let mut channels = track.codec_params.channels.map(|c| c.count()).unwrap_or(1).max(1);
    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(44_100);
    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| EngineError::decode(path, e))?;

    let mut samples = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(e) => return Err(EngineError::decode(path, e)),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(e)) => {
                log::warn!("Skipping corrupt packet in {}: {}", path.display(), e);
                continue;
            }
            Err(e) => return Err(EngineError::decode(path, e)),
        };

        let spec = *decoded.spec();
        channels = spec.channels.count().max(1);
        sample_rate = spec.rate;
        let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        buffer.copy_interleaved_ref(decoded);
        samples.extend_from_slice(buffer.samples());
    }

    Ok(Decoded {
        samples,
        channels: channels as u16,
        sample_rate,
    })
}

/// Interleaved N-channel samples to interleaved stereo.
/// Mono is duplicated; extra channels are added to both sides and the sums divided
/// by `channels - 1`.
pub fn to_stereo(samples: &[f32], channels: usize) -> Vec<f32> {
    match channels {
        0 => Vec::new(),
        1 => samples.iter().flat_map(|&s| [s, s]).collect(),
        2 => samples[..samples.len() / 2 * 2].to_vec(),
        _ => {
            let norm = (channels - 1) as f32;
            samples
                .chunks_exact(channels)
                .flat_map(|frame| {
                    let extra: f32 = frame[2..].iter().sum();
                    [(frame[0] + extra) / norm, (frame[1] + extra) / norm]
                })
                .collect()
        }
    }
}

/// Sinc resampling of interleaved stereo; output length is `frames * to / from`
pub fn resample_stereo(stereo: &[f32], from: u32, to: u32) -> Result<Vec<f32>, EngineError> {
    let frames = stereo.len() / 2;
    if frames == 0 || from == to || from == 0 {
        return Ok(stereo.to_vec());
    }

    let ratio = to as f64 / from as f64;
    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 128,
        window: WindowFunction::BlackmanHarris2,
    };
    let mut resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, RESAMPLE_CHUNK, 2)
        .map_err(|e| EngineError::Resample(e.to_string()))?;

    let (left, right): (Vec<f32>, Vec<f32>) =
        stereo.chunks_exact(2).map(|frame| (frame[0], frame[1])).unzip();

    let expected = (frames as f64 * ratio).round() as usize;
    let mut out_left = Vec::with_capacity(expected + RESAMPLE_CHUNK);
    let mut out_right = Vec::with_capacity(expected + RESAMPLE_CHUNK);

    // Keep feeding zero-padded chunks until the filter delay has been flushed
    let mut pos = 0;
    while out_left.len() < expected + resampler.output_delay() {
        let end = (pos + RESAMPLE_CHUNK).min(frames);
        let mut chunk_left = left.get(pos..end).unwrap_or(&[]).to_vec();
        let mut chunk_right = right.get(pos..end).unwrap_or(&[]).to_vec();
        chunk_left.resize(RESAMPLE_CHUNK, 0.0);
        chunk_right.resize(RESAMPLE_CHUNK, 0.0);

        let waves_in = vec![chunk_left, chunk_right];
        let waves = resampler
            .process(&waves_in, None)
            .map_err(|e| EngineError::Resample(e.to_string()))?;
        out_left.extend_from_slice(&waves[0]);
        out_right.extend_from_slice(&waves[1]);
        pos += RESAMPLE_CHUNK;
    }

    let delay = resampler.output_delay();
    Ok(out_left[delay..delay + expected]
        .iter()
        .zip(&out_right[delay..delay + expected])
        .flat_map(|(&l, &r)| [l, r])
        .collect())
}
