// Audio output devices
//
// The engine talks to hardware through `AudioBackend`; `CpalBackend` is the default.
// Streams render interleaved stereo f32 and convert to the device sample format
// (F32, I16, U16) while writing the output buffer.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{
    BufferSize, Device, FromSample, Host, SampleFormat, SampleRate, SizedSample, Stream,
    StreamConfig,
};

use crate::audio::format_conversion::interleave_stereo;
use crate::error::EngineError;

/// Realtime render callback: fill interleaved stereo f32
pub type RenderCallback = Box<dyn FnMut(&mut [f32]) + Send + 'static>;

/// Called off the realtime path when the stream reports an error
pub type StreamErrorCallback = Box<dyn FnMut(String) + Send + 'static>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AudioDeviceInfo {
    pub index: usize,
    pub name: String,
    pub max_output_channels: u16,
    pub default_sample_rate: u32,
    pub is_default: bool,
}

/// What the engine asks the backend to open
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamRequest {
    /// None = system default output
    pub device_index: Option<usize>,
    pub sample_rate: u32,
    pub buffer_size: u32,
}

/// A running output stream. Dropping it stops the callback.
pub trait OutputStream {
    fn play(&mut self) -> Result<(), EngineError>;

    fn pause(&mut self) -> Result<(), EngineError>;

    /// Stop and release the stream. Repeated calls are no-ops.
    fn close(&mut self);

    fn is_open(&self) -> bool;
}

pub trait AudioBackend {
    fn enumerate(&self) -> Vec<AudioDeviceInfo>;

    fn default_device(&self) -> Option<usize>;

    fn open(
        &self,
        request: StreamRequest,
        callback: RenderCallback,
        on_error: StreamErrorCallback,
    ) -> Result<Box<dyn OutputStream>, EngineError>;
}

pub struct CpalBackend {
    host: Host,
}

impl CpalBackend {
    pub fn new() -> Self {
        Self {
            host: cpal::default_host(),
        }
    }

    fn device(&self, index: Option<usize>) -> Result<Device, EngineError> {
        match index {
            Some(index) => self
                .host
                .output_devices()
                .map_err(|e| EngineError::AudioConfig(e.to_string()))?
                .nth(index)
                .ok_or(EngineError::AudioDeviceNotFound(index)),
            None => self
                .host
                .default_output_device()
                .ok_or(EngineError::NoAudioDevice),
        }
    }

    /// Build an output stream for sample type `T`.
    /// Rendering happens in f32 and is converted frame by frame.
    fn build_stream<T>(
        device: &Device,
        config: &StreamConfig,
        mut callback: RenderCallback,
        mut on_error: StreamErrorCallback,
    ) -> Result<Stream, EngineError>
    where
        T: SizedSample + FromSample<f32> + Send + 'static,
    {
        let channels = config.channels.max(1) as usize;
        let initial_frames = match config.buffer_size {
            BufferSize::Fixed(frames) => frames as usize,
            BufferSize::Default => 1024,
        };
        let mut stereo = vec![0.0f32; initial_frames * 2];

        device
            .build_output_stream(
                config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                    // ========== SACRED ZONE ==========
                    // No allocations, No I/O, No blocking locks
                    let frames = data.len() / channels;
                    if stereo.len() < frames * 2 {
                        // Host exceeded the requested buffer size
                        stereo.resize(frames * 2, 0.0);
                    }
                    let block = &mut stereo[..frames * 2];
                    callback(block);
                    interleave_stereo(block, data, channels);
                    // ========== SACRED ZONE END ==========
                },
                move |err| on_error(err.to_string()),
                None,
            )
            .map_err(|e| EngineError::StreamBuild(e.to_string()))
    }
}

impl Default for CpalBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioBackend for CpalBackend {
    fn enumerate(&self) -> Vec<AudioDeviceInfo> {
        let mut devices = Vec::new();

        let default_name = self
            .host
            .default_output_device()
            .and_then(|d| d.name().ok())
            .unwrap_or_default();

        if let Ok(output_devices) = self.host.output_devices() {
            for (index, device) in output_devices.enumerate() {
                let Ok(name) = device.name() else {
                    continue;
                };
                let max_output_channels = device
                    .supported_output_configs()
                    .map(|configs| configs.map(|c| c.channels()).max().unwrap_or(0))
                    .unwrap_or(0);
                let default_sample_rate = device
                    .default_output_config()
                    .map(|c| c.sample_rate().0)
                    .unwrap_or(0);

                devices.push(AudioDeviceInfo {
                    index,
                    is_default: name == default_name,
                    name,
                    max_output_channels,
                    default_sample_rate,
                });
            }
        }

        devices
    }

    fn default_device(&self) -> Option<usize> {
        self.enumerate()
            .into_iter()
            .find(|device| device.is_default)
            .map(|device| device.index)
    }

    fn open(
        &self,
        request: StreamRequest,
        callback: RenderCallback,
        on_error: StreamErrorCallback,
    ) -> Result<Box<dyn OutputStream>, EngineError> {
        let device = self.device(request.device_index)?;
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());

        let supported = device
            .default_output_config()
            .map_err(|e| EngineError::AudioConfig(e.to_string()))?;
        let sample_format = supported.sample_format();

        let config = StreamConfig {
            channels: supported.channels().max(1),
            sample_rate: SampleRate(request.sample_rate),
            buffer_size: BufferSize::Fixed(request.buffer_size),
        };

        log::info!(
            "Opening audio device '{}': {} Hz, {} frames, {} channels, {:?}",
            name,
            request.sample_rate,
            request.buffer_size,
            config.channels,
            sample_format
        );

        let stream = match sample_format {
            SampleFormat::F32 => Self::build_stream::<f32>(&device, &config, callback, on_error),
            SampleFormat::I16 => Self::build_stream::<i16>(&device, &config, callback, on_error),
            SampleFormat::U16 => Self::build_stream::<u16>(&device, &config, callback, on_error),
            other => return Err(EngineError::UnsupportedSampleFormat(format!("{:?}", other))),
        }?;

        Ok(Box::new(CpalStream {
            stream: Some(stream),
            name,
        }))
    }
}

pub struct CpalStream {
    stream: Option<Stream>,
    name: String,
}

impl OutputStream for CpalStream {
    fn play(&mut self) -> Result<(), EngineError> {
        let stream = self.stream.as_ref().ok_or(EngineError::NotInitialized)?;
        stream
            .play()
            .map_err(|e| EngineError::StreamControl(e.to_string()))
    }

    fn pause(&mut self) -> Result<(), EngineError> {
        let stream = self.stream.as_ref().ok_or(EngineError::NotInitialized)?;
        stream
            .pause()
            .map_err(|e| EngineError::StreamControl(e.to_string()))
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.pause();
            drop(stream);
            log::info!("Audio stream closed: {}", self.name);
        }
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }
}

impl Drop for CpalStream {
    fn drop(&mut self) {
        self.close();
    }
}
