use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

use crate::capture::TriggerCapture;
use crate::error::AudioError;
use crate::queue::{BlockConsumer, BlockProducer, BlockQueue};
use crate::settings::AppSettings;
use crate::synth::{MAX_VOICES, NoteEvent, SineVoice, Synth};

/// Frames rendered per pass; callbacks larger than this are split.
const RENDER_CHUNK: usize = 1024;
const NOTE_QUEUE_DEPTH: usize = 256;

/// `f32` stored as bits so the UI can set it without locking the audio thread.
#[derive(Debug)]
struct AtomicF32(AtomicU32);

impl AtomicF32 {
    fn new(value: f32) -> Self {
        Self(AtomicU32::new(value.to_bits()))
    }

    fn set(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Release);
    }

    fn get(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Acquire))
    }
}

/// Values the UI tweaks while the stream runs.
#[derive(Debug)]
pub struct SessionControls {
    trigger_level: AtomicF32,
    master_gain: AtomicF32,
}

impl SessionControls {
    pub fn new(trigger_level: f32, master_gain: f32) -> Self {
        Self {
            trigger_level: AtomicF32::new(trigger_level),
            master_gain: AtomicF32::new(master_gain.clamp(0.0, 1.0)),
        }
    }

    pub fn set_trigger_level(&self, level: f32) {
        self.trigger_level.set(level);
    }

    pub fn trigger_level(&self) -> f32 {
        self.trigger_level.get()
    }

    pub fn set_master_gain(&self, gain: f32) {
        self.master_gain.set(gain.clamp(0.0, 1.0));
    }

    pub fn master_gain(&self) -> f32 {
        self.master_gain.get()
    }
}

/// Everything the output callback owns. Nothing in here allocates or locks
/// once constructed.
pub struct AudioRenderer {
    synth: Synth<SineVoice>,
    capture: TriggerCapture,
    notes: Receiver<NoteEvent>,
    controls: Arc<SessionControls>,
    mono: Box<[f32]>,
}

impl AudioRenderer {
    pub fn new(
        sample_rate: f32,
        scope: BlockProducer,
        notes: Receiver<NoteEvent>,
        controls: Arc<SessionControls>,
    ) -> Self {
        let mut synth = Synth::new(MAX_VOICES);
        synth.prepare(sample_rate);
        Self {
            synth,
            capture: TriggerCapture::new(scope, controls.trigger_level()),
            notes,
            controls,
            mono: vec![0.0; RENDER_CHUNK].into_boxed_slice(),
        }
    }

    /// Fills an interleaved output buffer with the same signal on every
    /// channel and feeds that signal to the trigger capture.
    pub fn render<T>(&mut self, data: &mut [T], channels: usize)
    where
        T: SizedSample + FromSample<f32>,
    {
        while let Ok(event) = self.notes.try_recv() {
            self.synth.handle(event);
        }
        let level = self.controls.trigger_level();
        if level != self.capture.trigger_level() {
            self.capture.set_trigger_level(level);
            self.capture.reset();
        }
        let gain = self.controls.master_gain();

        let channels = channels.max(1);
        for frames in data.chunks_mut(channels * self.mono.len()) {
            let mono = &mut self.mono[..frames.len() / channels];
            self.synth.render(mono);
            for sample in mono.iter_mut() {
                *sample = (*sample * gain).clamp(-1.0, 1.0);
            }
            self.capture.process(mono);

            for (frame, &sample) in frames.chunks_mut(channels).zip(mono.iter()) {
                frame.fill(T::from_sample(sample));
            }
        }
    }
}

/// The running output stream plus the handles the UI talks to it through.
pub struct AudioSession {
    _stream: cpal::Stream,
    pub device_name: String,
    pub sample_rate: u32,
    notes: Sender<NoteEvent>,
    controls: Arc<SessionControls>,
}

impl AudioSession {
    /// Opens `device_name` (or the default output), starts the synth on it and
    /// returns the session with the UI end of the scope queue.
    pub fn new(
        device_name: Option<&str>,
        settings: &AppSettings,
    ) -> Result<(Self, BlockConsumer), AudioError> {
        let host = cpal::default_host();
        let device = select_output_device(&host, device_name)?;
        let resolved_device_name = device
            .name()
            .unwrap_or_else(|_| "<unknown output>".to_string());
        let supported_config = device.default_output_config()?;
        let sample_format = supported_config.sample_format();
        let config: cpal::StreamConfig = supported_config.into();
        let channels = config.channels as usize;

        let (producer, consumer) = BlockQueue::with_defaults()?;
        let (notes, note_rx) = bounded(NOTE_QUEUE_DEPTH);
        let controls = Arc::new(SessionControls::new(
            settings.trigger_level,
            settings.master_gain,
        ));
        let renderer = AudioRenderer::new(
            config.sample_rate.0 as f32,
            producer,
            note_rx,
            Arc::clone(&controls),
        );

        let stream = match sample_format {
            cpal::SampleFormat::F32 => {
                build_stream::<f32>(&device, &config, renderer, channels, "f32")?
            }
            cpal::SampleFormat::I16 => {
                build_stream::<i16>(&device, &config, renderer, channels, "i16")?
            }
            cpal::SampleFormat::U16 => {
                build_stream::<u16>(&device, &config, renderer, channels, "u16")?
            }
            other => return Err(AudioError::UnsupportedFormat(format!("{other:?}"))),
        };
        stream.play()?;

        log::info!(
            "audio running on '{resolved_device_name}' at {} Hz, {channels} channels, {sample_format:?}",
            config.sample_rate.0
        );

        Ok((
            Self {
                _stream: stream,
                device_name: resolved_device_name,
                sample_rate: config.sample_rate.0,
                notes,
                controls,
            },
            consumer,
        ))
    }

    pub fn send_note(&self, event: NoteEvent) {
        match self.notes.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => log::warn!("note queue full, dropping {event:?}"),
            Err(TrySendError::Disconnected(_)) => log::warn!("audio stream is gone"),
        }
    }

    pub fn controls(&self) -> &SessionControls {
        &self.controls
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut renderer: AudioRenderer,
    channels: usize,
    format: &'static str,
) -> Result<cpal::Stream, AudioError>
where
    T: SizedSample + FromSample<f32>,
{
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _| renderer.render(data, channels),
            |err| log::error!("audio stream error: {err}"),
            None,
        )
        .map_err(|source| AudioError::BuildStream { format, source })
}

fn select_output_device(host: &cpal::Host, name: Option<&str>) -> Result<cpal::Device, AudioError> {
    if let Some(target) = name {
        if let Ok(devices) = host.output_devices() {
            for device in devices {
                if device.name().is_ok_and(|device_name| device_name == target) {
                    return Ok(device);
                }
            }
        }
        return Err(AudioError::DeviceNotFound(target.to_string()));
    }

    host.default_output_device().ok_or(AudioError::NoDevice)
}

pub fn list_output_device_names() -> Vec<String> {
    match cpal::default_host().output_devices() {
        Ok(devices) => devices.filter_map(|device| device.name().ok()).collect(),
        Err(err) => {
            log::warn!("could not enumerate output devices: {err}");
            Vec::new()
        }
    }
}
