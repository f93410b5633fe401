//! UI-side end of the scope pipeline.

use std::time::{Duration, Instant};

use crate::error::ScopeError;
use crate::queue::BlockConsumer;
use crate::spectrum::SpectrumAnalyzer;

pub const DEFAULT_FRAMES_PER_SECOND: u32 = 30;

/// Pops captured windows at a fixed frame rate and keeps the latest waveform
/// and its spectrum around for painting.
pub struct ScopeView {
    queue: BlockConsumer,
    analyzer: SpectrumAnalyzer,
    waveform: Box<[f32]>,
    spectrum: Box<[f32]>,
    frame_interval: Duration,
    last_refresh: Option<Instant>,
    frames_shown: u64,
}

impl ScopeView {
    pub fn new(queue: BlockConsumer, frames_per_second: u32) -> Result<Self, ScopeError> {
        let analyzer = SpectrumAnalyzer::new(queue.block_size())?;
        Ok(Self {
            waveform: vec![0.0; queue.block_size()].into_boxed_slice(),
            spectrum: vec![0.0; analyzer.bins()].into_boxed_slice(),
            analyzer,
            queue,
            frame_interval: frame_interval(frames_per_second)?,
            last_refresh: None,
            frames_shown: 0,
        })
    }

    pub fn set_frames_per_second(&mut self, frames_per_second: u32) -> Result<(), ScopeError> {
        self.frame_interval = frame_interval(frames_per_second)?;
        Ok(())
    }

    pub fn frame_interval(&self) -> Duration {
        self.frame_interval
    }

    /// Runs one refresh if a frame interval has passed since the last one.
    /// Returns `true` when a new window replaced the displayed one; on underrun
    /// the previous frame stays up.
    pub fn tick(&mut self, now: Instant) -> bool {
        if let Some(last) = self.last_refresh {
            if now.saturating_duration_since(last) < self.frame_interval {
                return false;
            }
        }
        self.last_refresh = Some(now);
        self.refresh()
    }

    fn refresh(&mut self) -> bool {
        if self.queue.is_empty() {
            return false;
        }
        match self.queue.pop(&mut self.waveform) {
            Ok(true) => {}
            Ok(false) => return false,
            Err(err) => {
                log::error!("scope refresh failed: {err}");
                return false;
            }
        }
        if let Err(err) = self.analyzer.process(&self.waveform, &mut self.spectrum) {
            log::error!("spectrum update failed: {err}");
        }
        self.frames_shown += 1;
        true
    }

    pub fn waveform(&self) -> &[f32] {
        &self.waveform
    }

    /// Normalised `0..=1` levels, one per bin up to Nyquist.
    pub fn spectrum(&self) -> &[f32] {
        &self.spectrum
    }

    pub fn frames_shown(&self) -> u64 {
        self.frames_shown
    }

    /// Captured windows waiting to be shown, and how many the queue holds.
    pub fn backlog(&self) -> (usize, usize) {
        (self.queue.len(), self.queue.capacity())
    }

    /// Windows lost because the display fell behind the audio thread.
    pub fn dropped(&self) -> u64 {
        self.queue.dropped()
    }
}

fn frame_interval(frames_per_second: u32) -> Result<Duration, ScopeError> {
    if !(1..1000).contains(&frames_per_second) {
        return Err(ScopeError::FrameRate(frames_per_second));
    }
    Ok(Duration::from_secs(1) / frames_per_second)
}
