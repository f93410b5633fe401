//! Windowed magnitude spectrum for the scope's lower half.

use std::f32::consts::TAU;
use std::sync::Arc;

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

use crate::error::ScopeError;

pub const MIN_DB: f32 = -160.0;
pub const MAX_DB: f32 = 0.0;
/// Level reported for a silent bin before normalisation.
const SILENCE_DB: f32 = -100.0;

pub struct SpectrumAnalyzer {
    fft: Arc<dyn Fft<f32>>,
    window: Box<[f32]>,
    buffer: Box<[Complex<f32>]>,
    scratch: Box<[Complex<f32>]>,
    /// dB of the bin magnitude a full-scale DC input would produce.
    reference_db: f32,
}

impl SpectrumAnalyzer {
    pub fn new(size: usize) -> Result<Self, ScopeError> {
        if size < 2 || !size.is_power_of_two() {
            return Err(ScopeError::BlockSize(size));
        }
        let fft = FftPlanner::new().plan_fft_forward(size);
        let scratch = vec![Complex::default(); fft.get_inplace_scratch_len()].into_boxed_slice();
        Ok(Self {
            fft,
            window: hann(size),
            buffer: vec![Complex::default(); size].into_boxed_slice(),
            scratch,
            reference_db: gain_to_db(size as f32),
        })
    }

    pub fn size(&self) -> usize {
        self.window.len()
    }

    /// Number of bins written by [`process`](Self::process).
    pub fn bins(&self) -> usize {
        self.size() / 2
    }

    /// Windows `samples`, transforms them and writes one value per bin into
    /// `out`, mapped from `MIN_DB..=MAX_DB` onto `0..=1`.
    pub fn process(&mut self, samples: &[f32], out: &mut [f32]) -> Result<(), ScopeError> {
        if samples.len() != self.size() {
            return Err(ScopeError::BlockLength {
                expected: self.size(),
                actual: samples.len(),
            });
        }
        if out.len() != self.bins() {
            return Err(ScopeError::BlockLength {
                expected: self.bins(),
                actual: out.len(),
            });
        }

        for ((slot, &sample), &w) in self.buffer.iter_mut().zip(samples).zip(self.window.iter()) {
            *slot = Complex::new(sample * w, 0.0);
        }
        self.fft
            .process_with_scratch(&mut self.buffer, &mut self.scratch);

        for (value, bin) in out.iter_mut().zip(self.buffer.iter()) {
            let db = (gain_to_db(bin.norm()) - self.reference_db).clamp(MIN_DB, MAX_DB);
            *value = (db - MIN_DB) / (MAX_DB - MIN_DB);
        }
        Ok(())
    }
}

/// Symmetric Hann table scaled so its coefficients sum to `size`.
fn hann(size: usize) -> Box<[f32]> {
    let span = (size - 1) as f32;
    let mut table: Vec<f32> = (0..size)
        .map(|i| 0.5 - 0.5 * (TAU * i as f32 / span).cos())
        .collect();
    let sum: f32 = table.iter().sum();
    if sum > 0.0 {
        let scale = size as f32 / sum;
        table.iter_mut().for_each(|w| *w *= scale);
    }
    table.into_boxed_slice()
}

fn gain_to_db(gain: f32) -> f32 {
    if gain > 0.0 {
        (20.0 * gain.log10()).max(SILENCE_DB)
    } else {
        SILENCE_DB
    }
}
