//! Oscilloscope-style trigger capture.
//!
//! Scans the audio stream for a rising edge through the trigger level and
//! copies the block of samples that follows into the [`BlockProducer`].

use crate::queue::{BlockProducer, Push};

pub const DEFAULT_TRIGGER_LEVEL: f32 = 0.05;

/// Loaded into `previous` after a capture so the edge that started it cannot
/// fire again.
const RETRIGGER_GUARD: f32 = f32::INFINITY;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CaptureState {
    WaitingForTrigger,
    Collecting,
}

pub struct TriggerCapture {
    queue: BlockProducer,
    scratch: Box<[f32]>,
    collected: usize,
    previous: f32,
    trigger_level: f32,
    state: CaptureState,
}

impl TriggerCapture {
    pub fn new(queue: BlockProducer, trigger_level: f32) -> Self {
        let scratch = vec![0.0; queue.block_size()].into_boxed_slice();
        Self {
            queue,
            scratch,
            collected: 0,
            previous: RETRIGGER_GUARD,
            trigger_level,
            state: CaptureState::WaitingForTrigger,
        }
    }

    /// Feeds the next chunk of the stream. Chunks may be any length; state
    /// carries over between calls, so the captured blocks do not depend on
    /// how the stream was split.
    ///
    /// The sample that crosses the trigger level is not part of the block;
    /// collection starts with the sample after it.
    pub fn process(&mut self, samples: &[f32]) {
        let mut rest = samples;
        while !rest.is_empty() {
            rest = match self.state {
                CaptureState::WaitingForTrigger => self.scan_for_trigger(rest),
                CaptureState::Collecting => self.collect(rest),
            };
        }
    }

    fn scan_for_trigger<'a>(&mut self, samples: &'a [f32]) -> &'a [f32] {
        for (i, &current) in samples.iter().enumerate() {
            if self.previous < self.trigger_level && current >= self.trigger_level {
                self.collected = 0;
                self.state = CaptureState::Collecting;
                return &samples[i + 1..];
            }
            self.previous = current;
        }
        &[]
    }

    fn collect<'a>(&mut self, samples: &'a [f32]) -> &'a [f32] {
        let wanted = self.scratch.len() - self.collected;
        let take = wanted.min(samples.len());
        self.scratch[self.collected..self.collected + take].copy_from_slice(&samples[..take]);
        self.collected += take;

        if self.collected == self.scratch.len() {
            // Scratch always matches the queue's block size, and a full
            // queue is already counted by the producer.
            let _: Result<Push, _> = self.queue.push(&self.scratch);
            self.previous = RETRIGGER_GUARD;
            self.state = CaptureState::WaitingForTrigger;
        }
        &samples[take..]
    }

    /// Abandons any partial block and waits for a fresh edge.
    pub fn reset(&mut self) {
        self.collected = 0;
        self.previous = RETRIGGER_GUARD;
        self.state = CaptureState::WaitingForTrigger;
    }

    pub fn set_trigger_level(&mut self, level: f32) {
        self.trigger_level = level;
    }

    pub fn trigger_level(&self) -> f32 {
        self.trigger_level
    }

    #[cfg(test)]
    pub fn state(&self) -> CaptureState {
        self.state
    }

    /// Samples gathered so far into the block in progress.
    #[cfg(test)]
    pub fn collected(&self) -> usize {
        self.collected
    }

    #[cfg(test)]
    pub fn dropped(&self) -> u64 {
        self.queue.dropped()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{BLOCK_SIZE, BlockConsumer, BlockQueue, NUM_SLOTS};
    use proptest::prelude::*;

    fn drain(rx: &mut BlockConsumer) -> Vec<Vec<f32>> {
        let mut blocks = Vec::new();
        let mut out = vec![0.0; rx.block_size()];
        while rx.pop(&mut out).unwrap() {
            blocks.push(out.clone());
        }
        blocks
    }

    #[test]
    fn captures_block_after_crossing_sample() {
        let (tx, mut rx) = BlockQueue::new(4, 2).unwrap();
        let mut capture = TriggerCapture::new(tx, 0.0);

        capture.process(&[-1.0, -1.0, 1.0, 2.0, 3.0, 4.0, -1.0, -1.0, 1.0, 5.0, 6.0, 7.0]);

        assert_eq!(drain(&mut rx), vec![vec![2.0, 3.0, 4.0, -1.0]]);
        // The second edge at index 8 started a block that is still short.
        assert_eq!(capture.state(), CaptureState::Collecting);
        assert_eq!(capture.collected(), 3);
    }

    #[test]
    fn first_sample_follows_crossing() {
        let level = DEFAULT_TRIGGER_LEVEL;
        let (tx, mut rx) = BlockQueue::with_defaults().unwrap();
        let mut capture = TriggerCapture::new(tx, level);

        let mut stream = vec![level - 0.01; 100];
        stream.push(level + 0.01);
        stream.extend((0..BLOCK_SIZE).map(|i| i as f32 * -0.001 - 1.0));
        capture.process(&stream);

        let blocks = drain(&mut rx);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0][0], -1.0);
        assert_eq!(blocks[0], stream[101..101 + BLOCK_SIZE]);
    }

    #[test]
    fn level_at_threshold_counts_as_crossing() {
        let (tx, mut rx) = BlockQueue::new(2, 2).unwrap();
        let mut capture = TriggerCapture::new(tx, 0.5);
        capture.process(&[0.0, 0.5, 9.0, 8.0]);
        assert_eq!(drain(&mut rx), vec![vec![9.0, 8.0]]);
    }

    #[test]
    fn no_trigger_without_rising_edge() {
        let (tx, mut rx) = BlockQueue::new(2, 2).unwrap();
        let mut capture = TriggerCapture::new(tx, 0.0);
        // Starts high, then only falls.
        capture.process(&[1.0, 0.5, 0.2, -0.3, -1.0]);
        assert!(drain(&mut rx).is_empty());
        assert_eq!(capture.state(), CaptureState::WaitingForTrigger);
    }

    #[test]
    fn guard_blocks_retrigger_on_same_level() {
        let (tx, mut rx) = BlockQueue::new(2, 4).unwrap();
        let mut capture = TriggerCapture::new(tx, 0.0);
        // Block ends while the signal is still high; no new edge until it dips.
        capture.process(&[-1.0, 1.0, 1.0, 1.0, 1.0, 1.0, -1.0, 1.0, 3.0, 4.0]);
        assert_eq!(drain(&mut rx), vec![vec![1.0, 1.0], vec![3.0, 4.0]]);
    }

    #[test]
    fn nan_never_triggers() {
        let (tx, mut rx) = BlockQueue::new(2, 2).unwrap();
        let mut capture = TriggerCapture::new(tx, 0.0);
        capture.process(&[-1.0, f32::NAN, 1.0, 2.0, 3.0]);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn completes_many_blocks_in_one_call() {
        let (tx, mut rx) = BlockQueue::with_defaults().unwrap();
        let mut capture = TriggerCapture::new(tx, DEFAULT_TRIGGER_LEVEL);
        let stream: Vec<f32> = (0..10 * BLOCK_SIZE)
            .map(|i| (i as f32 * 0.07).sin())
            .collect();
        capture.process(&stream);

        let blocks = drain(&mut rx);
        assert!(blocks.len() >= 2);
        assert!(blocks.len() <= NUM_SLOTS);
    }

    #[test]
    fn overrun_drops_newest_capture() {
        let (tx, rx) = BlockQueue::new(2, 1).unwrap();
        let mut capture = TriggerCapture::new(tx, 0.0);
        capture.process(&[-1.0, 1.0, 2.0, 3.0, -1.0, 1.0, 4.0, 5.0]);
        assert_eq!(capture.dropped(), 1);
        assert_eq!(rx.len(), 1);
    }

    #[test]
    fn reset_discards_partial_block() {
        let (tx, mut rx) = BlockQueue::new(4, 2).unwrap();
        let mut capture = TriggerCapture::new(tx, 0.0);
        capture.process(&[-1.0, 1.0, 2.0]);
        capture.reset();
        capture.process(&[3.0, 4.0, 5.0]);
        assert!(drain(&mut rx).is_empty());
        assert_eq!(capture.state(), CaptureState::WaitingForTrigger);
    }

    fn capture_in_chunks(stream: &[f32], chunk: usize) -> Vec<Vec<f32>> {
        let (tx, mut rx) = BlockQueue::new(16, 64).unwrap();
        let mut capture = TriggerCapture::new(tx, DEFAULT_TRIGGER_LEVEL);
        for piece in stream.chunks(chunk) {
            capture.process(piece);
        }
        drain(&mut rx)
    }

    #[test]
    fn single_sample_and_oversized_chunks_agree() {
        let stream: Vec<f32> = (0..400).map(|i| (i as f32 * 0.31).sin()).collect();
        let whole = capture_in_chunks(&stream, stream.len());
        assert!(!whole.is_empty());
        assert_eq!(capture_in_chunks(&stream, 1), whole);
        assert_eq!(capture_in_chunks(&stream, 160), whole);
    }

    proptest! {
        #[test]
        fn chunking_does_not_change_captures(
            stream in prop::collection::vec(-1.0f32..1.0, 0..600),
            chunk in 1usize..200,
        ) {
            let whole = capture_in_chunks(&stream, stream.len().max(1));
            prop_assert_eq!(capture_in_chunks(&stream, chunk), whole);
        }
    }
}
