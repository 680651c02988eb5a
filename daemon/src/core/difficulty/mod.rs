// Difficulty adjustment.
//
// A sliding window of (timestamp, height) samples over the last W
// finalized blocks. The controller retargets so the average block time
// converges on the configured target, with the adjustment slope bounded
// to [0.25, 4.0] per step and the result clamped to the difficulty
// bounds.
//
// Readers never take the window lock: the current target lives in a
// watch channel and is swapped once per adjustment.

use gradia_common::{
    config::ChainParams,
    difficulty::{mul_ratio, Difficulty},
    score::SCALE,
};
use log::trace;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

// Ratio arithmetic runs in thousandths: 1000 = 1.0
const RATIO_SCALE: u64 = 1_000;
const RATIO_MIN: u64 = 250;
const RATIO_MAX: u64 = 4_000;

// Quality multiplier bounds in SCALE units: [0.5, 1.5]
const QUALITY_MULTIPLIER_MIN: i64 = 5_000;
const QUALITY_MULTIPLIER_MAX: i64 = 15_000;

struct Window {
    samples: VecDeque<(u64, u64)>,
}

pub struct DifficultyController {
    params: Arc<ChainParams>,
    window: Mutex<Window>,
    current: watch::Sender<Difficulty>,
}

impl DifficultyController {
    pub fn new(params: Arc<ChainParams>, initial: Difficulty) -> Self {
        let initial = initial.clamp(params.minimum_difficulty, params.maximum_difficulty);
        let (current, _) = watch::channel(initial);
        Self {
            params,
            window: Mutex::new(Window {
                samples: VecDeque::new(),
            }),
            current,
        }
    }

    /// Current difficulty target, a snapshot read
    pub fn current(&self) -> Difficulty {
        *self.current.borrow()
    }

    /// Watch the target without ever taking the window lock
    pub fn subscribe(&self) -> watch::Receiver<Difficulty> {
        self.current.subscribe()
    }

    /// Record a finalized block into the sliding window
    pub fn record_block(&self, timestamp: u64, height: u64) {
        let mut window = self.window.lock().expect("difficulty window poisoned");
        window.samples.push_back((timestamp, height));
        while window.samples.len() > self.params.difficulty_window {
            window.samples.pop_front();
        }
    }

    /// Retarget from the observed window and publish the new target.
    /// With fewer than two samples, or an average exactly on target,
    /// the difficulty is unchanged.
    pub fn adjust(&self) -> Difficulty {
        let current = self.current();
        let next = {
            let window = self.window.lock().expect("difficulty window poisoned");
            let count = window.samples.len();
            if count < 2 {
                return current;
            }

            let first = window.samples.front().expect("window non-empty").0;
            let last = window.samples.back().expect("window non-empty").0;
            let avg_block_time = last.saturating_sub(first) / (count as u64 - 1);

            let ratio = (avg_block_time * RATIO_SCALE / self.params.target_block_time)
                .clamp(RATIO_MIN, RATIO_MAX);

            // next = current / ratio: fast blocks raise the bar
            mul_ratio(current, RATIO_SCALE, ratio)
                .clamp(self.params.minimum_difficulty, self.params.maximum_difficulty)
        };

        if next != current {
            trace!("difficulty retarget: {} -> {}", current, next);
            self.current.send_replace(next);
        }
        next
    }

    /// Miner-facing hint: scale the base target by
    /// clamp(1 - factor * (q - 0.5), 0.5, 1.5), giving high-quality
    /// work slight headroom. Never used in consensus checks.
    pub fn quality_adjusted(&self, quality: u64, factor: u64) -> Difficulty {
        debug_assert!(factor <= SCALE);
        let offset = quality as i64 - (SCALE / 2) as i64;
        let multiplier = (SCALE as i64 - factor as i64 * offset / SCALE as i64)
            .clamp(QUALITY_MULTIPLIER_MIN, QUALITY_MULTIPLIER_MAX);
        mul_ratio(self.current(), multiplier as u64, SCALE)
            .clamp(self.params.minimum_difficulty, self.params.maximum_difficulty)
    }
}
