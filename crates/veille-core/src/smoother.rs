//! Rolling-window RSSI smoothing.
//!
//! Raw signal readings jitter by several dBm between advertisements. Each
//! beacon keeps a short FIFO of its latest readings and the smoothed value is
//! the mean of that window, with the fractional part dropped.

use std::collections::{HashMap, VecDeque};

use crate::types::BeaconAddress;

/// Default number of readings kept per beacon.
pub const DEFAULT_WINDOW_SIZE: usize = 5;

/// Per-beacon moving average of raw signal readings.
#[derive(Debug, Clone)]
pub struct SignalSmoother {
    window_size: usize,
    windows: HashMap<BeaconAddress, VecDeque<i16>>,
}

impl SignalSmoother {
    /// Create a smoother averaging at most `window_size` readings per beacon.
    #[must_use]
    pub fn new(window_size: usize) -> Self {
        Self {
            window_size: window_size.max(1),
            windows: HashMap::new(),
        }
    }

    /// Change the window capacity. Windows are trimmed on their next reading.
    pub fn set_window_size(&mut self, window_size: usize) {
        self.window_size = window_size.max(1);
    }

    /// Record `raw` for `address` and return the smoothed value.
    // Integer division truncates toward zero; the mean of i16 values fits in i16.
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    pub fn observe(&mut self, address: &BeaconAddress, raw: i16) -> i16 {
        let window = self
            .windows
            .entry(address.clone())
            .or_insert_with(|| VecDeque::with_capacity(self.window_size));

        window.push_back(raw);
        while window.len() > self.window_size {
            window.pop_front();
        }

        let sum: i32 = window.iter().copied().map(i32::from).sum();
        (sum / window.len() as i32) as i16
    }

    /// Drop the window of `address`; its next reading starts afresh.
    pub fn forget(&mut self, address: &BeaconAddress) {
        self.windows.remove(address);
    }

    /// Drop every window.
    pub fn clear(&mut self) {
        self.windows.clear();
    }

    /// Number of readings currently held for `address`.
    #[must_use]
    pub fn sample_count(&self, address: &BeaconAddress) -> usize {
        self.windows.get(address).map_or(0, VecDeque::len)
    }
}

impl Default for SignalSmoother {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_SIZE)
    }
}
