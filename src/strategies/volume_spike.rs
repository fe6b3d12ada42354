//! Rolling-average volume spike detector.

use std::collections::{HashMap, VecDeque};

use super::AlertStrategy;
use crate::types::Ticker;

/// Fires when a symbol's 24h volume exceeds `multiplier` times its rolling
/// mean. Keeps a bounded ring of the last `lookback` samples per symbol
/// and stays quiet until the ring holds at least `lookback / 2` samples,
/// so a cold start cannot fire on noise.
pub struct VolumeSpike {
    symbols: Vec<String>,
    multiplier: f64,
    lookback: usize,
    history: HashMap<String, VecDeque<f64>>,
    fire_count: u64,
    last_message: String,
}

impl VolumeSpike {
    pub fn builder() -> VolumeSpikeBuilder {
        VolumeSpikeBuilder::default()
    }

    fn min_samples(&self) -> usize {
        (self.lookback / 2).max(1)
    }
}

impl AlertStrategy for VolumeSpike {
    fn check(&mut self, ticker: &Ticker) -> bool {
        if !self.symbols.iter().any(|s| s == &ticker.symbol) {
            return false;
        }

        let min_samples = self.min_samples();
        let lookback = self.lookback;
        let multiplier = self.multiplier;
        let ring = self
            .history
            .entry(ticker.symbol.clone())
            .or_insert_with(|| VecDeque::with_capacity(lookback));

        // Evaluate against history first, then fold the sample in - the
        // spike itself must not contribute to its own baseline.
        let mut spiked = false;
        let mut mean = 0.0;
        if ring.len() >= min_samples {
            mean = ring.iter().sum::<f64>() / ring.len() as f64;
            spiked = mean > 0.0 && ticker.volume_24h > multiplier * mean;
        }

        ring.push_back(ticker.volume_24h);
        if ring.len() > lookback {
            ring.pop_front();
        }

        if spiked {
            self.fire_count += 1;
            self.last_message = format!(
                "Volume spike on {}: {:.2} vs {:.2} average ({:.1}x)",
                ticker.symbol,
                ticker.volume_24h,
                mean,
                ticker.volume_24h / mean
            );
        }
        spiked
    }

    fn name(&self) -> &str {
        "VolumeSpike"
    }

    fn symbols(&self) -> Vec<String> {
        self.symbols.clone()
    }

    fn reset(&mut self) {
        self.history.clear();
    }

    fn fire_count(&self) -> u64 {
        self.fire_count
    }

    fn last_message(&self) -> String {
        self.last_message.clone()
    }
}

pub struct VolumeSpikeBuilder {
    symbols: Vec<String>,
    multiplier: f64,
    lookback: usize,
}

impl Default for VolumeSpikeBuilder {
    fn default() -> Self {
        Self {
            symbols: Vec::new(),
            multiplier: 2.0,
            lookback: 20,
        }
    }
}

impl VolumeSpikeBuilder {
    pub fn symbols<I, S>(mut self, symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.symbols = symbols.into_iter().map(Into::into).collect();
        self
    }

    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn lookback(mut self, lookback: usize) -> Self {
        self.lookback = lookback.max(1);
        self
    }

    pub fn build(self) -> VolumeSpike {
        VolumeSpike {
            symbols: self.symbols,
            multiplier: self.multiplier,
            lookback: self.lookback,
            history: HashMap::new(),
            fire_count: 0,
            last_message: String::new(),
        }
    }
}
