//! Technical indicators over daily bars.
//!
//! Each indicator is a small stateful type updated one bar at a time; the
//! `*_series` helpers run them over a whole history and return one value per
//! bar, so every series lines up with the input.

use std::collections::VecDeque;

pub const RSI_PERIOD: usize = 14;
pub const MACD_FAST: usize = 12;
pub const MACD_SLOW: usize = 26;
pub const MACD_SIGNAL: usize = 9;
pub const STOCH_K_PERIOD: usize = 14;
pub const STOCH_D_PERIOD: usize = 3;

/// Exponential moving average seeded with the first value.
#[derive(Debug, Clone)]
pub struct Ema {
    value: f64,
    alpha: f64,
    initialized: bool,
}

impl Ema {
    pub fn new(period: usize) -> Self {
        Self {
            value: 0.0,
            alpha: 2.0 / (period as f64 + 1.0),
            initialized: false,
        }
    }

    pub fn update(&mut self, x: f64) -> f64 {
        if self.initialized {
            self.value = self.value * (1.0 - self.alpha) + x * self.alpha;
        } else {
            self.value = x;
            self.initialized = true;
        }
        self.value
    }
}

/// Relative Strength Index with Wilder smoothing after the first `period` changes.
#[derive(Debug, Clone)]
pub struct Rsi {
    period: usize,
    avg_gain: f64,
    avg_loss: f64,
    prev: Option<f64>,
    count: usize,
}

impl Rsi {
    pub fn new(period: usize) -> Self {
        Self {
            period,
            avg_gain: 0.0,
            avg_loss: 0.0,
            prev: None,
            count: 0,
        }
    }

    pub fn update(&mut self, close: f64) -> f64 {
        if let Some(prev) = self.prev {
            let change = close - prev;
            let gain = change.max(0.0);
            let loss = (-change).max(0.0);
            self.count += 1;

            if self.count <= self.period {
                let n = self.count as f64;
                self.avg_gain = (self.avg_gain * (n - 1.0) + gain) / n;
                self.avg_loss = (self.avg_loss * (n - 1.0) + loss) / n;
            } else {
                let alpha = 1.0 / self.period as f64;
                self.avg_gain = self.avg_gain * (1.0 - alpha) + gain * alpha;
                self.avg_loss = self.avg_loss * (1.0 - alpha) + loss * alpha;
            }
        }
        self.prev = Some(close);
        self.value()
    }

    pub fn value(&self) -> f64 {
        if self.avg_loss == 0.0 {
            if self.avg_gain == 0.0 {
                50.0
            } else {
                100.0
            }
        } else {
            let rs = self.avg_gain / self.avg_loss;
            100.0 - 100.0 / (1.0 + rs)
        }
    }
}

/// Stochastic oscillator: %K over a rolling high/low window, %D as an SMA of %K.
#[derive(Debug, Clone)]
pub struct Stochastic {
    k_period: usize,
    d_period: usize,
    highs: VecDeque<f64>,
    lows: VecDeque<f64>,
    ks: VecDeque<f64>,
}

impl Stochastic {
    pub fn new(k_period: usize, d_period: usize) -> Self {
        Self {
            k_period,
            d_period,
            highs: VecDeque::with_capacity(k_period),
            lows: VecDeque::with_capacity(k_period),
            ks: VecDeque::with_capacity(d_period),
        }
    }

    /// Returns (%K, %D). A flat window reads as 50.
    pub fn update(&mut self, high: f64, low: f64, close: f64) -> (f64, f64) {
        push_bounded(&mut self.highs, high, self.k_period);
        push_bounded(&mut self.lows, low, self.k_period);

        let highest = self.highs.iter().copied().fold(f64::MIN, f64::max);
        let lowest = self.lows.iter().copied().fold(f64::MAX, f64::min);
        let range = highest - lowest;
        let k = if range > 0.0 {
            ((close - lowest) / range * 100.0).clamp(0.0, 100.0)
        } else {
            50.0
        };

        push_bounded(&mut self.ks, k, self.d_period);
        let d = self.ks.iter().sum::<f64>() / self.ks.len() as f64;
        (k, d)
    }
}

fn push_bounded(buf: &mut VecDeque<f64>, x: f64, cap: usize) {
    buf.push_back(x);
    while buf.len() > cap {
        buf.pop_front();
    }
}

pub fn rsi_series(closes: &[f64], period: usize) -> Vec<f64> {
    let mut rsi = Rsi::new(period);
    closes.iter().map(|c| rsi.update(*c)).collect()
}

/// (MACD line, signal line).
pub fn macd_series(closes: &[f64], fast: usize, slow: usize, signal: usize) -> (Vec<f64>, Vec<f64>) {
    let mut fast_ema = Ema::new(fast);
    let mut slow_ema = Ema::new(slow);
    let mut signal_ema = Ema::new(signal);

    closes
        .iter()
        .map(|c| {
            let macd = fast_ema.update(*c) - slow_ema.update(*c);
            (macd, signal_ema.update(macd))
        })
        .unzip()
}

/// (%K, %D).
pub fn stochastic_series(
    highs: &[f64],
    lows: &[f64],
    closes: &[f64],
    k_period: usize,
    d_period: usize,
) -> (Vec<f64>, Vec<f64>) {
    let mut stoch = Stochastic::new(k_period, d_period);
    highs
        .iter()
        .zip(lows)
        .zip(closes)
        .map(|((h, l), c)| stoch.update(*h, *l, *c))
        .unzip()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ema_seeds_with_first_value() {
        let mut ema = Ema::new(9);
        assert_eq!(ema.update(10.0), 10.0);
        let next = ema.update(20.0);
        assert!((next - 12.0).abs() < 1e-12, "next={next}");
    }

    #[test]
    fn rsi_extremes_and_flat() {
        let up: Vec<f64> = (1..=30).map(f64::from).collect();
        assert_eq!(*rsi_series(&up, RSI_PERIOD).last().unwrap(), 100.0);

        let down: Vec<f64> = (1..=30).rev().map(f64::from).collect();
        assert!(rsi_series(&down, RSI_PERIOD).last().unwrap().abs() < 1e-9);

        let flat = vec![5.0; 20];
        assert!(rsi_series(&flat, RSI_PERIOD).iter().all(|v| *v == 50.0));
    }

    #[test]
    fn rsi_stays_in_bounds() {
        let closes = [10.0, 10.5, 10.2, 10.8, 10.1, 9.9, 10.4, 10.9, 11.2, 10.7, 10.3, 10.6];
        assert!(rsi_series(&closes, RSI_PERIOD).iter().all(|v| (0.0..=100.0).contains(v)));
    }

    #[test]
    fn macd_of_constant_series_is_zero() {
        let (macd, signal) = macd_series(&[42.0; 40], MACD_FAST, MACD_SLOW, MACD_SIGNAL);
        assert_eq!(macd.len(), 40);
        assert!(macd.iter().chain(signal.iter()).all(|v| v.abs() < 1e-12));
    }

    #[test]
    fn macd_is_positive_in_an_uptrend() {
        let closes: Vec<f64> = (0..40).map(|i| 100.0 + i as f64).collect();
        let (macd, _) = macd_series(&closes, MACD_FAST, MACD_SLOW, MACD_SIGNAL);
        assert!(*macd.last().unwrap() > 0.0);
    }

    #[test]
    fn stochastic_close_at_high_reads_100() {
        let highs = [10.0, 11.0, 12.0, 13.0];
        let lows = [9.0, 10.0, 11.0, 12.0];
        let closes = [9.5, 10.5, 11.5, 13.0];
        let (k, d) = stochastic_series(&highs, &lows, &closes, STOCH_K_PERIOD, STOCH_D_PERIOD);
        assert_eq!(*k.last().unwrap(), 100.0);
        assert!(d.iter().all(|v| (0.0..=100.0).contains(v)));
    }

    #[test]
    fn stochastic_flat_window_reads_50() {
        let (k, d) = stochastic_series(&[5.0; 5], &[5.0; 5], &[5.0; 5], STOCH_K_PERIOD, STOCH_D_PERIOD);
        assert!(k.iter().chain(d.iter()).all(|v| *v == 50.0));
    }
}
