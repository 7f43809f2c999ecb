use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::analysis::indicators::{
    macd_series, rsi_series, stochastic_series, MACD_FAST, MACD_SIGNAL, MACD_SLOW, RSI_PERIOD,
    STOCH_D_PERIOD, STOCH_K_PERIOD,
};
use crate::analysis::{
    keys, Analysis, AnalysisError, MarketAnalyzer, StateInfo, TechnicalIndicators, TradingSignals,
};
use crate::types::MarketData;

/// Bars needed to fill the stochastic window and smooth %D once.
pub const MIN_BARS: usize = STOCH_K_PERIOD + STOCH_D_PERIOD - 1;

pub const DEFAULT_STATES: usize = 3;

const POWER_ITERATIONS: usize = 200;
const POWER_TOLERANCE: f64 = 1e-10;

/// Market-state identification over engineered technical features.
///
/// Every bar is described by its log return, RSI, MACD histogram (relative to
/// price), stochastic %K and volume z-score. The standardized features are
/// projected onto their first principal component and bars are labeled by
/// quantile of that projection, state 0 being the lowest. The sign of the
/// component is fixed so that higher states lean towards positive returns.
#[derive(Debug, Clone)]
pub struct RegimeAnalyzer {
    n_states: usize,
}

impl RegimeAnalyzer {
    pub fn new(n_states: usize) -> Self {
        Self { n_states: n_states.max(1) }
    }

    pub fn analyze_bars(&self, symbol: &str, data: &MarketData) -> Result<Analysis, AnalysisError> {
        let bars = &data.bars;
        let n = bars.len();
        if n < MIN_BARS.max(self.n_states) {
            return Err(AnalysisError::InsufficientData {
                symbol: symbol.to_string(),
                needed: MIN_BARS.max(self.n_states),
                got: n,
            });
        }

        if let Some(bad) = bars.iter().find(|b| {
            ![b.open, b.high, b.low, b.close, b.volume].iter().all(|v| v.is_finite()) || b.close <= 0.0
        }) {
            return Err(AnalysisError::InvalidData {
                symbol: symbol.to_string(),
                reason: format!("bar at {} has a non-finite or non-positive value", bad.date),
            });
        }

        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let highs: Vec<f64> = bars.iter().map(|b| b.high).collect();
        let lows: Vec<f64> = bars.iter().map(|b| b.low).collect();
        let volumes: Vec<f64> = bars.iter().map(|b| b.volume).collect();

        let rsi = rsi_series(&closes, RSI_PERIOD);
        let (macd, macd_signal) = macd_series(&closes, MACD_FAST, MACD_SLOW, MACD_SIGNAL);
        let (stoch_k, stoch_d) = stochastic_series(&highs, &lows, &closes, STOCH_K_PERIOD, STOCH_D_PERIOD);

        let mut returns = vec![0.0; n];
        for i in 1..n {
            returns[i] = (closes[i] / closes[i - 1]).ln();
        }

        let (vol_mean, vol_std) = mean_std(&volumes);
        let features: Vec<[f64; 5]> = (0..n)
            .map(|i| {
                let volume_z = if vol_std > 0.0 { (volumes[i] - vol_mean) / vol_std } else { 0.0 };
                [
                    returns[i],
                    rsi[i] / 100.0,
                    (macd[i] - macd_signal[i]) / closes[i],
                    stoch_k[i] / 100.0,
                    volume_z,
                ]
            })
            .collect();

        let projection = first_component_projection(&features);
        let labels = quantile_labels(&projection, self.n_states);
        let characteristics = state_characteristics(&labels, &returns, &volumes, self.n_states);

        let signals = trading_signals(&rsi, &macd, &macd_signal, &stoch_k, &closes);
        let current = labels[n - 1];
        let confidence = signals
            .confidence
            .last()
            .copied()
            .ok_or(AnalysisError::MissingOutput("confidence"))?;

        Ok(Analysis {
            state_info: StateInfo {
                state: current as i64,
                characteristics: characteristics[current].clone(),
                confidence,
            },
            signals,
            indicators: TechnicalIndicators {
                rsi,
                macd,
                macd_signal,
                stoch_k,
                stoch_d,
            },
        })
    }
}

impl Default for RegimeAnalyzer {
    fn default() -> Self {
        Self::new(DEFAULT_STATES)
    }
}

#[async_trait]
impl MarketAnalyzer for RegimeAnalyzer {
    async fn analyze(&self, symbol: &str, data: &MarketData) -> Result<Analysis, AnalysisError> {
        self.analyze_bars(symbol, data)
    }
}

fn mean_std(xs: &[f64]) -> (f64, f64) {
    if xs.is_empty() {
        return (0.0, 0.0);
    }
    let n = xs.len() as f64;
    let mean = xs.iter().sum::<f64>() / n;
    let var = xs.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

/// Projection of each standardized row onto the covariance matrix's dominant
/// eigenvector (power iteration). All zeros if the features carry no variance.
fn first_component_projection<const D: usize>(rows: &[[f64; D]]) -> Vec<f64> {
    let n = rows.len();
    if n == 0 {
        return Vec::new();
    }

    let mut z = rows.to_vec();
    for j in 0..D {
        let column: Vec<f64> = rows.iter().map(|r| r[j]).collect();
        let (mean, std) = mean_std(&column);
        for row in z.iter_mut() {
            row[j] = if std > 0.0 { (row[j] - mean) / std } else { 0.0 };
        }
    }

    let mut cov = [[0.0; D]; D];
    for row in &z {
        for a in 0..D {
            for b in 0..D {
                cov[a][b] += row[a] * row[b] / n as f64;
            }
        }
    }

    let mut v = [1.0 / (D as f64).sqrt(); D];
    for _ in 0..POWER_ITERATIONS {
        let mut next = [0.0; D];
        for a in 0..D {
            next[a] = (0..D).map(|b| cov[a][b] * v[b]).sum();
        }
        let norm = next.iter().map(|x| x * x).sum::<f64>().sqrt();
        if norm == 0.0 || !norm.is_finite() {
            return vec![0.0; n];
        }
        for x in next.iter_mut() {
            *x /= norm;
        }
        let delta: f64 = next.iter().zip(v.iter()).map(|(a, b)| (a - b).abs()).sum();
        v = next;
        if delta < POWER_TOLERANCE {
            break;
        }
    }

    // Orient the component along the return feature.
    if v[0] < 0.0 {
        for x in v.iter_mut() {
            *x = -*x;
        }
    }

    z.iter()
        .map(|row| row.iter().zip(v.iter()).map(|(a, b)| a * b).sum())
        .collect()
}

/// Label each value by its rank quantile: 0 for the lowest `1/k` of values up
/// to `k - 1` for the highest. Ties keep input order.
fn quantile_labels(values: &[f64], k: usize) -> Vec<usize> {
    let n = values.len();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    let mut labels = vec![0; n];
    for (rank, &idx) in order.iter().enumerate() {
        labels[idx] = (rank * k / n).min(k - 1);
    }
    labels
}

/// Characteristics for every state, each normalized into [0, 1] relative to
/// the other states of the same history.
fn state_characteristics(
    labels: &[usize],
    returns: &[f64],
    volumes: &[f64],
    k: usize,
) -> Vec<BTreeMap<String, f64>> {
    // The first bar has no return.
    let state_returns: Vec<Vec<f64>> = (0..k)
        .map(|s| (1..labels.len()).filter(|&i| labels[i] == s).map(|i| returns[i]).collect())
        .collect();
    let state_volume: Vec<f64> = (0..k)
        .map(|s| {
            let v: Vec<f64> = (0..labels.len()).filter(|&i| labels[i] == s).map(|i| volumes[i]).collect();
            mean_std(&v).0
        })
        .collect();
    let state_std: Vec<f64> = state_returns.iter().map(|r| mean_std(r).1).collect();

    let all = &returns[1..];
    let overall_range = all.iter().copied().fold(f64::MIN, f64::max) - all.iter().copied().fold(f64::MAX, f64::min);
    let max_std = state_std.iter().copied().fold(0.0, f64::max);
    let max_volume = state_volume.iter().copied().fold(0.0, f64::max);

    (0..k)
        .map(|s| {
            let r = &state_returns[s];
            let mean_abs = if r.is_empty() { 0.0 } else { r.iter().map(|x| x.abs()).sum::<f64>() / r.len() as f64 };
            let mean = mean_std(r).0;
            let range = if r.is_empty() {
                0.0
            } else {
                r.iter().copied().fold(f64::MIN, f64::max) - r.iter().copied().fold(f64::MAX, f64::min)
            };

            let mut c = BTreeMap::new();
            c.insert(keys::VOLATILITY.to_string(), ratio(state_std[s], max_std));
            c.insert(keys::TREND_STRENGTH.to_string(), ratio(mean.abs(), mean_abs));
            c.insert(keys::VOLUME.to_string(), ratio(state_volume[s], max_volume));
            c.insert(keys::RETURN_DISPERSION.to_string(), ratio(range, overall_range));
            c
        })
        .collect()
}

fn ratio(num: f64, den: f64) -> f64 {
    if den > 0.0 && den.is_finite() {
        (num / den).clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Composite signal: mean of RSI reversion, MACD momentum and stochastic
/// reversion. Confidence measures how much the components agree.
fn trading_signals(
    rsi: &[f64],
    macd: &[f64],
    macd_signal: &[f64],
    stoch_k: &[f64],
    closes: &[f64],
) -> TradingSignals {
    let mut signals = TradingSignals::default();
    for i in 0..closes.len() {
        let components = [
            (50.0 - rsi[i]) / 50.0,
            ((macd[i] - macd_signal[i]) / closes[i] * 100.0).tanh(),
            (50.0 - stoch_k[i]) / 50.0,
        ];
        let sum: f64 = components.iter().sum();
        let abs_sum: f64 = components.iter().map(|c| c.abs()).sum();

        signals.composite_signal.push((sum / components.len() as f64).clamp(-1.0, 1.0));
        signals.confidence.push(ratio(sum.abs(), abs_sum));
    }
    signals
}
