use std::collections::BTreeMap;

use thiserror::Error;

use crate::analysis::{keys, StateInfo, TechnicalIndicators, TradingSignals};

pub const TREND_WEIGHT: f64 = 0.4;
pub const SIGNAL_WEIGHT: f64 = 0.3;
pub const VOLUME_WEIGHT: f64 = 0.2;
pub const CONFIDENCE_WEIGHT: f64 = 0.1;

/// Volatility above this level discounts the whole score.
pub const VOLATILITY_THRESHOLD: f64 = 0.5;
pub const VOLATILITY_PENALTY_WEIGHT: f64 = 0.2;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScoreError {
    /// The analyzer did not provide a metric the score depends on.
    #[error("missing metric: {0}")]
    MissingMetric(String),
}

/// A score together with the validated inputs it was computed from.
#[derive(Debug, Clone, PartialEq)]
pub struct Score {
    /// In [0, 1].
    pub value: f64,
    /// Latest composite signal.
    pub signal: f64,
    /// The characteristics named in [`keys::ALL`].
    pub characteristics: BTreeMap<String, f64>,
}

/// Opportunity score from the analyzer's outputs.
///
/// Requires every key of [`keys::ALL`] in the state characteristics and a
/// non-empty composite signal. `trend_strength`, `volume` and `volatility` are
/// weighted together with the latest signal and the state confidence.
/// Technical indicators are not weighted.
pub fn score(
    state_info: &StateInfo,
    signals: &TradingSignals,
    _indicators: &TechnicalIndicators,
) -> Result<Score, ScoreError> {
    let metric = |key: &str| {
        state_info
            .characteristics
            .get(key)
            .copied()
            .ok_or_else(|| ScoreError::MissingMetric(key.to_string()))
    };

    let volatility = metric(keys::VOLATILITY)?;
    let trend_strength = metric(keys::TREND_STRENGTH)?;
    let volume = metric(keys::VOLUME)?;
    let return_dispersion = metric(keys::RETURN_DISPERSION)?;
    let signal = signals
        .composite_signal
        .last()
        .copied()
        .ok_or_else(|| ScoreError::MissingMetric("composite_signal".to_string()))?;

    let characteristics = keys::ALL
        .iter()
        .zip([volatility, trend_strength, volume, return_dispersion])
        .map(|(k, v)| (k.to_string(), v))
        .collect();

    Ok(Score {
        value: compute_score(trend_strength, signal, volume, state_info.confidence, volatility),
        signal,
        characteristics,
    })
}

/// Weighted sum of trend, signal magnitude, volume and confidence, discounted
/// for volatility above [`VOLATILITY_THRESHOLD`] and clipped into [0, 1].
pub fn compute_score(trend_strength: f64, signal: f64, volume: f64, confidence: f64, volatility: f64) -> f64 {
    let trend_score = trend_strength * TREND_WEIGHT;
    let signal_score = signal.abs() * SIGNAL_WEIGHT;
    let volume_score = volume * VOLUME_WEIGHT;
    let confidence_score = confidence * CONFIDENCE_WEIGHT;

    let raw = (trend_score + signal_score + volume_score + confidence_score) * (1.0 - volatility_penalty(volatility));

    if raw.is_nan() {
        0.0
    } else {
        raw.clamp(0.0, 1.0)
    }
}

pub fn volatility_penalty(volatility: f64) -> f64 {
    (volatility - VOLATILITY_THRESHOLD).max(0.0) * VOLATILITY_PENALTY_WEIGHT
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn state(volatility: f64, trend: f64, volume: f64, confidence: f64) -> StateInfo {
        let mut characteristics = BTreeMap::new();
        characteristics.insert(keys::VOLATILITY.to_string(), volatility);
        characteristics.insert(keys::TREND_STRENGTH.to_string(), trend);
        characteristics.insert(keys::VOLUME.to_string(), volume);
        characteristics.insert(keys::RETURN_DISPERSION.to_string(), 0.3);
        StateInfo { state: 1, characteristics, confidence }
    }

    fn signals(latest: f64) -> TradingSignals {
        TradingSignals {
            composite_signal: vec![0.0, latest],
            confidence: vec![0.5, 0.5],
        }
    }

    #[test]
    fn full_inputs_at_max_volatility_score_point_nine() {
        let s = score(&state(1.0, 1.0, 1.0, 1.0), &signals(-1.0), &TechnicalIndicators::default()).unwrap();
        assert!((s.value - 0.9).abs() < 1e-12, "score={}", s.value);
        assert_eq!(s.signal, -1.0);
    }

    #[test]
    fn no_penalty_at_or_below_threshold() {
        assert_eq!(volatility_penalty(0.5), 0.0);
        assert_eq!(volatility_penalty(0.2), 0.0);
        assert_eq!(volatility_penalty(-3.0), 0.0);
        assert!(volatility_penalty(0.75) > 0.0);

        let low = compute_score(0.5, 0.5, 0.5, 0.5, 0.5);
        let expected = 0.5 * 0.4 + 0.5 * 0.3 + 0.5 * 0.2 + 0.5 * 0.1;
        assert!((low - expected).abs() < 1e-12);
    }

    #[test]
    fn missing_characteristic_is_an_error() {
        let mut st = state(0.3, 0.6, 0.4, 0.8);
        st.characteristics.remove(keys::VOLUME);
        let err = score(&st, &signals(0.5), &TechnicalIndicators::default()).unwrap_err();
        assert_eq!(err, ScoreError::MissingMetric("volume".to_string()));
    }

    #[test]
    fn return_dispersion_is_required() {
        let mut st = state(0.3, 0.6, 0.4, 0.8);
        st.characteristics.remove(keys::RETURN_DISPERSION);
        let err = score(&st, &signals(0.5), &TechnicalIndicators::default()).unwrap_err();
        assert_eq!(err, ScoreError::MissingMetric("return_dispersion".to_string()));
    }

    #[test]
    fn score_carries_only_the_validated_characteristics() {
        let mut st = state(0.3, 0.6, 0.4, 0.8);
        st.characteristics.insert("extra".to_string(), 9.0);
        let s = score(&st, &signals(0.5), &TechnicalIndicators::default()).unwrap();
        let names: Vec<&str> = s.characteristics.keys().map(String::as_str).collect();
        let mut expected = keys::ALL.to_vec();
        expected.sort();
        assert_eq!(names, expected);
        assert_eq!(s.characteristics[keys::RETURN_DISPERSION], 0.3);
    }

    #[test]
    fn empty_signal_series_is_an_error() {
        let err = score(&state(0.3, 0.6, 0.4, 0.8), &TradingSignals::default(), &TechnicalIndicators::default())
            .unwrap_err();
        assert_eq!(err, ScoreError::MissingMetric("composite_signal".to_string()));
    }

    #[test]
    fn oversized_inputs_are_clipped() {
        assert_eq!(compute_score(10.0, 10.0, 10.0, 10.0, 0.0), 1.0);
        assert_eq!(compute_score(-10.0, 0.0, -10.0, -10.0, 0.0), 0.0);
        assert_eq!(compute_score(f64::NAN, 0.0, 0.0, 0.0, 0.0), 0.0);
    }

    proptest! {
        #[test]
        fn score_is_always_within_unit_interval(
            volatility in -5.0f64..10.0,
            trend in -5.0f64..5.0,
            volume in -5.0f64..5.0,
            confidence in -2.0f64..2.0,
            signal in -3.0f64..3.0,
        ) {
            let s = compute_score(trend, signal, volume, confidence, volatility);
            prop_assert!((0.0..=1.0).contains(&s), "score {} out of range", s);
        }

        #[test]
        fn penalty_is_zero_for_calm_states(volatility in 0.0f64..=0.5) {
            prop_assert_eq!(volatility_penalty(volatility), 0.0);
        }

        #[test]
        fn calm_states_are_never_discounted(
            trend in 0.0f64..1.0,
            volume in 0.0f64..1.0,
            confidence in 0.0f64..1.0,
            signal in -1.0f64..1.0,
            volatility in 0.0f64..=0.5,
        ) {
            let calm = compute_score(trend, signal, volume, confidence, volatility);
            let reference = compute_score(trend, signal, volume, confidence, 0.0);
            prop_assert_eq!(calm, reference);
        }
    }
}
