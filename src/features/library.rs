//! Pure feature computation functions. None consult anything but the bar
//! arrays passed in, no file IO, no clock, no raw-ingest collaborator.

use crate::bars::Bar;

/// Warm-up / smoothing behavior a feature family follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureKind {
    Atr,
    RollingReturnLog,
    RollingReturnSimple,
    RollingZScore,
    SessionVwap,
    DonchianPosition,
    Momentum,
    PercentileRank,
}

impl FeatureKind {
    /// EMA-like and directional-index families need `3*window` bars of
    /// warm-up; everything else needs exactly `window`.
    pub fn is_ema_like(self) -> bool {
        matches!(self, FeatureKind::Atr)
    }

    pub fn warmup_bars(self, window: usize) -> usize {
        if self.is_ema_like() {
            3 * window
        } else {
            window
        }
    }

    /// Dispatch to the pure computation for this family.
    pub fn compute(self, bars: &[Bar], window: usize) -> Vec<Option<f64>> {
        match self {
            FeatureKind::Atr => atr(bars, window),
            FeatureKind::RollingReturnLog => rolling_return(bars, window, true),
            FeatureKind::RollingReturnSimple => rolling_return(bars, window, false),
            FeatureKind::RollingZScore => rolling_zscore(bars, window),
            FeatureKind::SessionVwap => session_vwap(bars),
            FeatureKind::DonchianPosition => donchian_position(bars, window),
            FeatureKind::Momentum => momentum(bars, window),
            FeatureKind::PercentileRank => percentile_rank(bars, window),
        }
    }
}

fn apply_warmup(mut values: Vec<Option<f64>>, warmup: usize) -> Vec<Option<f64>> {
    for v in values.iter_mut().take(warmup.min(values.len())) {
        *v = None;
    }
    values
}

/// Wilder's Average True Range, `3*window`-bar warm-up (EMA-like).
pub fn atr(bars: &[Bar], window: usize) -> Vec<Option<f64>> {
    let n = bars.len();
    let mut tr = vec![0.0_f64; n];
    for i in 0..n {
        let prev_close = if i == 0 { bars[i].open } else { bars[i - 1].close };
        let a = bars[i].high - bars[i].low;
        let b = (bars[i].high - prev_close).abs();
        let c = (bars[i].low - prev_close).abs();
        tr[i] = a.max(b).max(c);
    }
    let mut out = vec![None; n];
    if window == 0 || n == 0 {
        return out;
    }
    let mut wilder: Option<f64> = None;
    for i in 0..n {
        if i + 1 < window {
            continue;
        }
        if i + 1 == window {
            let seed: f64 = tr[0..window].iter().sum::<f64>() / window as f64;
            wilder = Some(seed);
        } else if let Some(prev) = wilder {
            wilder = Some((prev * (window as f64 - 1.0) + tr[i]) / window as f64);
        }
        out[i] = wilder;
    }
    apply_warmup(out, FeatureKind::Atr.warmup_bars(window))
}

/// Rolling return over `window` bars, log or simple. Division-by-zero
/// follows `DIV0_RET_NAN`: a zero base price yields `None`, never an error.
pub fn rolling_return(bars: &[Bar], window: usize, log: bool) -> Vec<Option<f64>> {
    let n = bars.len();
    let mut out = vec![None; n];
    if window == 0 {
        return out;
    }
    for i in window..n {
        let base = bars[i - window].close;
        let cur = bars[i].close;
        out[i] = if base == 0.0 {
            None
        } else if log {
            Some((cur / base).ln())
        } else {
            Some((cur - base) / base)
        };
    }
    apply_warmup(out, FeatureKind::RollingReturnLog.warmup_bars(window))
}

/// Rolling z-score of close price over a trailing window of `window` bars.
pub fn rolling_zscore(bars: &[Bar], window: usize) -> Vec<Option<f64>> {
    let n = bars.len();
    let mut out = vec![None; n];
    if window == 0 {
        return out;
    }
    for i in (window - 1)..n {
        let slice = &bars[i + 1 - window..=i];
        let mean: f64 = slice.iter().map(|b| b.close).sum::<f64>() / window as f64;
        let var: f64 = slice.iter().map(|b| (b.close - mean).powi(2)).sum::<f64>() / window as f64;
        let std = var.sqrt();
        out[i] = if std == 0.0 { None } else { Some((bars[i].close - mean) / std) };
    }
    apply_warmup(out, FeatureKind::RollingZScore.warmup_bars(window))
}

/// Volume-weighted average price, resetting at each UTC calendar-day boundary.
pub fn session_vwap(bars: &[Bar]) -> Vec<Option<f64>> {
    let mut out = Vec::with_capacity(bars.len());
    let mut cum_pv = 0.0;
    let mut cum_v = 0.0;
    let mut current_day = None;
    for bar in bars {
        let day = bar.utc_date();
        if current_day != Some(day) {
            current_day = Some(day);
            cum_pv = 0.0;
            cum_v = 0.0;
        }
        let typical = (bar.high + bar.low + bar.close) / 3.0;
        cum_pv += typical * bar.volume;
        cum_v += bar.volume;
        out.push(if cum_v == 0.0 { None } else { Some(cum_pv / cum_v) });
    }
    out
}

/// Position of close within the trailing `window`-bar high/low channel, in `[0,1]`.
pub fn donchian_position(bars: &[Bar], window: usize) -> Vec<Option<f64>> {
    let n = bars.len();
    let mut out = vec![None; n];
    if window == 0 {
        return out;
    }
    for i in (window - 1)..n {
        let slice = &bars[i + 1 - window..=i];
        let hi = slice.iter().map(|b| b.high).fold(f64::MIN, f64::max);
        let lo = slice.iter().map(|b| b.low).fold(f64::MAX, f64::min);
        out[i] = if hi == lo { None } else { Some((bars[i].close - lo) / (hi - lo)) };
    }
    apply_warmup(out, FeatureKind::DonchianPosition.warmup_bars(window))
}

/// Price change over `window` bars (not normalized).
pub fn momentum(bars: &[Bar], window: usize) -> Vec<Option<f64>> {
    let n = bars.len();
    let mut out = vec![None; n];
    if window == 0 {
        return out;
    }
    for i in window..n {
        out[i] = Some(bars[i].close - bars[i - window].close);
    }
    apply_warmup(out, FeatureKind::Momentum.warmup_bars(window))
}

/// Fraction of trailing `window` closes strictly below the current close.
pub fn percentile_rank(bars: &[Bar], window: usize) -> Vec<Option<f64>> {
    let n = bars.len();
    let mut out = vec![None; n];
    if window == 0 {
        return out;
    }
    for i in (window - 1)..n {
        let slice = &bars[i + 1 - window..=i];
        let below = slice.iter().filter(|b| b.close < bars[i].close).count();
        out[i] = Some(below as f64 / window as f64);
    }
    apply_warmup(out, FeatureKind::PercentileRank.warmup_bars(window))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_bars(n: usize, price: f64) -> Vec<Bar> {
        (0..n)
            .map(|i| Bar { ts: i as i64 * 60, open: price, high: price, low: price, close: price, volume: 1.0 })
            .collect()
    }

    #[test]
    fn atr_warms_up_for_3x_window() {
        let bars = flat_bars(20, 100.0);
        let out = atr(&bars, 5);
        assert!(out[14].is_none());
        assert!(out[15].is_some());
    }

    #[test]
    fn rolling_return_warms_up_for_window() {
        let bars = flat_bars(10, 100.0);
        let out = rolling_return(&bars, 3, false);
        assert!(out[2].is_none());
        assert!(out[3].is_some());
        assert_eq!(out[3], Some(0.0));
    }

    #[test]
    fn rolling_return_handles_zero_base() {
        let mut bars = flat_bars(5, 1.0);
        bars[0] = Bar { ts: 0, open: 0.0, high: 0.0, low: 0.0, close: 0.0, volume: 0.0 };
        let out = rolling_return(&bars, 1, false);
        assert_eq!(out[1], None);
    }

    #[test]
    fn donchian_position_is_bounded() {
        let mut bars = flat_bars(10, 100.0);
        bars[9].high = 110.0;
        bars[9].low = 90.0;
        let out = donchian_position(&bars, 5);
        let v = out[9].unwrap();
        assert!((0.0..=1.0).contains(&v));
    }
}
