//! Moving window extrema and the two peak detectors built on them.

use std::collections::VecDeque;

use crate::error::{Error, Result};
use crate::operators::{ChannelOperator, Operator, Streams};
use crate::params::{Params, get_f64, get_i64, map_keys};
use crate::stream::Stream;
use crate::types::PeakType;

/// Moving min/max over the trailing `lag + 1` samples, via two monotone
/// deques of indexes.  Amortized O(1) per sample.
pub struct MinMaxOperator {
    lag: usize,
    source: Stream<f64>,
    min: Stream<f64>,
    max: Stream<f64>,
    min_deque: VecDeque<usize>,
    max_deque: VecDeque<usize>,
}

impl MinMaxOperator {
    pub fn new(lag: i64, source: &Stream<f64>, min: &Stream<f64>, max: &Stream<f64>) -> Result<Self> {
        if lag < 0 {
            return Err(Error::param(format!("invalid lag value ({lag})")));
        }
        Ok(Self {
            lag: lag as usize,
            source: source.handle(),
            min: min.handle(),
            max: max.handle(),
            min_deque: VecDeque::new(),
            max_deque: VecDeque::new(),
        })
    }

    pub fn build(params: &Params, streams: &Streams) -> Result<Self> {
        Self::new(
            get_i64(params, "lag", 10)?,
            &streams.float("source")?,
            &streams.float("min")?,
            &streams.float("max")?,
        )
    }
}

impl Operator for MinMaxOperator {
    fn calc(&mut self) -> Result<()> {
        while let Some(x) = self.source.get_next() {
            let i = self.source.pos() - 1;
            if let Some(x) = x {
                while let Some(&tail) = self.min_deque.back()
                    && self.source.get(tail as isize).is_some_and(|v| v >= x)
                {
                    self.min_deque.pop_back();
                }
                self.min_deque.push_back(i);

                while let Some(&tail) = self.max_deque.back()
                    && self.source.get(tail as isize).is_some_and(|v| v <= x)
                {
                    self.max_deque.pop_back();
                }
                self.max_deque.push_back(i);
            }

            let window_start = i.saturating_sub(self.lag);
            while self
                .min_deque
                .front()
                .is_some_and(|&head| head < window_start)
            {
                self.min_deque.pop_front();
            }
            while self
                .max_deque
                .front()
                .is_some_and(|&head| head < window_start)
            {
                self.max_deque.pop_front();
            }

            self.min.append(
                self.min_deque
                    .front()
                    .and_then(|&head| self.source.get(head as isize)),
            );
            self.max.append(
                self.max_deque
                    .front()
                    .and_then(|&head| self.source.get(head as isize)),
            );
        }
        Ok(())
    }
}

// Appends a freshly confirmed extremum, or supersedes the previous one if
// it still sits inside the confirmation window: the old index moves to the
// discarded stream and the in-place overwrite carries the change downstream.
fn emit_peak(
    indexes: &Stream<usize>,
    discarded: &Stream<usize>,
    index: usize,
    window_start: usize,
) {
    if !indexes.is_empty()
        && let Some(last) = indexes.get(-1)
        && last >= window_start
    {
        discarded.append(Some(last));
        indexes.set(-1, Some(index));
    } else {
        indexes.append(Some(index));
    }
}

/// Fractal peak detector: a sign-run reversal of at least the half width,
/// over the burst threshold, confirmed against the moving window extrema.
pub struct FractalExOperator {
    half_width: usize,
    threshold: f64,
    min_max_lag: usize,
    source: Stream<f64>,
    min_indexes: Stream<usize>,
    max_indexes: Stream<usize>,
    discarded_min_indexes: Stream<usize>,
    discarded_max_indexes: Stream<usize>,
    min: Stream<f64>,
    max: Stream<f64>,
    min_max_operator: MinMaxOperator,
    prev: Option<f64>,
    sign: Option<i8>,
    sign_count: usize,
    trend: Option<i8>,
    prev_trend: Option<i8>,
}

impl FractalExOperator {
    pub fn build(params: &Params, streams: &Streams) -> Result<Self> {
        let width = get_i64(params, "width", 5)?;
        let half_width = (width - 1) / 2;
        if half_width < 1 {
            return Err(Error::param(format!("invalid width value ({width})")));
        }
        let threshold = get_f64(params, "threshold", 0.0)?;
        if threshold < 0.0 {
            return Err(Error::param(format!("invalid threshold value ({threshold})")));
        }
        let min_max_lag = get_i64(params, "minMaxLag", 10)?;
        if min_max_lag < 0 {
            return Err(Error::param(format!("invalid minMaxLag value ({min_max_lag})")));
        }

        let source = streams.float("source")?;
        let min: Stream<f64> = Stream::new();
        let max: Stream<f64> = Stream::new();
        let min_max_operator = MinMaxOperator::new(min_max_lag, &source, &min, &max)?;
        Ok(Self {
            half_width: half_width as usize,
            threshold,
            min_max_lag: min_max_lag as usize,
            source,
            min_indexes: streams.index("minIndexes")?,
            max_indexes: streams.index("maxIndexes")?,
            discarded_min_indexes: streams.index_or_new("discardedMinIndexes")?,
            discarded_max_indexes: streams.index_or_new("discardedMaxIndexes")?,
            min,
            max,
            min_max_operator,
            prev: None,
            sign: None,
            sign_count: 0,
            trend: None,
            prev_trend: None,
        })
    }
}

impl Operator for FractalExOperator {
    fn calc(&mut self) -> Result<()> {
        self.min_max_operator.calc()?;

        while let Some(x) = self.source.get_next() {
            let i = self.source.pos() - 1;
            match (x, self.prev) {
                (Some(x), Some(prev)) => {
                    let dx = x - prev;
                    let sign: i8 = if dx > 0.0 {
                        1
                    } else if dx < 0.0 {
                        -1
                    } else {
                        0
                    };

                    if self.sign == Some(sign) {
                        self.sign_count += 1;
                    } else {
                        self.sign = Some(sign);
                        self.sign_count = 1;
                        self.prev_trend = self.trend;
                        self.trend = None;
                    }

                    if self.sign != self.trend && self.sign_count >= self.half_width {
                        let start_index = i - self.sign_count;
                        let start = self.source.get(start_index as isize);

                        if let Some(start) = start
                            && (x - start).abs() >= self.threshold
                        {
                            if matches!(self.prev_trend, Some(1) | Some(-1)) {
                                let window_start = i.saturating_sub(self.min_max_lag);
                                let peak = match sign {
                                    1 => Some(PeakType::Min),
                                    -1 => Some(PeakType::Max),
                                    _ => None,
                                };
                                match peak {
                                    Some(PeakType::Min)
                                        if self
                                            .min
                                            .get(start_index as isize)
                                            .is_some_and(|m| start <= m) =>
                                    {
                                        emit_peak(
                                            &self.min_indexes,
                                            &self.discarded_min_indexes,
                                            start_index,
                                            window_start,
                                        );
                                    }
                                    Some(PeakType::Max)
                                        if self
                                            .max
                                            .get(start_index as isize)
                                            .is_some_and(|m| start >= m) =>
                                    {
                                        emit_peak(
                                            &self.max_indexes,
                                            &self.discarded_max_indexes,
                                            start_index,
                                            window_start,
                                        );
                                    }
                                    _ => {}
                                }
                            }
                            self.trend = self.sign;
                        }
                    }
                }
                _ => {
                    self.sign = None;
                    self.sign_count = 0;
                    self.trend = None;
                    self.prev_trend = None;
                }
            }
            self.prev = x;
        }
        Ok(())
    }
}

/// Peak detection by channel envelope crossing: while the price rides
/// outside a bound the running extremum is tracked, and committed when the
/// crossing flips.
pub struct ChannelBurstOperator {
    source: Stream<f64>,
    min_indexes: Stream<usize>,
    max_indexes: Stream<usize>,
    upper: Stream<f64>,
    lower: Stream<f64>,
    channel_operator: ChannelOperator,
    flip: Option<bool>,
    peak_index: Option<usize>,
    peak_value: Option<f64>,
}

impl ChannelBurstOperator {
    pub fn build(params: &Params, streams: &Streams) -> Result<Self> {
        let source = streams.float("source")?;
        let upper = streams.float_or_new("upper")?;
        let lower = streams.float_or_new("lower")?;
        let mid = streams.float_or_new("mid")?;

        let mut wiring = Streams::default();
        wiring.insert("source", crate::operators::AnyStream::Float(source.handle()));
        wiring.insert("upper", crate::operators::AnyStream::Float(upper.handle()));
        wiring.insert("lower", crate::operators::AnyStream::Float(lower.handle()));
        wiring.insert("mid", crate::operators::AnyStream::Float(mid.handle()));

        let channel_params = map_keys(
            params,
            &[
                ("midLag".to_string(), "midLag".to_string()),
                ("boundLag".to_string(), "boundLag".to_string()),
                ("isSymm".to_string(), "isSymm".to_string()),
                ("boost".to_string(), "boost".to_string()),
            ]
            .into_iter()
            .collect(),
        );
        let channel_operator = ChannelOperator::build(&channel_params, &wiring)?;
        Ok(Self {
            source,
            min_indexes: streams.index("minIndexes")?,
            max_indexes: streams.index("maxIndexes")?,
            upper,
            lower,
            channel_operator,
            flip: None,
            peak_index: None,
            peak_value: None,
        })
    }
}

impl Operator for ChannelBurstOperator {
    fn calc(&mut self) -> Result<()> {
        self.channel_operator.calc()?;
        loop {
            let x = match self.source.get_next() {
                Some(x) => x,
                None => match (self.upper.get_next(), self.lower.get_next()) {
                    (None, None) => return Ok(()),
                    _ => return Err(Error::value("channel bounds are out of sync")),
                },
            };
            let i = self.source.pos() - 1;
            let (upper, lower) = match (self.upper.get_next(), self.lower.get_next()) {
                (Some(upper), Some(lower)) => (upper, lower),
                _ => return Err(Error::value("channel bounds are out of sync")),
            };

            let flip = match x {
                None => None,
                Some(x) => {
                    if upper.is_some_and(|upper| x > upper) {
                        Some(true)
                    } else if lower.is_some_and(|lower| x < lower) {
                        Some(false)
                    } else {
                        self.flip
                    }
                }
            };

            if flip != self.flip {
                if let Some(peak_index) = self.peak_index {
                    match self.flip {
                        Some(false) => self.min_indexes.append(Some(peak_index)),
                        Some(true) => self.max_indexes.append(Some(peak_index)),
                        None => {}
                    }
                }
                self.peak_index = None;
                self.peak_value = None;
                self.flip = flip;
            }

            if let Some(x) = x {
                let beats = match (self.peak_value, self.flip) {
                    (None, _) => true,
                    (Some(peak), Some(true)) => x > peak,
                    (Some(peak), Some(false)) => x < peak,
                    _ => false,
                };
                if beats {
                    self.peak_index = Some(i);
                    self.peak_value = Some(x);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operators::{AnyStream, OperatorKind};
    use crate::params::params_from;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use serde_json::json;

    fn minmax_bag() -> (Streams, Stream<f64>, Stream<f64>, Stream<f64>) {
        let mut streams = Streams::default();
        streams.insert("source", AnyStream::Float(Stream::new()));
        streams.insert("min", AnyStream::Float(Stream::new()));
        streams.insert("max", AnyStream::Float(Stream::new()));
        let source = streams.float("source").unwrap();
        let min = streams.float("min").unwrap();
        let max = streams.float("max").unwrap();
        (streams, source, min, max)
    }

    #[test]
    fn minmax_matches_reference_values() {
        let (streams, source, min, max) = minmax_bag();
        let params = params_from([("lag", json!(2))]);
        let mut op = MinMaxOperator::build(&params, &streams).unwrap();
        source.extend([Some(3.0), Some(1.0), Some(4.0), Some(1.0), Some(5.0)]);
        op.calc().unwrap();
        assert_eq!(
            min.tail(0),
            vec![Some(3.0), Some(1.0), Some(1.0), Some(1.0), Some(1.0)]
        );
        assert_eq!(
            max.tail(0),
            vec![Some(3.0), Some(3.0), Some(4.0), Some(4.0), Some(5.0)]
        );
    }

    #[test]
    fn minmax_matches_brute_force_on_random_input() {
        let mut rng = StdRng::seed_from_u64(7);
        let input: Vec<Option<f64>> = (0..200)
            .map(|_| {
                if rng.random_range(0..10) == 0 {
                    None
                } else {
                    Some(rng.random_range(-50..50) as f64)
                }
            })
            .collect();
        let lag = 10usize;
        let (streams, source, min, max) = minmax_bag();
        let mut op = MinMaxOperator::new(lag as i64, &source, &min, &max).unwrap();
        let _ = streams;
        source.extend(input.iter().cloned());
        op.calc().unwrap();
        // the deque never outgrows the window
        assert!(op.min_deque.len() <= lag + 1);
        assert!(op.max_deque.len() <= lag + 1);
        let mins = min.tail(0);
        let maxs = max.tail(0);
        for i in 0..input.len() {
            let window: Vec<f64> = input[i.saturating_sub(lag)..=i]
                .iter()
                .filter_map(|x| *x)
                .collect();
            let expect_min = window.iter().cloned().reduce(f64::min);
            let expect_max = window.iter().cloned().reduce(f64::max);
            assert_eq!(mins[i], expect_min, "min at {i}");
            assert_eq!(maxs[i], expect_max, "max at {i}");
        }
    }

    fn fractal_bag() -> (Streams, Stream<f64>) {
        let mut streams = Streams::default();
        streams.insert("source", AnyStream::Float(Stream::new()));
        for name in [
            "minIndexes",
            "maxIndexes",
            "discardedMinIndexes",
            "discardedMaxIndexes",
        ] {
            streams.insert(name, AnyStream::Index(Stream::new()));
        }
        let source = streams.float("source").unwrap();
        (streams, source)
    }

    fn indexes(streams: &Streams, name: &str) -> Vec<usize> {
        streams
            .index(name)
            .unwrap()
            .tail(0)
            .into_iter()
            .flatten()
            .collect()
    }

    #[test]
    fn fractal_detects_and_supersedes_minimum() {
        let (streams, source) = fractal_bag();
        let params = params_from([("width", json!(3)), ("minMaxLag", json!(10))]);
        let mut op = FractalExOperator::build(&params, &streams).unwrap();
        source.extend([
            Some(10.0),
            Some(8.0),
            Some(6.0),
            Some(7.0),
            Some(5.0),
            Some(3.0),
            Some(4.0),
        ]);
        op.calc().unwrap();
        // the minimum at 2 is superseded by the deeper one at 5
        assert_eq!(indexes(&streams, "minIndexes"), vec![5]);
        assert_eq!(indexes(&streams, "discardedMinIndexes"), vec![2]);
    }

    #[test]
    fn fractal_peaks_alternate_on_zigzag() {
        // amplitude-growing zigzag: every leg end is a fresh extreme of
        // the whole confirmation window
        let legs: [&[f64]; 5] = [
            &[0.0, 4.0, 8.0, 12.0],
            &[8.0, 4.0, 0.0, -4.0, -8.0, -12.0, -16.0],
            &[-10.0, -4.0, 2.0, 8.0, 14.0, 20.0],
            &[14.0, 8.0, 2.0, -4.0, -10.0, -16.0, -22.0],
            &[-16.0, -10.0, -4.0, 2.0, 8.0, 14.0, 20.0, 26.0],
        ];
        let input: Vec<Option<f64>> = legs.iter().flat_map(|leg| leg.iter()).map(|&x| Some(x)).collect();
        let (streams, source) = fractal_bag();
        // lag 13: wide enough to confirm every leg end, short enough that
        // consecutive same-polarity peaks append instead of superseding
        let params = params_from([("width", json!(3)), ("minMaxLag", json!(13))]);
        let mut op = FractalExOperator::build(&params, &streams).unwrap();
        source.extend(input.iter().cloned());
        op.calc().unwrap();

        // each reversal confirms the previous leg's endpoint; the last leg
        // has no reversal after it
        assert_eq!(indexes(&streams, "maxIndexes"), vec![3, 16]);
        assert_eq!(indexes(&streams, "minIndexes"), vec![10, 23]);

        // merged by position, extrema strictly alternate in polarity
        let mut merged: Vec<(usize, PeakType)> = indexes(&streams, "minIndexes")
            .iter()
            .map(|&i| (i, PeakType::Min))
            .chain(
                indexes(&streams, "maxIndexes")
                    .iter()
                    .map(|&i| (i, PeakType::Max)),
            )
            .collect();
        merged.sort_by_key(|(i, _)| *i);
        for pair in merged.windows(2) {
            assert_ne!(pair[0].1, pair[1].1, "extrema must alternate: {merged:?}");
        }
    }

    #[test]
    fn fractal_is_chunking_invariant() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut level: f64 = 50.0;
        let input: Vec<Option<f64>> = (0..120)
            .map(|_| {
                level += rng.random_range(-200..200) as f64 / 100.0;
                Some(level)
            })
            .collect();
        let run = |chunks: &[usize]| {
            let (streams, source) = fractal_bag();
            let params = params_from([("width", json!(3)), ("minMaxLag", json!(8))]);
            let mut op = FractalExOperator::build(&params, &streams).unwrap();
            let mut fed = 0;
            for &chunk in chunks {
                source.extend(input[fed..fed + chunk].iter().cloned());
                fed += chunk;
                op.calc().unwrap();
            }
            assert_eq!(fed, input.len());
            (
                indexes(&streams, "minIndexes"),
                indexes(&streams, "maxIndexes"),
                indexes(&streams, "discardedMinIndexes"),
                indexes(&streams, "discardedMaxIndexes"),
            )
        };
        assert_eq!(run(&[120]), run(&[7, 13, 40, 25, 20, 15]));
    }

    #[test]
    fn channel_burst_commits_peaks_on_flip() {
        let mut streams = Streams::default();
        streams.insert("source", AnyStream::Float(Stream::new()));
        streams.insert("minIndexes", AnyStream::Index(Stream::new()));
        streams.insert("maxIndexes", AnyStream::Index(Stream::new()));
        let source = streams.float("source").unwrap();
        let params = params_from([("midLag", json!(4)), ("boundLag", json!(2))]);
        let mut op = OperatorKind::ChannelBurst.build(&params, &streams).unwrap();
        // a strong spike up, then a strong spike down
        let input = [
            10.0, 10.0, 10.0, 10.0, 30.0, 35.0, 10.0, 10.0, -20.0, -25.0, 10.0, 10.0,
        ];
        source.extend(input.iter().map(|&x| Some(x)));
        op.calc().unwrap();
        let maxs = indexes(&streams, "maxIndexes");
        let mins = indexes(&streams, "minIndexes");
        assert_eq!(maxs, vec![5], "spike top committed when flip reverses");
        assert!(mins.first().is_some_and(|&i| i == 9));
    }
}
