//! The classic indicator family: SMA, EMA, KER, KAMA, RSI, MACD and the
//! channel outliner.

use serde_json::json;

use crate::error::{Error, Result};
use crate::mapper::SimpleMapper;
use crate::maps::lo_pass_mapper;
use crate::operators::{
    AnyStream, CompoundOperator, MapperOperator, Operator, OperatorConfig, OperatorKind, Streams,
    VariadicLoPassOperator,
};
use crate::params::{Params, get_bool, get_f64, get_i64, params_from};
use crate::stream::Stream;

fn positive_lag(params: &Params, key: &str, default: i64) -> Result<i64> {
    let lag = get_i64(params, key, default)?;
    if lag < 1 {
        return Err(Error::param(format!("invalid {key} value ({lag})")));
    }
    Ok(lag)
}

/// Simple moving average over the last `lag` samples, ignoring nones.
pub struct SmaOperator {
    lag: usize,
    source: Stream<f64>,
    target: Stream<f64>,
    moving_sum: f64,
    moving_count: usize,
}

impl SmaOperator {
    pub fn build(params: &Params, streams: &Streams) -> Result<Self> {
        Ok(Self {
            lag: positive_lag(params, "lag", 9)? as usize,
            source: streams.float("source")?,
            target: streams.float("target")?,
            moving_sum: 0.0,
            moving_count: 0,
        })
    }
}

impl Operator for SmaOperator {
    fn calc(&mut self) -> Result<()> {
        while let Some(a) = self.source.get_next() {
            let i = self.source.pos() - 1;
            if let Some(a) = a {
                self.moving_sum += a;
                self.moving_count += 1;
            }
            let j = i as isize - self.lag as isize;
            if j >= 0
                && let Some(b) = self.source.get(j)
            {
                self.moving_sum -= b;
                self.moving_count -= 1;
            }
            self.target.append(if self.moving_count == 0 {
                None
            } else {
                Some(self.moving_sum / self.moving_count as f64)
            });
        }
        Ok(())
    }
}

/// Exponential moving average with `alpha = 2 / (lag + 1)`.
pub(crate) fn build_ema(
    params: &Params,
    streams: &Streams,
) -> Result<MapperOperator<SimpleMapper<f64, f64>>> {
    let lag = positive_lag(params, "lag", 9)?;
    let alpha = 2.0 / (lag as f64 + 1.0);
    let source = streams.float("source")?;
    let target = streams.float("target")?;
    Ok(MapperOperator::new(
        lo_pass_mapper(&source, Some(alpha), 10.0)?,
        target,
    ))
}

/// Kaufman's effectiveness ratio: net move over total volatility across
/// the window; `1.0` when the window moved not at all.
pub struct KerOperator {
    lag: usize,
    source: Stream<f64>,
    ker: Stream<f64>,
    a_prev: Option<f64>,
    b_prev: Option<f64>,
    moving_volatility: f64,
}

impl KerOperator {
    pub fn new(lag: i64, source: &Stream<f64>, ker: &Stream<f64>) -> Result<Self> {
        if lag < 1 {
            return Err(Error::param(format!("invalid lag value ({lag})")));
        }
        Ok(Self {
            lag: lag as usize,
            source: source.handle(),
            ker: ker.handle(),
            a_prev: None,
            b_prev: None,
            moving_volatility: 0.0,
        })
    }

    pub fn build(params: &Params, streams: &Streams) -> Result<Self> {
        Self::new(
            get_i64(params, "lag", 10)?,
            &streams.float("source")?,
            &streams.float_or_new("ker")?,
        )
    }
}

impl Operator for KerOperator {
    fn calc(&mut self) -> Result<()> {
        while let Some(a) = self.source.get_next() {
            let i = self.source.pos() - 1;
            if let (Some(a), Some(a_prev)) = (a, self.a_prev) {
                self.moving_volatility += (a - a_prev).abs();
            }
            self.a_prev = a;

            let j = i as isize - self.lag as isize;
            let b = if j >= 0 { self.source.get(j) } else { None };
            if let (Some(b), Some(b_prev)) = (b, self.b_prev) {
                self.moving_volatility -= (b - b_prev).abs();
            }
            self.b_prev = b;

            self.ker.append(match (a, b) {
                (Some(a), Some(b)) => Some(if self.moving_volatility == 0.0 {
                    1.0
                } else {
                    (a - b).abs() / self.moving_volatility
                }),
                _ => None,
            });
        }
        Ok(())
    }
}

/// Kaufman's adaptive moving average: a low-pass whose alpha swings
/// between the fast and slow constants, driven by KER.
pub struct KamaOperator {
    fast_alpha: f64,
    slow_alpha: f64,
    ker: Stream<f64>,
    alpha: Stream<f64>,
    ker_operator: KerOperator,
    final_operator: VariadicLoPassOperator,
}

impl KamaOperator {
    pub fn build(params: &Params, streams: &Streams) -> Result<Self> {
        let ker_lag = get_i64(params, "kerLag", 10)?;
        let fast_lag = positive_lag(params, "fastLag", 2)?;
        let slow_lag = positive_lag(params, "slowLag", 30)?;
        if fast_lag > slow_lag {
            return Err(Error::param(format!(
                "fastLag value ({fast_lag}) is greater than slowLag value ({slow_lag})"
            )));
        }
        let source = streams.float("source")?;
        let target = streams.float("target")?;
        let ker = streams.float_or_new("ker")?;
        let alpha: Stream<f64> = Stream::new();
        let ker_operator = KerOperator::new(ker_lag, &source, &ker)?;
        let final_operator = VariadicLoPassOperator::new(&alpha, &source, &target);
        Ok(Self {
            fast_alpha: 2.0 / (fast_lag as f64 + 1.0),
            slow_alpha: 2.0 / (slow_lag as f64 + 1.0),
            ker: ker.handle(),
            alpha,
            ker_operator,
            final_operator,
        })
    }
}

impl Operator for KamaOperator {
    fn calc(&mut self) -> Result<()> {
        self.ker_operator.calc()?;
        while let Some(ker) = self.ker.get_next() {
            self.alpha.append(
                ker.map(|ker| self.slow_alpha + ker * (self.fast_alpha - self.slow_alpha)),
            );
        }
        self.final_operator.calc()
    }
}

/// Relative strength index over low-passed half-waves of the delta.
pub struct RsiOperator {
    u_ma: Stream<f64>,
    d_ma: Stream<f64>,
    target: Stream<f64>,
    ud_ma_operator: CompoundOperator,
}

impl RsiOperator {
    pub fn build(params: &Params, streams: &Streams) -> Result<Self> {
        let lag = positive_lag(params, "lag", 14)?;
        let alpha = 1.0 / lag as f64;
        let target = streams.float("target")?;
        let u_ma: Stream<f64> = Stream::new();
        let d_ma: Stream<f64> = Stream::new();

        let mut wiring = Streams::default();
        wiring.insert("source", AnyStream::Float(streams.float("source")?));
        wiring.insert("uMa", AnyStream::Float(u_ma.handle()));
        wiring.insert("dMa", AnyStream::Float(d_ma.handle()));

        let configs = [
            OperatorConfig::new(OperatorKind::Delta)
                .streams([("source", "source"), ("target", "delta")]),
            OperatorConfig::new(OperatorKind::HwSplit).streams([
                ("source", "delta"),
                ("positive", "u"),
                ("negative", "d"),
            ]),
            OperatorConfig::new(OperatorKind::LoPass)
                .params([("alpha", "alpha")])
                .streams([("source", "u"), ("target", "uMa")]),
            OperatorConfig::new(OperatorKind::LoPass)
                .params([("alpha", "alpha")])
                .streams([("source", "d"), ("target", "dMa")]),
        ];
        let ud_ma_operator =
            CompoundOperator::new(&configs, &params_from([("alpha", json!(alpha))]), &wiring)?;
        Ok(Self {
            u_ma,
            d_ma,
            target,
            ud_ma_operator,
        })
    }
}

impl Operator for RsiOperator {
    fn calc(&mut self) -> Result<()> {
        self.ud_ma_operator.calc()?;
        loop {
            match (self.u_ma.get_next(), self.d_ma.get_next()) {
                (None, None) => return Ok(()),
                (Some(u), Some(d)) => self.target.append(match (u, d) {
                    // dMa <= 0, so uMa - dMa spans the whole swing
                    (Some(u), Some(d)) => Some(if u - d == 0.0 {
                        50.0
                    } else {
                        100.0 * u / (u - d)
                    }),
                    _ => None,
                }),
                _ => return Err(Error::value("half-wave averages are out of sync")),
            }
        }
    }
}

/// Moving average convergence/divergence.
pub struct MacdOperator {
    operator: CompoundOperator,
}

impl MacdOperator {
    pub fn build(params: &Params, streams: &Streams) -> Result<Self> {
        let mut merged = params_from([
            ("shortLag", json!(12)),
            ("longLag", json!(26)),
            ("diffLag", json!(9)),
        ]);
        for (key, value) in params {
            merged.insert(key.clone(), value.clone());
        }

        let mut wiring = Streams::default();
        wiring.insert("source", AnyStream::Float(streams.float("source")?));
        wiring.insert("target", AnyStream::Float(streams.float("target")?));

        let configs = [
            OperatorConfig::new(OperatorKind::Ema)
                .params([("lag", "shortLag")])
                .streams([("source", "source"), ("target", "shortEma")]),
            OperatorConfig::new(OperatorKind::Ema)
                .params([("lag", "longLag")])
                .streams([("source", "source"), ("target", "longEma")]),
            OperatorConfig::new(OperatorKind::Diff).streams([
                ("source1", "shortEma"),
                ("source2", "longEma"),
                ("target", "diff"),
            ]),
            OperatorConfig::new(OperatorKind::Ema)
                .params([("lag", "diffLag")])
                .streams([("source", "diff"), ("target", "target")]),
        ];
        Ok(Self {
            operator: CompoundOperator::new(&configs, &merged, &wiring)?,
        })
    }
}

impl Operator for MacdOperator {
    fn calc(&mut self) -> Result<()> {
        self.operator.calc()
    }
}

/// Channel outliner: a low-passed mid line with smoothed half-wave
/// envelopes above and below it.
pub struct ChannelOperator {
    is_symm: bool,
    boost: f64,
    upper: Stream<f64>,
    lower: Stream<f64>,
    mid: Stream<f64>,
    pos: Stream<f64>,
    neg: Stream<f64>,
    pre_operator: CompoundOperator,
}

impl ChannelOperator {
    pub fn build(params: &Params, streams: &Streams) -> Result<Self> {
        let mid_lag = positive_lag(params, "midLag", 30)?;
        let mid_alpha = 1.0 / mid_lag as f64;
        let hi_alpha = (mid_lag as f64 - 1.0) / mid_lag as f64;
        let bound_lag = positive_lag(params, "boundLag", 10)?;
        let bound_alpha = 1.0 / bound_lag as f64;
        let is_symm = get_bool(params, "isSymm", false)?;
        let boost = get_f64(params, "boost", 1.0)?;
        if boost < 0.0 {
            return Err(Error::param(format!("invalid boost value ({boost})")));
        }

        let upper = streams.float("upper")?;
        let lower = streams.float("lower")?;
        let mid = streams.float_or_new("mid")?;
        let pos: Stream<f64> = Stream::new();
        let neg: Stream<f64> = Stream::new();

        let mut wiring = Streams::default();
        wiring.insert("source", AnyStream::Float(streams.float("source")?));
        wiring.insert("mid", AnyStream::Float(mid.handle()));
        wiring.insert("pos", AnyStream::Float(pos.handle()));
        wiring.insert("neg", AnyStream::Float(neg.handle()));

        let configs = [
            OperatorConfig::new(OperatorKind::LoPass)
                .params([("alpha", "midAlpha")])
                .streams([("source", "source"), ("target", "mid")]),
            OperatorConfig::new(OperatorKind::HiPass)
                .params([("alpha", "hiAlpha")])
                .streams([("source", "source"), ("target", "hi")]),
            OperatorConfig::new(OperatorKind::HwSplit).streams([
                ("source", "hi"),
                ("positive", "hiPos"),
                ("negative", "hiNeg"),
            ]),
            OperatorConfig::new(OperatorKind::LoPass)
                .params([("alpha", "boundAlpha")])
                .streams([("source", "hiPos"), ("target", "pos")]),
            OperatorConfig::new(OperatorKind::LoPass)
                .params([("alpha", "boundAlpha")])
                .streams([("source", "hiNeg"), ("target", "neg")]),
        ];
        let pre_operator = CompoundOperator::new(
            &configs,
            &params_from([
                ("midAlpha", json!(mid_alpha)),
                ("hiAlpha", json!(hi_alpha)),
                ("boundAlpha", json!(bound_alpha)),
            ]),
            &wiring,
        )?;
        Ok(Self {
            is_symm,
            boost,
            upper,
            lower,
            mid,
            pos,
            neg,
            pre_operator,
        })
    }
}

impl Operator for ChannelOperator {
    fn calc(&mut self) -> Result<()> {
        self.pre_operator.calc()?;
        loop {
            match (
                self.mid.get_next(),
                self.pos.get_next(),
                self.neg.get_next(),
            ) {
                (None, None, None) => return Ok(()),
                (Some(mid), Some(pos), Some(neg)) => {
                    let bounds = match mid {
                        None => None,
                        Some(mid) => {
                            let (pos, neg) = if self.is_symm {
                                match (pos, neg) {
                                    (Some(pos), Some(neg)) => {
                                        (Some((pos - neg) / 2.0), Some((neg - pos) / 2.0))
                                    }
                                    _ => (None, None),
                                }
                            } else {
                                (pos, neg)
                            };
                            match (pos, neg) {
                                (Some(pos), Some(neg)) => {
                                    Some((mid + self.boost * pos, mid + self.boost * neg))
                                }
                                _ => None,
                            }
                        }
                    };
                    self.upper.append(bounds.map(|(upper, _)| upper));
                    self.lower.append(bounds.map(|(_, lower)| lower));
                }
                _ => return Err(Error::value("channel envelope streams are out of sync")),
            }
        }
    }
}
