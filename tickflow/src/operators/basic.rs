//! Mapper lifts and the elementary stream operators.

use std::rc::Rc;

use crate::error::{Error, Result};
use crate::mapper::{Mapper, PrevAwareMapper, SimpleMapper};
use crate::maps::{
    day_bound_mapper, delta_lo_pass_mapper, delta_mapper, hi_pass_mapper, lo_pass_mapper,
};
use crate::operators::{Operator, Streams};
use crate::params::{Params, get_f64, get_f64_opt, get_str};
use crate::stream::{Element, Retroactor, Stream};

use chrono::NaiveDateTime;

/// Lifts a [Mapper] into an [Operator]: `calc()` extends the target with
/// everything the mapper yields.  For retroaction-capable mappers the
/// operator's part of the bargain is truncating the target, wired in by
/// the `build_*` constructors below.
pub struct MapperOperator<M: Mapper> {
    mapper: M,
    target: Stream<M::Out>,
}

impl<M: Mapper> MapperOperator<M> {
    pub fn new(mapper: M, target: Stream<M::Out>) -> Self {
        Self { mapper, target }
    }
}

impl<M: Mapper> Operator for MapperOperator<M> {
    fn calc(&mut self) -> Result<()> {
        while let Some(value) = self.mapper.next()? {
            self.target.append(value);
        }
        Ok(())
    }
}

fn truncating<T: Element>(target: &Stream<T>) -> Retroactor {
    let weak = target.weak();
    Rc::new(move |change, index| {
        if change.is_after()
            && let Some(target) = weak.upgrade()
        {
            target.set_len(index);
        }
    })
}

pub(crate) fn build_delta(
    _params: &Params,
    streams: &Streams,
) -> Result<MapperOperator<PrevAwareMapper<f64, f64>>> {
    let source = streams.float("source")?;
    let target = streams.float("target")?;
    let retroactor = truncating(&target);
    Ok(MapperOperator::new(
        delta_mapper(&source, Some(retroactor)),
        target,
    ))
}

pub(crate) fn build_day_bound(
    _params: &Params,
    streams: &Streams,
) -> Result<MapperOperator<PrevAwareMapper<NaiveDateTime, bool>>> {
    let source = streams.time("source")?;
    let target = streams.boolean("target")?;
    let retroactor = truncating(&target);
    Ok(MapperOperator::new(
        day_bound_mapper(&source, Some(retroactor)),
        target,
    ))
}

pub(crate) fn build_lo_pass(
    params: &Params,
    streams: &Streams,
) -> Result<MapperOperator<SimpleMapper<f64, f64>>> {
    let source = streams.float("source")?;
    let target = streams.float("target")?;
    let alpha = get_f64_opt(params, "alpha")?;
    let rc = get_f64(params, "rc", 10.0)?;
    Ok(MapperOperator::new(lo_pass_mapper(&source, alpha, rc)?, target))
}

pub(crate) fn build_delta_lo_pass(
    params: &Params,
    streams: &Streams,
) -> Result<MapperOperator<SimpleMapper<f64, f64>>> {
    let source = streams.float("source")?;
    let target = streams.float("target")?;
    let alpha = get_f64_opt(params, "alpha")?;
    let rc = get_f64(params, "rc", 10.0)?;
    Ok(MapperOperator::new(
        delta_lo_pass_mapper(&source, alpha, rc)?,
        target,
    ))
}

pub(crate) fn build_hi_pass(
    params: &Params,
    streams: &Streams,
) -> Result<MapperOperator<PrevAwareMapper<f64, f64>>> {
    let source = streams.float("source")?;
    let target = streams.float("target")?;
    let alpha = get_f64_opt(params, "alpha")?;
    let rc = get_f64(params, "rc", 10.0)?;
    Ok(MapperOperator::new(hi_pass_mapper(&source, alpha, rc)?, target))
}

/// Splits the source into its positive and negative half-waves.
pub struct HwSplitOperator {
    source: Stream<f64>,
    positive: Stream<f64>,
    negative: Stream<f64>,
}

impl HwSplitOperator {
    pub fn build(_params: &Params, streams: &Streams) -> Result<Self> {
        let source = streams.float("source")?;
        let positive = streams.float("positive")?;
        let negative = streams.float("negative")?;
        let (ws, wp, wn) = (source.weak(), positive.weak(), negative.weak());
        source.set_retroactor(move |change, index| {
            if change.is_after() {
                if let Some(source) = ws.upgrade() {
                    source.set_pos(index);
                }
                if let Some(positive) = wp.upgrade() {
                    positive.set_len(index);
                }
                if let Some(negative) = wn.upgrade() {
                    negative.set_len(index);
                }
            }
        });
        Ok(Self {
            source,
            positive,
            negative,
        })
    }
}

impl Operator for HwSplitOperator {
    fn calc(&mut self) -> Result<()> {
        while let Some(x) = self.source.get_next() {
            self.positive.append(x.map(|x| x.max(0.0)));
            self.negative.append(x.map(|x| x.min(0.0)));
        }
        Ok(())
    }
}

/// Low-pass filter whose smoothing factor is itself a stream.
pub struct VariadicLoPassOperator {
    alpha: Stream<f64>,
    source: Stream<f64>,
    target: Stream<f64>,
    y: Option<f64>,
}

impl VariadicLoPassOperator {
    pub fn new(alpha: &Stream<f64>, source: &Stream<f64>, target: &Stream<f64>) -> Self {
        Self {
            alpha: alpha.handle(),
            source: source.handle(),
            target: target.handle(),
            y: None,
        }
    }

    pub fn build(_params: &Params, streams: &Streams) -> Result<Self> {
        Ok(Self::new(
            &streams.float("alpha")?,
            &streams.float("source")?,
            &streams.float("target")?,
        ))
    }
}

impl Operator for VariadicLoPassOperator {
    fn calc(&mut self) -> Result<()> {
        loop {
            match (self.source.get_next(), self.alpha.get_next()) {
                (None, None) => return Ok(()),
                (Some(x), Some(alpha)) => {
                    self.y = match (x, alpha) {
                        (Some(x), Some(alpha)) if (0.0..=1.0).contains(&alpha) => {
                            Some(match self.y {
                                None => x,
                                Some(y) => y + alpha * (x - y),
                            })
                        }
                        _ => None,
                    };
                    self.target.append(self.y);
                }
                _ => return Err(Error::value("alpha and source streams are out of sync")),
            }
        }
    }
}

/// Pointwise difference of two equally advancing sources.
pub struct DiffOperator {
    source1: Stream<f64>,
    source2: Stream<f64>,
    target: Stream<f64>,
}

impl DiffOperator {
    pub fn build(_params: &Params, streams: &Streams) -> Result<Self> {
        let source1 = streams.float("source1")?;
        let source2 = streams.float("source2")?;
        let target = streams.float("target")?;
        for source in [&source1, &source2] {
            let (w1, w2, wt) = (source1.weak(), source2.weak(), target.weak());
            source.set_retroactor(move |change, index| {
                if change.is_after() {
                    if let Some(source1) = w1.upgrade() {
                        source1.set_pos(index);
                    }
                    if let Some(source2) = w2.upgrade() {
                        source2.set_pos(index);
                    }
                    if let Some(target) = wt.upgrade() {
                        target.set_len(index);
                    }
                }
            });
        }
        Ok(Self {
            source1,
            source2,
            target,
        })
    }
}

impl Operator for DiffOperator {
    fn calc(&mut self) -> Result<()> {
        loop {
            match (self.source1.get_next(), self.source2.get_next()) {
                (None, None) => return Ok(()),
                (Some(x1), Some(x2)) => self.target.append(match (x1, x2) {
                    (Some(x1), Some(x2)) => Some(x1 - x2),
                    _ => None,
                }),
                _ => return Err(Error::value("difference sources are out of sync")),
            }
        }
    }
}

/// Forwards the source named by the `sourceName` parameter.
pub struct MultiplexerOperator {
    source: Stream<f64>,
    target: Stream<f64>,
}

impl MultiplexerOperator {
    pub fn build(params: &Params, streams: &Streams) -> Result<Self> {
        let source_name = get_str(params, "sourceName")?;
        let source = streams
            .float(&source_name)
            .map_err(|e| Error::param(e.to_string()))?;
        let target = streams.float("target")?;
        let (ws, wt) = (source.weak(), target.weak());
        source.set_retroactor(move |change, index| {
            if change.is_after() {
                if let Some(source) = ws.upgrade() {
                    source.set_pos(index);
                }
                if let Some(target) = wt.upgrade() {
                    target.set_len(index);
                }
            }
        });
        Ok(Self { source, target })
    }
}

impl Operator for MultiplexerOperator {
    fn calc(&mut self) -> Result<()> {
        while let Some(x) = self.source.get_next() {
            self.target.append(x);
        }
        Ok(())
    }
}
