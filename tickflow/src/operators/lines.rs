//! Line plotting and slope classification over peak index lists.

use std::cell::RefCell;
use std::rc::Rc;

use chrono::NaiveDateTime;

use crate::error::{Error, Result};
use crate::operators::{Operator, Streams};
use crate::params::{Params, get_f64};
use crate::stream::Stream;
use crate::types::{Line, SlopeType};
use crate::validate::{Validated, no_decrease_validator, sequence_validator};

/// Plots line segments as linear ramps over the source, into a target of
/// the source's length.  Segments may not overlap.
pub struct LineOperator {
    lines: Validated<Line>,
    _lines_raw: Stream<Line>,
    source: Stream<f64>,
    target: Stream<f64>,
}

impl LineOperator {
    pub fn build(_params: &Params, streams: &Streams) -> Result<Self> {
        let raw = streams.line("lines")?;
        let source = streams.float("source")?;
        let target = streams.float("target")?;
        let (wl, wt) = (raw.weak(), target.weak());
        let outer = Rc::new(move |change: crate::StreamChange, index: usize| {
            if !change.is_after() {
                return;
            }
            let (Some(lines), Some(target)) = (wl.upgrade(), wt.upgrade()) else {
                return;
            };
            let keep = match index {
                0 => 0,
                _ => lines
                    .get(index as isize - 1)
                    .map_or(0, |prev| prev.start_index.max(prev.end_index) + 1),
            };
            target.set_len(keep);
        });
        let lines = sequence_validator(
            &raw,
            |line: &Option<Line>, prev: &Option<Line>| match (line, prev) {
                (Some(line), Some(prev)) => {
                    line.start_index.min(line.end_index) >= prev.start_index.max(prev.end_index)
                }
                _ => true,
            },
            "line segments overlap",
            Some(outer),
        );
        Ok(Self {
            lines,
            _lines_raw: raw,
            source,
            target,
        })
    }
}

impl Operator for LineOperator {
    fn calc(&mut self) -> Result<()> {
        self.target.set_len(self.source.len());
        while let Some(line) = self.lines.next()? {
            let Some(line) = line else {
                return Err(Error::value("line stream contains an empty value"));
            };
            let line = line.normalized();
            let (a, b) = (line.start_index, line.end_index);
            if b >= self.source.len() {
                return Err(Error::value(format!("line end is out of source bounds ({b})")));
            }
            let x_start = self
                .source
                .get(a as isize)
                .ok_or_else(|| Error::value(format!("line start has no value ({a})")))?;
            let x_end = self
                .source
                .get(b as isize)
                .ok_or_else(|| Error::value(format!("line end has no value ({b})")))?;
            if a < b {
                let delta = (x_end - x_start) / (b - a) as f64;
                let mut x = x_start;
                for i in a..b {
                    self.target.set(i as isize, Some(x));
                    x += delta;
                }
            }
            self.target.set(b as isize, Some(x_end));
        }
        Ok(())
    }
}

/// Classifies the slope between consecutive indexed samples as up, down or
/// flat, with the threshold normalized to a per-minute move.
pub struct SlopeOperator {
    threshold: f64,
    indexes: Validated<usize>,
    _indexes_raw: Stream<usize>,
    source: Stream<f64>,
    time: Stream<NaiveDateTime>,
    slope_types: Stream<SlopeType>,
    prev: Rc<RefCell<(Option<f64>, Option<NaiveDateTime>)>>,
}

impl SlopeOperator {
    pub fn new(
        threshold: f64,
        indexes: &Stream<usize>,
        source: &Stream<f64>,
        time: &Stream<NaiveDateTime>,
        slope_types: &Stream<SlopeType>,
    ) -> Result<Self> {
        if threshold < 0.0 {
            return Err(Error::param(format!("invalid threshold value ({threshold})")));
        }
        let indexes_raw = indexes.handle();
        let source = source.handle();
        let time = time.handle();
        let slope_types = slope_types.handle();
        let prev: Rc<RefCell<(Option<f64>, Option<NaiveDateTime>)>> =
            Rc::new(RefCell::new((None, None)));

        let (wi, ws, wt, wst) = (
            indexes_raw.weak(),
            source.weak(),
            time.weak(),
            slope_types.weak(),
        );
        let restored = prev.clone();
        let outer = Rc::new(move |change: crate::StreamChange, index: usize| {
            if !change.is_after() {
                return;
            }
            let (Some(indexes), Some(source), Some(time), Some(slope_types)) =
                (wi.upgrade(), ws.upgrade(), wt.upgrade(), wst.upgrade())
            else {
                return;
            };
            slope_types.set_len(index);
            *restored.borrow_mut() = match index {
                0 => (None, None),
                _ => match indexes.get(index as isize - 1) {
                    Some(at) => (source.get(at as isize), time.get(at as isize)),
                    None => (None, None),
                },
            };
        });
        let indexes = no_decrease_validator(&indexes_raw, Some(outer));
        Ok(Self {
            threshold,
            indexes,
            _indexes_raw: indexes_raw,
            source,
            time,
            slope_types,
            prev,
        })
    }

    pub fn build(params: &Params, streams: &Streams) -> Result<Self> {
        Self::new(
            get_f64(params, "threshold", 0.0)?,
            &streams.index("indexes")?,
            &streams.float("source")?,
            &streams.time("time")?,
            &streams.slope("slopeTypes")?,
        )
    }
}

impl Operator for SlopeOperator {
    fn calc(&mut self) -> Result<()> {
        while let Some(index) = self.indexes.next()? {
            let Some(index) = index else {
                return Err(Error::value("index stream contains an empty value"));
            };
            let x = self.source.get(index as isize);
            let t = self.time.get(index as isize);
            let (prev_x, prev_t) = *self.prev.borrow();

            let slope_type = match (x, prev_x, t, prev_t) {
                (Some(x), Some(prev_x), Some(t), Some(prev_t)) => {
                    let minutes = (t - prev_t).num_milliseconds() as f64 / 60_000.0;
                    if minutes == 0.0 {
                        return Err(Error::value(format!(
                            "zero time interval between indexed samples ({index})"
                        )));
                    }
                    let slope = (x - prev_x) / minutes;
                    Some(if slope > self.threshold {
                        SlopeType::Up
                    } else if slope < -self.threshold {
                        SlopeType::Down
                    } else {
                        SlopeType::None
                    })
                }
                _ => None,
            };
            self.slope_types.append(slope_type);
            *self.prev.borrow_mut() = (x, t);
        }
        Ok(())
    }
}
