//! Divergence detection: coindexed peaks of two series, slope-classified
//! and matched against the six convergence/divergence classes.

use crate::error::{Error, Result};
use crate::operators::{CoindexOperator, Operator, SlopeOperator, Streams};
use crate::params::{Params, get_f64, get_i64};
use crate::stream::{Stream, WeakStream};
use crate::types::{Divergence, DivergenceClass, DivergenceType, Line, SlopeType};

// A divergence retroactor truncates the event stream to causally safe
// entries and rewinds its own slope cursor; the twin sibling arrives via
// the other side's notification, since coindex truncates both sides.
struct Side {
    slope_cursor: WeakStream<SlopeType>,
    coindexes: WeakStream<usize>,
    divergences: WeakStream<Divergence>,
    lines1: WeakStream<Line>,
    lines2: WeakStream<Line>,
    pick_index: fn(&Divergence) -> usize,
}

impl Side {
    fn retroact(&self, index: usize) {
        let (Some(slope_cursor), Some(coindexes), Some(divergences), Some(lines1), Some(lines2)) = (
            self.slope_cursor.upgrade(),
            self.coindexes.upgrade(),
            self.divergences.upgrade(),
            self.lines1.upgrade(),
            self.lines2.upgrade(),
        ) else {
            return;
        };
        slope_cursor.set_pos(index);
        let keep = match index {
            0 => 0,
            _ => match coindexes.get(index as isize - 1) {
                Some(bound) => {
                    let (mut lo, mut hi) = (0usize, divergences.len());
                    while lo < hi {
                        let mid = (lo + hi) / 2;
                        match divergences.get(mid as isize) {
                            Some(d) if (self.pick_index)(&d) > bound => hi = mid,
                            _ => lo = mid + 1,
                        }
                    }
                    lo
                }
                None => 0,
            },
        };
        divergences.set_len(keep);
        lines1.set_len(keep);
        lines2.set_len(keep);
    }
}

/// Detects slope disagreements between two peak-indexed series sharing a
/// time axis.  Emits one [Divergence] per matched-peak pair that falls
/// into a class, together with the line segments joining the two most
/// recent matched peaks on each side.
pub struct DivergenceOperator {
    divergences: Stream<Divergence>,
    lines1: Stream<Line>,
    lines2: Stream<Line>,
    coindexes1: Stream<usize>,
    coindexes2: Stream<usize>,
    slope_types1: Stream<SlopeType>,
    slope_types2: Stream<SlopeType>,
    coindex_operator: CoindexOperator,
    slope_operator1: SlopeOperator,
    slope_operator2: SlopeOperator,
}

impl DivergenceOperator {
    pub fn build(params: &Params, streams: &Streams) -> Result<Self> {
        let epsilon = get_i64(params, "epsilon", 2)?;
        let threshold1 = get_f64(params, "threshold1", 0.0)?;
        let threshold2 = get_f64(params, "threshold2", 0.0)?;

        let divergences = streams.divergence("divergences")?;
        let lines1 = streams.line_or_new("lines1")?;
        let lines2 = streams.line_or_new("lines2")?;

        let coindexes1: Stream<usize> = Stream::new();
        let coindexes2: Stream<usize> = Stream::new();
        let slope_types1: Stream<SlopeType> = Stream::new();
        let slope_types2: Stream<SlopeType> = Stream::new();

        let coindex_operator = CoindexOperator::new(
            epsilon,
            &streams.index("indexes1")?,
            &streams.index("indexes2")?,
            &coindexes1,
            &coindexes2,
        )?;
        let time = streams.time("time")?;
        let slope_operator1 = SlopeOperator::new(
            threshold1,
            &coindexes1,
            &streams.float("source1")?,
            &time,
            &slope_types1,
        )?;
        let slope_operator2 = SlopeOperator::new(
            threshold2,
            &coindexes2,
            &streams.float("source2")?,
            &time,
            &slope_types2,
        )?;

        // consuming cursors; their retroactors keep the event stream causal
        let slope_types1 = slope_types1.handle();
        let slope_types2 = slope_types2.handle();
        let coindexes1 = coindexes1.handle();
        let coindexes2 = coindexes2.handle();
        let sides = [
            Side {
                slope_cursor: slope_types1.weak(),
                coindexes: coindexes1.weak(),
                divergences: divergences.weak(),
                lines1: lines1.weak(),
                lines2: lines2.weak(),
                pick_index: |d| d.index1,
            },
            Side {
                slope_cursor: slope_types2.weak(),
                coindexes: coindexes2.weak(),
                divergences: divergences.weak(),
                lines1: lines1.weak(),
                lines2: lines2.weak(),
                pick_index: |d| d.index2,
            },
        ];
        let [side1, side2] = sides;
        slope_types1.set_retroactor(move |change, index| {
            if change.is_after() {
                side1.retroact(index);
            }
        });
        slope_types2.set_retroactor(move |change, index| {
            if change.is_after() {
                side2.retroact(index);
            }
        });

        Ok(Self {
            divergences,
            lines1,
            lines2,
            coindexes1,
            coindexes2,
            slope_types1,
            slope_types2,
            coindex_operator,
            slope_operator1,
            slope_operator2,
        })
    }

    fn classify(
        s1: Option<SlopeType>,
        s2: Option<SlopeType>,
    ) -> Option<(DivergenceType, DivergenceClass)> {
        match (s1?, s2?) {
            (SlopeType::Down, SlopeType::Up) => {
                Some((DivergenceType::Convergence, DivergenceClass::A))
            }
            (SlopeType::None, SlopeType::Up) => {
                Some((DivergenceType::Convergence, DivergenceClass::B))
            }
            (SlopeType::Down, SlopeType::None) => {
                Some((DivergenceType::Convergence, DivergenceClass::C))
            }
            (SlopeType::Up, SlopeType::Down) => {
                Some((DivergenceType::Divergence, DivergenceClass::A))
            }
            (SlopeType::None, SlopeType::Down) => {
                Some((DivergenceType::Divergence, DivergenceClass::B))
            }
            (SlopeType::Up, SlopeType::None) => {
                Some((DivergenceType::Divergence, DivergenceClass::C))
            }
            _ => None,
        }
    }

    fn coindex_at(coindexes: &Stream<usize>, position: usize) -> Result<usize> {
        coindexes
            .get(position as isize)
            .ok_or_else(|| Error::value("coindex stream contains an empty value"))
    }
}

impl Operator for DivergenceOperator {
    fn calc(&mut self) -> Result<()> {
        self.coindex_operator.calc()?;
        self.slope_operator1.calc()?;
        self.slope_operator2.calc()?;

        loop {
            let k1 = self.slope_types1.pos();
            let k2 = self.slope_types2.pos();
            match (self.slope_types1.get_next(), self.slope_types2.get_next()) {
                (None, None) => return Ok(()),
                (Some(s1), Some(s2)) => {
                    let Some((divergence_type, class)) = Self::classify(s1, s2) else {
                        continue;
                    };
                    // a classified pair implies a computed slope, which
                    // implies a predecessor peak on both sides
                    debug_assert!(k1 > 0 && k2 > 0);
                    let line1 = Line::new(
                        Self::coindex_at(&self.coindexes1, k1 - 1)?,
                        Self::coindex_at(&self.coindexes1, k1)?,
                    );
                    let line2 = Line::new(
                        Self::coindex_at(&self.coindexes2, k2 - 1)?,
                        Self::coindex_at(&self.coindexes2, k2)?,
                    );
                    self.divergences.append(Some(Divergence::new(
                        divergence_type,
                        class,
                        line1.end_index,
                        line2.end_index,
                    )));
                    self.lines1.append(Some(line1));
                    self.lines2.append(Some(line2));
                }
                _ => return Err(Error::value("slope streams are out of sync")),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operators::AnyStream;
    use chrono::NaiveDateTime;

    fn minute(i: usize) -> Option<NaiveDateTime> {
        Some(
            format!("2024-03-01T10:{:02}:00", i)
                .parse::<NaiveDateTime>()
                .unwrap(),
        )
    }

    struct Rig {
        streams: Streams,
        source1: Stream<f64>,
        source2: Stream<f64>,
        indexes1: Stream<usize>,
        indexes2: Stream<usize>,
        divergences: Stream<Divergence>,
    }

    fn rig(len: usize) -> Rig {
        let mut streams = Streams::default();
        streams.insert("indexes1", AnyStream::Index(Stream::new()));
        streams.insert("indexes2", AnyStream::Index(Stream::new()));
        streams.insert("source1", AnyStream::Float(Stream::new()));
        streams.insert("source2", AnyStream::Float(Stream::new()));
        streams.insert("time", AnyStream::Time(Stream::new()));
        streams.insert("divergences", AnyStream::Divergence(Stream::new()));
        streams.insert("lines1", AnyStream::Line(Stream::new()));
        streams.insert("lines2", AnyStream::Line(Stream::new()));
        let source1 = streams.float("source1").unwrap();
        let source2 = streams.float("source2").unwrap();
        let time = streams.time("time").unwrap();
        source1.extend((0..len).map(|_| Some(0.0)));
        source2.extend((0..len).map(|_| Some(0.0)));
        time.extend((0..len).map(minute));
        Rig {
            indexes1: streams.index("indexes1").unwrap(),
            indexes2: streams.index("indexes2").unwrap(),
            divergences: streams.divergence("divergences").unwrap(),
            source1,
            source2,
            streams,
        }
    }

    fn params_eps0() -> Params {
        crate::params::params_from([("epsilon", serde_json::json!(0))])
    }

    #[test]
    fn detects_bearish_divergence() {
        let r = rig(20);
        // price peaks rise while the oscillator peaks fall
        r.source1.set(5, Some(10.0));
        r.source1.set(15, Some(12.0));
        r.source2.set(5, Some(80.0));
        r.source2.set(15, Some(70.0));
        r.indexes1.extend([Some(5), Some(15)]);
        r.indexes2.extend([Some(5), Some(15)]);
        let mut op = DivergenceOperator::build(&params_eps0(), &r.streams).unwrap();
        op.calc().unwrap();

        assert_eq!(
            r.divergences.tail(0),
            vec![Some(Divergence::new(
                DivergenceType::Divergence,
                DivergenceClass::A,
                15,
                15
            ))]
        );
        assert_eq!(
            r.streams.line("lines1").unwrap().tail(0),
            vec![Some(Line::new(5, 15))]
        );
        assert_eq!(
            r.streams.line("lines2").unwrap().tail(0),
            vec![Some(Line::new(5, 15))]
        );
    }

    #[test]
    fn detects_bullish_convergence_classes() {
        let r = rig(20);
        // falling price minimums, rising oscillator minimums
        r.source1.set(4, Some(10.0));
        r.source1.set(14, Some(8.0));
        r.source2.set(4, Some(20.0));
        r.source2.set(14, Some(30.0));
        r.indexes1.extend([Some(4), Some(14)]);
        r.indexes2.extend([Some(4), Some(14)]);
        let mut op = DivergenceOperator::build(&params_eps0(), &r.streams).unwrap();
        op.calc().unwrap();
        assert_eq!(
            r.divergences.tail(0),
            vec![Some(Divergence::new(
                DivergenceType::Convergence,
                DivergenceClass::A,
                14,
                14
            ))]
        );
    }

    #[test]
    fn no_event_when_slopes_agree() {
        let r = rig(20);
        r.source1.set(4, Some(10.0));
        r.source1.set(14, Some(12.0));
        r.source2.set(4, Some(20.0));
        r.source2.set(14, Some(30.0));
        r.indexes1.extend([Some(4), Some(14)]);
        r.indexes2.extend([Some(4), Some(14)]);
        let mut op = DivergenceOperator::build(&params_eps0(), &r.streams).unwrap();
        op.calc().unwrap();
        assert!(r.divergences.is_empty());
    }

    #[test]
    fn retroactive_peak_supersession_retracts_event() {
        let r = rig(30);
        r.source1.set(5, Some(10.0));
        r.source1.set(15, Some(12.0));
        r.source2.set(5, Some(80.0));
        r.source2.set(15, Some(70.0));
        r.indexes1.extend([Some(5), Some(15)]);
        r.indexes2.extend([Some(5), Some(15)]);
        let mut op = DivergenceOperator::build(&params_eps0(), &r.streams).unwrap();
        op.calc().unwrap();
        assert_eq!(r.divergences.len(), 1);

        // the second price peak is superseded by a later, higher one; the
        // cascade truncates coindexes, slopes, events and lines
        r.source1.set(20, Some(20.0));
        r.indexes1.set(1, Some(20));
        assert!(r.divergences.is_empty());
        assert!(r.streams.line("lines1").unwrap().is_empty());

        // the oscillator follows with a matching lower peak: the event
        // comes back with the corrected endpoints
        r.source2.set(20, Some(60.0));
        r.indexes2.extend([Some(20)]);
        op.calc().unwrap();
        assert_eq!(
            r.divergences.tail(0),
            vec![Some(Divergence::new(
                DivergenceType::Divergence,
                DivergenceClass::A,
                20,
                20
            ))]
        );
    }
}
