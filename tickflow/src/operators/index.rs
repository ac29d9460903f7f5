//! Operators over ordered index lists.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::{Error, Result};
use crate::operators::{Operator, Streams};
use crate::params::{Params, get_i64};
use crate::stream::{Stream, WeakStream};
use crate::validate::{Validated, increase_validator, no_decrease_validator};

fn present(index: Option<usize>) -> Result<usize> {
    index.ok_or_else(|| Error::value("index stream contains an empty value"))
}

/// First position in `stream` whose value exceeds `value`.  The stream is
/// ordered, so this is a binary search over random reads.
pub(crate) fn upper_bound(stream: &Stream<usize>, value: usize) -> usize {
    let (mut lo, mut hi) = (0usize, stream.len());
    while lo < hi {
        let mid = (lo + hi) / 2;
        match stream.get(mid as isize) {
            Some(v) if v > value => hi = mid,
            _ => lo = mid + 1,
        }
    }
    lo
}

/// Picks source values into the target by index list, in "sparse" manner:
/// the target keeps the source's length, unpicked positions stay none.
pub struct PickOperator {
    indexes: Validated<usize>,
    _indexes_raw: Stream<usize>,
    source: Stream<f64>,
    target: Stream<f64>,
}

impl PickOperator {
    pub fn build(_params: &Params, streams: &Streams) -> Result<Self> {
        let raw = streams.index("indexes")?;
        let source = streams.float("source")?;
        let target = streams.float("target")?;
        let (wi, ws, wt) = (raw.weak(), source.weak(), target.weak());
        let outer = Rc::new(move |change: crate::StreamChange, index: usize| {
            if !change.is_after() {
                return;
            }
            let (Some(indexes), Some(source), Some(target)) =
                (wi.upgrade(), ws.upgrade(), wt.upgrade())
            else {
                return;
            };
            let pos = match index {
                0 => 0,
                _ => indexes.get(index as isize - 1).map_or(0, |i| i + 1),
            };
            source.set_pos(pos);
            target.set_len(pos);
        });
        let indexes = no_decrease_validator(&raw, Some(outer));
        Ok(Self {
            indexes,
            _indexes_raw: raw,
            source,
            target,
        })
    }
}

impl Operator for PickOperator {
    fn calc(&mut self) -> Result<()> {
        self.target.set_len(self.source.len());
        while let Some(index) = self.indexes.next()? {
            let index = present(index)?;
            self.source.set_pos(index);
            let value = self
                .source
                .get_next()
                .ok_or_else(|| Error::value(format!("index is out of source bounds ({index})")))?;
            self.target.set(index as isize, value);
        }
        Ok(())
    }
}

/// Collects source values by index list in "condensed" manner: one target
/// element per index.
pub struct LookupOperator {
    indexes: Validated<usize>,
    _indexes_raw: Stream<usize>,
    source: Stream<f64>,
    target: Stream<f64>,
}

impl LookupOperator {
    pub fn build(_params: &Params, streams: &Streams) -> Result<Self> {
        let raw = streams.index("indexes")?;
        let source = streams.float("source")?;
        let target = streams.float("target")?;
        let (wi, ws, wt) = (raw.weak(), source.weak(), target.weak());
        let outer = Rc::new(move |change: crate::StreamChange, index: usize| {
            if !change.is_after() {
                return;
            }
            let (Some(indexes), Some(source), Some(target)) =
                (wi.upgrade(), ws.upgrade(), wt.upgrade())
            else {
                return;
            };
            let pos = match index {
                0 => 0,
                _ => indexes.get(index as isize - 1).map_or(0, |i| i + 1),
            };
            source.set_pos(pos);
            target.set_len(index);
        });
        let indexes = no_decrease_validator(&raw, Some(outer));
        Ok(Self {
            indexes,
            _indexes_raw: raw,
            source,
            target,
        })
    }
}

impl Operator for LookupOperator {
    fn calc(&mut self) -> Result<()> {
        while let Some(index) = self.indexes.next()? {
            let index = present(index)?;
            self.source.set_pos(index);
            let value = self
                .source
                .get_next()
                .ok_or_else(|| Error::value(format!("index is out of source bounds ({index})")))?;
            self.target.append(value);
        }
        Ok(())
    }
}

// Everything a coindex retroactor needs to re-anchor both sides after a
// past change: truncate the matched pairs, drop pending candidates and
// reposition both validators after their last surviving match.
struct CoindexWires {
    raw1: WeakStream<usize>,
    raw2: WeakStream<usize>,
    coindexes1: WeakStream<usize>,
    coindexes2: WeakStream<usize>,
    validators: RefCell<Option<[(WeakStream<usize>, Rc<RefCell<Option<usize>>>); 2]>>,
    pending1: Rc<RefCell<Option<usize>>>,
    pending2: Rc<RefCell<Option<usize>>>,
}

impl CoindexWires {
    fn retroact(&self, side: usize, index: usize) {
        let (Some(raw1), Some(raw2), Some(coindexes1), Some(coindexes2)) = (
            self.raw1.upgrade(),
            self.raw2.upgrade(),
            self.coindexes1.upgrade(),
            self.coindexes2.upgrade(),
        ) else {
            return;
        };
        let (raw_own, coindexes_own) = if side == 0 {
            (&raw1, &coindexes1)
        } else {
            (&raw2, &coindexes2)
        };
        let keep = match index {
            0 => 0,
            _ => raw_own
                .get(index as isize - 1)
                .map_or(0, |last| upper_bound(coindexes_own, last)),
        };
        coindexes1.set_len(keep);
        coindexes2.set_len(keep);
        *self.pending1.borrow_mut() = None;
        *self.pending2.borrow_mut() = None;
        if let Some(validators) = self.validators.borrow().as_ref() {
            Self::reanchor(&raw1, &coindexes1, keep, &validators[0]);
            Self::reanchor(&raw2, &coindexes2, keep, &validators[1]);
        }
    }

    fn reanchor(
        raw: &Stream<usize>,
        coindexes: &Stream<usize>,
        keep: usize,
        (cursor, prev): &(WeakStream<usize>, Rc<RefCell<Option<usize>>>),
    ) {
        let Some(cursor) = cursor.upgrade() else {
            return;
        };
        let pos = match keep {
            0 => 0,
            _ => coindexes
                .get(keep as isize - 1)
                .map_or(0, |matched| upper_bound(raw, matched)),
        };
        cursor.set_pos(pos);
        *prev.borrow_mut() = if pos > 0 { raw.get(pos as isize - 1) } else { None };
    }
}

/// Relaxed intersection of two strictly increasing index lists: a pair
/// `(i1, i2)` matches when `|i1 - i2| <= epsilon`.  After a match both
/// sides advance; otherwise the smaller side advances.  Pending candidates
/// are operator state, so chunk boundaries are never observable.
pub struct CoindexOperator {
    epsilon: usize,
    indexes1: Validated<usize>,
    indexes2: Validated<usize>,
    _indexes1_raw: Stream<usize>,
    _indexes2_raw: Stream<usize>,
    coindexes1: Stream<usize>,
    coindexes2: Stream<usize>,
    pending1: Rc<RefCell<Option<usize>>>,
    pending2: Rc<RefCell<Option<usize>>>,
}

impl CoindexOperator {
    pub fn new(
        epsilon: i64,
        indexes1: &Stream<usize>,
        indexes2: &Stream<usize>,
        coindexes1: &Stream<usize>,
        coindexes2: &Stream<usize>,
    ) -> Result<Self> {
        if epsilon < 0 {
            return Err(Error::param(format!("invalid epsilon value ({epsilon})")));
        }
        let pending1: Rc<RefCell<Option<usize>>> = Rc::new(RefCell::new(None));
        let pending2: Rc<RefCell<Option<usize>>> = Rc::new(RefCell::new(None));
        let indexes1_raw = indexes1.handle();
        let indexes2_raw = indexes2.handle();
        let coindexes1 = coindexes1.handle();
        let coindexes2 = coindexes2.handle();
        let wires = Rc::new(CoindexWires {
            raw1: indexes1_raw.weak(),
            raw2: indexes2_raw.weak(),
            coindexes1: coindexes1.weak(),
            coindexes2: coindexes2.weak(),
            validators: RefCell::new(None),
            pending1: pending1.clone(),
            pending2: pending2.clone(),
        });
        let retroactor = |side: usize, wires: &Rc<CoindexWires>| {
            let wires = wires.clone();
            Rc::new(move |change: crate::StreamChange, index: usize| {
                if change.is_after() {
                    wires.retroact(side, index);
                }
            })
        };
        let validated1 = increase_validator(indexes1, Some(retroactor(0, &wires)));
        let validated2 = increase_validator(indexes2, Some(retroactor(1, &wires)));
        *wires.validators.borrow_mut() = Some([
            (validated1.source_weak(), validated1.prev_cell()),
            (validated2.source_weak(), validated2.prev_cell()),
        ]);
        Ok(Self {
            epsilon: epsilon as usize,
            indexes1: validated1,
            indexes2: validated2,
            _indexes1_raw: indexes1_raw,
            _indexes2_raw: indexes2_raw,
            coindexes1,
            coindexes2,
            pending1,
            pending2,
        })
    }

    pub fn build(params: &Params, streams: &Streams) -> Result<Self> {
        Self::new(
            get_i64(params, "epsilon", 2)?,
            &streams.index("indexes1")?,
            &streams.index("indexes2")?,
            &streams.index("coindexes1")?,
            &streams.index("coindexes2")?,
        )
    }
}

impl Operator for CoindexOperator {
    fn calc(&mut self) -> Result<()> {
        loop {
            if self.pending1.borrow().is_none() {
                match self.indexes1.next()? {
                    Some(index) => *self.pending1.borrow_mut() = Some(present(index)?),
                    None => return Ok(()),
                }
            }
            if self.pending2.borrow().is_none() {
                match self.indexes2.next()? {
                    Some(index) => *self.pending2.borrow_mut() = Some(present(index)?),
                    None => return Ok(()),
                }
            }
            let i1 = self.pending1.borrow().unwrap();
            let i2 = self.pending2.borrow().unwrap();
            if i1.abs_diff(i2) <= self.epsilon {
                self.coindexes1.append(Some(i1));
                self.coindexes2.append(Some(i2));
                *self.pending1.borrow_mut() = None;
                *self.pending2.borrow_mut() = None;
            } else if i1 < i2 {
                *self.pending1.borrow_mut() = None;
            } else {
                *self.pending2.borrow_mut() = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operators::AnyStream;

    fn index_bag() -> (Streams, Stream<usize>, Stream<usize>, Stream<usize>, Stream<usize>) {
        let mut streams = Streams::default();
        for name in ["indexes1", "indexes2", "coindexes1", "coindexes2"] {
            streams.insert(name, AnyStream::Index(Stream::new()));
        }
        let i1 = streams.index("indexes1").unwrap();
        let i2 = streams.index("indexes2").unwrap();
        let c1 = streams.index("coindexes1").unwrap();
        let c2 = streams.index("coindexes2").unwrap();
        (streams, i1, i2, c1, c2)
    }

    fn values(stream: &Stream<usize>) -> Vec<usize> {
        stream.tail(0).into_iter().flatten().collect()
    }

    #[test]
    fn pick_is_sparse() {
        let mut streams = Streams::default();
        streams.insert("indexes", AnyStream::Index(Stream::new()));
        streams.insert("source", AnyStream::Float(Stream::new()));
        streams.insert("target", AnyStream::Float(Stream::new()));
        let source = streams.float("source").unwrap();
        let indexes = streams.index("indexes").unwrap();
        let target = streams.float("target").unwrap();
        let mut op = PickOperator::build(&Params::new(), &streams).unwrap();
        source.extend([Some(10.0), Some(20.0), Some(30.0), Some(40.0)]);
        indexes.extend([Some(1), Some(3)]);
        op.calc().unwrap();
        assert_eq!(
            target.tail(0),
            vec![None, Some(20.0), None, Some(40.0)]
        );
    }

    #[test]
    fn pick_reacts_to_index_supersession() {
        let mut streams = Streams::default();
        streams.insert("indexes", AnyStream::Index(Stream::new()));
        streams.insert("source", AnyStream::Float(Stream::new()));
        streams.insert("target", AnyStream::Float(Stream::new()));
        let source = streams.float("source").unwrap();
        let indexes = streams.index("indexes").unwrap();
        let target = streams.float("target").unwrap();
        let mut op = PickOperator::build(&Params::new(), &streams).unwrap();
        source.extend([Some(10.0), Some(20.0), Some(30.0), Some(40.0)]);
        indexes.extend([Some(0), Some(2)]);
        op.calc().unwrap();
        assert_eq!(target.tail(0), vec![Some(10.0), None, Some(30.0), None]);
        // the second pick moves from index 2 to index 3
        indexes.set(1, Some(3));
        op.calc().unwrap();
        assert_eq!(target.tail(0), vec![Some(10.0), None, None, Some(40.0)]);
    }

    #[test]
    fn lookup_is_condensed() {
        let mut streams = Streams::default();
        streams.insert("indexes", AnyStream::Index(Stream::new()));
        streams.insert("source", AnyStream::Float(Stream::new()));
        streams.insert("target", AnyStream::Float(Stream::new()));
        streams
            .float("source")
            .unwrap()
            .extend([Some(10.0), Some(20.0), Some(30.0)]);
        streams.index("indexes").unwrap().extend([Some(0), Some(2)]);
        let mut op = LookupOperator::build(&Params::new(), &streams).unwrap();
        op.calc().unwrap();
        assert_eq!(
            streams.float("target").unwrap().tail(0),
            vec![Some(10.0), Some(30.0)]
        );
    }

    #[test]
    fn coindex_matches_within_epsilon() {
        let (streams, i1, i2, c1, c2) = index_bag();
        i1.extend([Some(1), Some(5), Some(10)]);
        i2.extend([Some(2), Some(7), Some(11)]);
        let params = crate::params::params_from([("epsilon", serde_json::json!(2))]);
        let mut op = CoindexOperator::build(&params, &streams).unwrap();
        op.calc().unwrap();
        assert_eq!(values(&c1), vec![1, 5, 10]);
        assert_eq!(values(&c2), vec![2, 7, 11]);
    }

    #[test]
    fn coindex_rejects_far_apart() {
        let (streams, i1, i2, c1, c2) = index_bag();
        i1.extend([Some(1), Some(10)]);
        i2.extend([Some(4), Some(5), Some(6)]);
        let params = crate::params::params_from([("epsilon", serde_json::json!(2))]);
        let mut op = CoindexOperator::build(&params, &streams).unwrap();
        op.calc().unwrap();
        assert_eq!(values(&c1), Vec::<usize>::new());
        assert_eq!(values(&c2), Vec::<usize>::new());
    }

    #[test]
    fn coindex_matching_is_inclusive_at_epsilon() {
        let (streams, i1, i2, c1, c2) = index_bag();
        i1.extend([Some(1)]);
        i2.extend([Some(3)]);
        let mut op = CoindexOperator::new(2, &i1, &i2, &c1, &c2).unwrap();
        let _ = streams;
        op.calc().unwrap();
        assert_eq!(values(&c1), vec![1]);
        assert_eq!(values(&c2), vec![3]);
    }

    #[test]
    fn coindex_is_chunking_invariant() {
        let feed1 = [3usize, 8, 14, 20, 29];
        let feed2 = [4usize, 9, 16, 21, 27];
        let whole = {
            let (streams, i1, i2, c1, c2) = index_bag();
            i1.extend(feed1.iter().map(|&i| Some(i)));
            i2.extend(feed2.iter().map(|&i| Some(i)));
            let mut op = CoindexOperator::new(2, &i1, &i2, &c1, &c2).unwrap();
            let _ = streams;
            op.calc().unwrap();
            (values(&c1), values(&c2))
        };
        let chunked = {
            let (streams, i1, i2, c1, c2) = index_bag();
            let mut op = CoindexOperator::new(2, &i1, &i2, &c1, &c2).unwrap();
            let _ = streams;
            for k in 0..feed1.len() {
                i1.extend([Some(feed1[k])]);
                op.calc().unwrap();
                i2.extend([Some(feed2[k])]);
                op.calc().unwrap();
            }
            (values(&c1), values(&c2))
        };
        assert_eq!(whole, chunked);
    }

    #[test]
    fn coindex_retroaction_truncates_matches() {
        let (streams, i1, i2, c1, c2) = index_bag();
        i1.extend([Some(1), Some(5), Some(10)]);
        i2.extend([Some(1), Some(5), Some(10)]);
        let mut op = CoindexOperator::new(0, &i1, &i2, &c1, &c2).unwrap();
        let _ = streams;
        op.calc().unwrap();
        assert_eq!(values(&c1), vec![1, 5, 10]);
        // supersede the last peak on side 1
        i1.set(2, Some(12));
        assert_eq!(values(&c1), vec![1, 5]);
        assert_eq!(values(&c2), vec![1, 5]);
        op.calc().unwrap();
        // 12 vs 10 no longer matches with epsilon 0
        assert_eq!(values(&c1), vec![1, 5]);
        i2.extend([Some(12)]);
        op.calc().unwrap();
        assert_eq!(values(&c1), vec![1, 5, 12]);
        assert_eq!(values(&c2), vec![1, 5, 12]);
    }
}
