use std::cell::RefCell;
use std::rc::Rc;

use crate::error::Result;
use crate::stream::{Element, Retroactor, Stream};

/// A lazy, position-preserving transform over a source [Stream].
///
/// `next()` yields one transformed element per source element consumed, or
/// `None` once the cursor catches up with the source.
pub trait Mapper {
    type Out: Element;
    fn next(&mut self) -> Result<Option<Option<Self::Out>>>;
}

/// Applies `f(x)` to each source element.
///
/// By default the mapper supports retroaction: a past change to the source
/// simply resets the read cursor.  Stateful transforms that cannot rewind
/// (the RC filters) are built with [SimpleMapper::without_retroaction], so
/// an upstream past-edit fails loud instead of corrupting state.
pub struct SimpleMapper<T: Element, U: Element> {
    source: Stream<T>,
    transform: Box<dyn FnMut(Option<T>) -> Option<U>>,
}

impl<T: Element, U: Element> SimpleMapper<T, U> {
    pub fn new(source: &Stream<T>, transform: impl FnMut(Option<T>) -> Option<U> + 'static) -> Self {
        Self::retroactive(source, transform, None)
    }

    pub fn retroactive(
        source: &Stream<T>,
        transform: impl FnMut(Option<T>) -> Option<U> + 'static,
        outer: Option<Retroactor>,
    ) -> Self {
        let source = source.handle();
        let weak = source.weak();
        source.set_retroactor(move |change, index| {
            if change.is_after()
                && let Some(source) = weak.upgrade()
            {
                source.set_pos(index);
            }
            if let Some(outer) = &outer {
                outer(change, index);
            }
        });
        Self {
            source,
            transform: Box::new(transform),
        }
    }

    pub fn without_retroaction(
        source: &Stream<T>,
        transform: impl FnMut(Option<T>) -> Option<U> + 'static,
    ) -> Self {
        Self {
            source: source.handle(),
            transform: Box::new(transform),
        }
    }
}

impl<T: Element, U: Element> Mapper for SimpleMapper<T, U> {
    type Out = U;
    fn next(&mut self) -> Result<Option<Option<U>>> {
        Ok(self.source.get_next().map(|value| (self.transform)(value)))
    }
}

/// Applies `f(x, prev)` to each source element, where `prev` is the raw
/// previous element (none at the start of the stream).  On retroaction the
/// cursor rewinds and `prev` is restored from the element before the change.
pub struct PrevAwareMapper<T: Element, U: Element> {
    source: Stream<T>,
    prev: Rc<RefCell<Option<T>>>,
    transform: Box<dyn FnMut(Option<T>, Option<T>) -> Option<U>>,
}

impl<T: Element, U: Element> PrevAwareMapper<T, U> {
    pub fn new(
        source: &Stream<T>,
        transform: impl FnMut(Option<T>, Option<T>) -> Option<U> + 'static,
    ) -> Self {
        Self::retroactive(source, transform, None)
    }

    pub fn retroactive(
        source: &Stream<T>,
        transform: impl FnMut(Option<T>, Option<T>) -> Option<U> + 'static,
        outer: Option<Retroactor>,
    ) -> Self {
        let source = source.handle();
        let prev: Rc<RefCell<Option<T>>> = Rc::new(RefCell::new(None));
        let weak = source.weak();
        let restored = prev.clone();
        source.set_retroactor(move |change, index| {
            if change.is_after()
                && let Some(source) = weak.upgrade()
            {
                source.set_pos(index);
                *restored.borrow_mut() = if index > 0 {
                    source.get(index as isize - 1)
                } else {
                    None
                };
            }
            if let Some(outer) = &outer {
                outer(change, index);
            }
        });
        Self {
            source,
            prev,
            transform: Box::new(transform),
        }
    }

    pub fn without_retroaction(
        source: &Stream<T>,
        transform: impl FnMut(Option<T>, Option<T>) -> Option<U> + 'static,
    ) -> Self {
        Self {
            source: source.handle(),
            prev: Rc::new(RefCell::new(None)),
            transform: Box::new(transform),
        }
    }
}

impl<T: Element, U: Element> Mapper for PrevAwareMapper<T, U> {
    type Out = U;
    fn next(&mut self) -> Result<Option<Option<U>>> {
        match self.source.get_next() {
            None => Ok(None),
            Some(value) => {
                let prev = self.prev.borrow().clone();
                let out = (self.transform)(value.clone(), prev);
                *self.prev.borrow_mut() = value;
                Ok(Some(out))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain<M: Mapper>(mapper: &mut M) -> Vec<Option<M::Out>> {
        let mut out = Vec::new();
        while let Some(value) = mapper.next().unwrap() {
            out.push(value);
        }
        out
    }

    #[test]
    fn simple_mapper_maps() {
        let source: Stream<f64> = Stream::new();
        source.extend([Some(1.0), None, Some(3.0)]);
        let mut mapper = SimpleMapper::new(&source, |x| x.map(|x| x * 2.0));
        assert_eq!(drain(&mut mapper), vec![Some(2.0), None, Some(6.0)]);
        assert_eq!(mapper.next().unwrap(), None);
        source.append(Some(4.0));
        assert_eq!(drain(&mut mapper), vec![Some(8.0)]);
    }

    #[test]
    fn prev_aware_mapper_sees_previous_element() {
        let source: Stream<f64> = Stream::new();
        source.extend([Some(1.0), Some(4.0), None, Some(9.0)]);
        let mut mapper = PrevAwareMapper::new(&source, |x, prev| match (x, prev) {
            (Some(x), Some(prev)) => Some(x - prev),
            _ => None,
        });
        // prev flattens "no previous" and "previous was none"
        assert_eq!(drain(&mut mapper), vec![None, Some(3.0), None, None]);
    }

    #[test]
    fn retroaction_rewinds_cursor_and_prev() {
        let source: Stream<f64> = Stream::new();
        source.extend([Some(1.0), Some(2.0), Some(4.0)]);
        let mut mapper = PrevAwareMapper::new(&source, |x, prev| match (x, prev) {
            (Some(x), Some(prev)) => Some(x - prev),
            _ => None,
        });
        assert_eq!(drain(&mut mapper), vec![None, Some(1.0), Some(2.0)]);
        source.set(2, Some(7.0));
        assert_eq!(drain(&mut mapper), vec![Some(5.0)]);
        source.set_len(1);
        source.extend([Some(3.0), Some(6.0)]);
        assert_eq!(drain(&mut mapper), vec![Some(2.0), Some(3.0)]);
    }
}
