//! Prev-aware sequence validators.  They forward elements unchanged but
//! fail loud with a [Value](crate::Error::Value) error when an
//! inter-element predicate does not hold.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::{Error, Result};
use crate::stream::{Element, Retroactor, Stream, WeakStream};

pub struct Validated<T: Element> {
    source: Stream<T>,
    prev: Rc<RefCell<Option<T>>>,
    verify: Box<dyn Fn(&Option<T>, &Option<T>) -> bool>,
    message: String,
}

impl<T: Element> Validated<T> {
    pub fn new(
        source: &Stream<T>,
        verify: impl Fn(&Option<T>, &Option<T>) -> bool + 'static,
        message: impl Into<String>,
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
            verify: Box::new(verify),
            message: message.into(),
        }
    }

    pub fn next(&mut self) -> Result<Option<Option<T>>> {
        match self.source.get_next() {
            None => Ok(None),
            Some(value) => {
                let prev = self.prev.borrow().clone();
                if !(self.verify)(&value, &prev) {
                    return Err(Error::value(self.message.clone()));
                }
                *self.prev.borrow_mut() = value.clone();
                Ok(Some(value))
            }
        }
    }

    /// Random access into the validated stream.
    pub fn peek_source(&self, index: isize) -> Option<T> {
        self.source.get(index)
    }

    pub fn pos(&self) -> usize {
        self.source.pos()
    }

    // Exposed so operators that coordinate two validated inputs (coindex)
    // can reposition a validator from the other side's retroactor.
    pub(crate) fn source_weak(&self) -> WeakStream<T> {
        self.source.weak()
    }

    pub(crate) fn prev_cell(&self) -> Rc<RefCell<Option<T>>> {
        self.prev.clone()
    }
}

/// Strictly increasing sequence validator; none elements pass through.
pub fn increase_validator<T: Element + PartialOrd>(
    source: &Stream<T>,
    outer: Option<Retroactor>,
) -> Validated<T> {
    Validated::new(
        source,
        |value, prev| match (value, prev) {
            (Some(value), Some(prev)) => value > prev,
            _ => true,
        },
        "value is out of increasing sequence",
        outer,
    )
}

/// Non-decreasing sequence validator; none elements pass through.
pub fn no_decrease_validator<T: Element + PartialOrd>(
    source: &Stream<T>,
    outer: Option<Retroactor>,
) -> Validated<T> {
    Validated::new(
        source,
        |value, prev| match (value, prev) {
            (Some(value), Some(prev)) => value >= prev,
            _ => true,
        },
        "value is out of non-decreasing sequence",
        outer,
    )
}

/// General inter-element predicate validator.
pub fn sequence_validator<T: Element>(
    source: &Stream<T>,
    verify: impl Fn(&Option<T>, &Option<T>) -> bool + 'static,
    message: impl Into<String>,
    outer: Option<Retroactor>,
) -> Validated<T> {
    Validated::new(source, verify, message, outer)
}
