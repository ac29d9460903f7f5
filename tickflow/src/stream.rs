use std::cell::RefCell;
use std::fmt::Debug;
use std::rc::{Rc, Weak};

/// [Stream] elements must satisfy this trait.  Values are held as
/// `Option<T>`, so the types themselves stay small and cheap to clone.
pub trait Element: Clone + PartialEq + Debug + 'static {}

impl<T> Element for T where T: Clone + PartialEq + Debug + 'static {}

/// Phase tag delivered to retroactors around a past-data change.
///
/// Consumers that invalidate caches react to the *after* phase; producers
/// that save state react to the *before* phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamChange {
    Truncating,
    Truncate,
    RandomWriting,
    RandomWrite,
}

impl StreamChange {
    pub fn is_before(self) -> bool {
        matches!(self, StreamChange::Truncating | StreamChange::RandomWriting)
    }

    pub fn is_after(self) -> bool {
        matches!(self, StreamChange::Truncate | StreamChange::RandomWrite)
    }
}

/// Callback invoked when data behind a cursor changes.  Receives the phase
/// tag and the logical index of the change (new length for truncations).
pub type Retroactor = Rc<dyn Fn(StreamChange, usize)>;

struct Cursor {
    pos: usize,
    retroactor: Option<Retroactor>,
}

/// The shared store behind a group of [Stream] handles: the value buffer,
/// the logical start offset and the registry of live cursors.
struct Backing<T> {
    values: Vec<Option<T>>,
    offset: usize,
    cursors: Vec<Option<Cursor>>,
}

impl<T> Backing<T> {
    fn register(&mut self) -> usize {
        let cursor = Cursor {
            pos: 0,
            retroactor: None,
        };
        match self.cursors.iter().position(Option::is_none) {
            Some(slot) => {
                self.cursors[slot] = Some(cursor);
                slot
            }
            None => {
                self.cursors.push(Some(cursor));
                self.cursors.len() - 1
            }
        }
    }
}

/// A positioned handle onto a shared, append-only-from-the-tail but
/// mutable-with-notification sequence of optional values.
///
/// Any number of handles may view one backing buffer; each keeps its own
/// read cursor.  Appending and extending are silent.  Truncating or
/// rewriting data that a cursor has already consumed notifies that cursor's
/// retroactor twice, before and after the physical change.  A past change
/// reaching a cursor with no retroactor installed is a programming error
/// and panics.
pub struct Stream<T: Element> {
    backing: Rc<RefCell<Backing<T>>>,
    cursor: usize,
    owned: bool,
}

/// Non-owning reference to a [Stream] handle, for retroactor closures.
/// Holding a `WeakStream` keeps neither the buffer nor the cursor alive.
pub struct WeakStream<T: Element> {
    backing: Weak<RefCell<Backing<T>>>,
    cursor: usize,
}

impl<T: Element> WeakStream<T> {
    pub fn upgrade(&self) -> Option<Stream<T>> {
        self.backing.upgrade().map(|backing| Stream {
            backing,
            cursor: self.cursor,
            owned: false,
        })
    }
}

impl<T: Element> Default for Stream<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Element> Stream<T> {
    pub fn new() -> Self {
        Self::from_values(Vec::new())
    }

    pub fn from_values(values: Vec<Option<T>>) -> Self {
        let mut backing = Backing {
            values,
            offset: 0,
            cursors: Vec::new(),
        };
        let cursor = backing.register();
        Stream {
            backing: Rc::new(RefCell::new(backing)),
            cursor,
            owned: true,
        }
    }

    /// A new handle onto the same backing, with its own cursor at zero.
    pub fn handle(&self) -> Stream<T> {
        let cursor = self.backing.borrow_mut().register();
        Stream {
            backing: self.backing.clone(),
            cursor,
            owned: true,
        }
    }

    pub fn weak(&self) -> WeakStream<T> {
        WeakStream {
            backing: Rc::downgrade(&self.backing),
            cursor: self.cursor,
        }
    }

    /// True if `other` views the same backing buffer.
    pub fn shares_backing(&self, other: &Stream<T>) -> bool {
        Rc::ptr_eq(&self.backing, &other.backing)
    }

    pub fn len(&self) -> usize {
        let backing = self.backing.borrow();
        backing.values.len().saturating_sub(backing.offset)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn resolve(&self, index: isize) -> (usize, usize) {
        let backing = self.backing.borrow();
        let physical = if index >= 0 {
            backing.offset as isize + index
        } else {
            backing.values.len() as isize + index
        };
        if physical < (backing.offset as isize) || physical >= backing.values.len() as isize {
            panic!("stream index out of bounds ({index})");
        }
        let physical = physical as usize;
        (physical, physical - backing.offset)
    }

    /// Random read.  Negative indexes count from the end.
    pub fn get(&self, index: isize) -> Option<T> {
        let (physical, _) = self.resolve(index);
        self.backing.borrow().values[physical].clone()
    }

    /// Random write.  A write that does not change the value is silent;
    /// otherwise every cursor past the index is notified around the change.
    pub fn set(&self, index: isize, value: Option<T>) {
        let (physical, logical) = self.resolve(index);
        if self.backing.borrow().values[physical] == value {
            return;
        }
        self.notify(StreamChange::RandomWriting, logical);
        self.backing.borrow_mut().values[physical] = value;
        self.notify(StreamChange::RandomWrite, logical);
    }

    pub fn append(&self, value: Option<T>) {
        self.backing.borrow_mut().values.push(value);
    }

    pub fn extend(&self, values: impl IntoIterator<Item = Option<T>>) {
        self.backing.borrow_mut().values.extend(values);
    }

    /// Read the value at the cursor and advance it.  `None` when the cursor
    /// has reached the end.
    pub fn get_next(&self) -> Option<Option<T>> {
        let mut backing = self.backing.borrow_mut();
        let Backing {
            values,
            offset,
            cursors,
        } = &mut *backing;
        let cursor = cursors[self.cursor].as_mut().expect("cursor detached");
        let physical = *offset + cursor.pos;
        if physical < values.len() {
            cursor.pos += 1;
            Some(values[physical].clone())
        } else {
            None
        }
    }

    pub fn pos(&self) -> usize {
        self.backing.borrow().cursors[self.cursor]
            .as_ref()
            .expect("cursor detached")
            .pos
    }

    pub fn set_pos(&self, pos: usize) {
        self.backing.borrow_mut().cursors[self.cursor]
            .as_mut()
            .expect("cursor detached")
            .pos = pos;
    }

    /// Grow (padding with none) or shrink the stream.  Shrinking notifies
    /// every cursor past the new length around the physical truncation.
    pub fn set_len(&self, new_len: usize) {
        let (physical_new, physical_len) = {
            let backing = self.backing.borrow();
            (new_len + backing.offset, backing.values.len())
        };
        if physical_new > physical_len {
            let mut backing = self.backing.borrow_mut();
            let grow = physical_new - backing.values.len();
            backing.values.extend(std::iter::repeat_with(|| None).take(grow));
        } else if physical_new < physical_len {
            self.notify(StreamChange::Truncating, new_len);
            self.backing.borrow_mut().values.truncate(physical_new);
            self.notify(StreamChange::Truncate, new_len);
        }
    }

    pub fn offset(&self) -> usize {
        self.backing.borrow().offset
    }

    /// Logical trim from the front: element zero becomes `values[offset]`.
    pub fn set_offset(&self, offset: usize) {
        let mut backing = self.backing.borrow_mut();
        assert!(
            offset <= backing.values.len(),
            "stream offset out of bounds ({offset})"
        );
        backing.offset = offset;
    }

    pub fn set_retroactor(&self, retroactor: impl Fn(StreamChange, usize) + 'static) {
        self.backing.borrow_mut().cursors[self.cursor]
            .as_mut()
            .expect("cursor detached")
            .retroactor = Some(Rc::new(retroactor));
    }

    /// The suffix of the stream from logical index `from`.
    pub fn tail(&self, from: usize) -> Vec<Option<T>> {
        let backing = self.backing.borrow();
        let start = (backing.offset + from).min(backing.values.len());
        backing.values[start..].to_vec()
    }

    // Retroactors are collected under the borrow and invoked after it is
    // released, so callbacks are free to touch this stream again.  The
    // cursor filter is re-evaluated per phase.
    fn notify(&self, change: StreamChange, index: usize) {
        let callbacks: Vec<Retroactor> = {
            let backing = self.backing.borrow();
            backing
                .cursors
                .iter()
                .flatten()
                .filter(|cursor| cursor.pos > index)
                .map(|cursor| match &cursor.retroactor {
                    Some(retroactor) => retroactor.clone(),
                    None => panic!("changing already processed stream data at {index}"),
                })
                .collect()
        };
        for callback in callbacks {
            callback(change, index);
        }
    }
}

impl<T: Element> Drop for Stream<T> {
    fn drop(&mut self) {
        if self.owned {
            self.backing.borrow_mut().cursors[self.cursor] = None;
        }
    }
}

impl<T: Element> Debug for Stream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let backing = self.backing.borrow();
        write!(f, "Stream({:?})", &backing.values[backing.offset..])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_share_backing() {
        let a: Stream<i64> = Stream::new();
        a.extend([Some(1), Some(2)]);
        let b = a.handle();
        assert!(a.shares_backing(&b));
        assert_eq!(b.len(), 2);
        b.append(Some(3));
        assert_eq!(a.len(), 3);
        assert_eq!(a.get(-1), Some(3));
    }

    #[test]
    fn cursors_are_independent() {
        let a: Stream<i64> = Stream::new();
        a.extend([Some(1), None, Some(3)]);
        let b = a.handle();
        assert_eq!(a.get_next(), Some(Some(1)));
        assert_eq!(a.get_next(), Some(None));
        assert_eq!(b.pos(), 0);
        assert_eq!(b.get_next(), Some(Some(1)));
        assert_eq!(a.pos(), 2);
    }

    #[test]
    fn appending_never_notifies() {
        let a: Stream<i64> = Stream::new();
        a.extend([Some(1), Some(2)]);
        // consume everything through a retroactor-less handle, then append
        let b = a.handle();
        while b.get_next().is_some() {}
        a.append(Some(3));
        a.extend([Some(4)]);
        assert_eq!(a.len(), 4);
    }

    #[test]
    fn truncation_is_two_phase() {
        let a: Stream<i64> = Stream::new();
        a.extend([Some(1), Some(2), Some(3), Some(4)]);
        let b = a.handle();
        while b.get_next().is_some() {}

        let seen: Rc<RefCell<Vec<(StreamChange, usize, usize)>>> = Rc::new(RefCell::new(Vec::new()));
        let log = seen.clone();
        let wb = b.weak();
        b.set_retroactor(move |change, index| {
            let len = wb.upgrade().unwrap().len();
            log.borrow_mut().push((change, index, len));
            if change.is_after() {
                wb.upgrade().unwrap().set_pos(index);
            }
        });

        a.set_len(2);
        assert_eq!(
            *seen.borrow(),
            vec![
                (StreamChange::Truncating, 2, 4),
                (StreamChange::Truncate, 2, 2)
            ]
        );
        assert_eq!(b.pos(), 2);
    }

    #[test]
    fn cursor_at_or_before_change_is_not_notified() {
        let a: Stream<i64> = Stream::new();
        a.extend([Some(1), Some(2), Some(3)]);
        let b = a.handle();
        b.get_next();
        b.get_next(); // pos == 2
        // change at index 2: pos > 2 is false, no notification, no panic
        a.set(2, Some(9));
        a.set_len(2);
        assert_eq!(a.len(), 2);
    }

    #[test]
    fn noop_write_is_silent() {
        let a: Stream<i64> = Stream::new();
        a.extend([Some(1), Some(2)]);
        let b = a.handle();
        while b.get_next().is_some() {}
        // no retroactor installed: any real notification would panic
        a.set(0, Some(1));
        a.set(1, a.get(1));
    }

    #[test]
    fn random_write_notifies_outrun_cursor() {
        let a: Stream<i64> = Stream::new();
        a.extend([Some(1), Some(2), Some(3)]);
        let b = a.handle();
        while b.get_next().is_some() {}
        let seen = Rc::new(RefCell::new(Vec::new()));
        let log = seen.clone();
        b.set_retroactor(move |change, index| log.borrow_mut().push((change, index)));
        a.set(1, Some(9));
        assert_eq!(
            *seen.borrow(),
            vec![
                (StreamChange::RandomWriting, 1),
                (StreamChange::RandomWrite, 1)
            ]
        );
        assert_eq!(a.get(1), Some(9));
    }

    #[test]
    #[should_panic(expected = "already processed")]
    fn change_behind_bare_cursor_panics() {
        let a: Stream<i64> = Stream::new();
        a.extend([Some(1), Some(2), Some(3)]);
        let b = a.handle();
        while b.get_next().is_some() {}
        a.set_len(1);
    }

    #[test]
    fn set_len_grows_with_none() {
        let a: Stream<i64> = Stream::new();
        a.append(Some(1));
        a.set_len(3);
        assert_eq!(a.len(), 3);
        assert_eq!(a.get(1), None);
        assert_eq!(a.get(2), None);
    }

    #[test]
    fn offset_trims_logically() {
        let a: Stream<i64> = Stream::new();
        a.extend([Some(1), Some(2), Some(3)]);
        a.set_offset(1);
        assert_eq!(a.len(), 2);
        assert_eq!(a.get(0), Some(2));
        assert_eq!(a.get(-1), Some(3));
        assert_eq!(a.tail(1), vec![Some(3)]);
    }

    #[test]
    fn weak_handle_does_not_keep_backing_alive() {
        let a: Stream<i64> = Stream::new();
        let weak = a.weak();
        assert!(weak.upgrade().is_some());
        drop(a);
        assert!(weak.upgrade().is_none());
    }
}
