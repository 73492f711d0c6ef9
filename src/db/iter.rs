use std::cmp::Ordering;
use std::sync::Arc;

use crate::comparator::Comparator;
use crate::error::{Error, Result};
use crate::iterator::{BoxedIterator, StorageIterator};
use crate::manifest::Version;
use crate::types::{
    LookupKey, MAX_SEQUENCE_NUMBER, ParsedInternalKey, SequenceNumber, ValueType,
    extract_user_key,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    /// The inner iterator sits on the entry that yields `key()`.
    Forward,
    /// The inner iterator sits before every entry of `key()`, which is
    /// cached in `saved_key` / `saved_value`.
    Reverse,
}

/// User-facing cursor over the database as of a fixed sequence number.
///
/// Collapses the merged internal entries into the newest visible version
/// of each user key, hides tombstones, and keeps to
/// `[lower_bound, upper_bound)`. Holds the memtables and version it reads
/// so their data stays available for its whole lifetime.
pub struct DBIterator {
    inner: BoxedIterator,
    ucmp: Arc<dyn Comparator>,
    sequence: SequenceNumber,
    direction: Direction,
    valid: bool,
    saved_key: Vec<u8>,
    saved_value: Vec<u8>,
    lower_bound: Option<Vec<u8>>,
    upper_bound: Option<Vec<u8>>,
    _version: Arc<Version>,
}

impl DBIterator {
    pub(crate) fn new(
        inner: BoxedIterator,
        ucmp: Arc<dyn Comparator>,
        sequence: SequenceNumber,
        lower_bound: Option<Vec<u8>>,
        upper_bound: Option<Vec<u8>>,
        version: Arc<Version>,
    ) -> Self {
        DBIterator {
            inner,
            ucmp,
            sequence,
            direction: Direction::Forward,
            valid: false,
            saved_key: Vec::new(),
            saved_value: Vec::new(),
            lower_bound,
            upper_bound,
            _version: version,
        }
    }

    fn parse(key: &[u8]) -> Result<ParsedInternalKey<'_>> {
        ParsedInternalKey::parse(key).ok_or_else(|| Error::corruption("corrupted internal key in DBIterator"))
    }

    /// Advance the inner iterator to the newest visible put of a user key,
    /// skipping keys `<= saved_key` when `skipping`.
    fn find_next_user_entry(&mut self, mut skipping: bool) -> Result<()> {
        debug_assert_eq!(self.direction, Direction::Forward);
        while self.inner.is_valid() {
            let ikey = Self::parse(self.inner.key())?;
            if ikey.sequence <= self.sequence {
                match ikey.value_type {
                    ValueType::Delete => {
                        // Hide every older entry of this key.
                        self.saved_key.clear();
                        self.saved_key.extend_from_slice(ikey.user_key);
                        skipping = true;
                    }
                    ValueType::Put => {
                        let hidden = skipping
                            && self.ucmp.compare(ikey.user_key, &self.saved_key) != Ordering::Greater;
                        if !hidden {
                            self.valid = true;
                            self.saved_key.clear();
                            return Ok(());
                        }
                    }
                }
            }
            self.inner.next()?;
        }
        self.saved_key.clear();
        self.valid = false;
        Ok(())
    }

    /// Walk the inner iterator backward over the entries of the previous
    /// user key and cache its newest visible version.
    fn find_prev_user_entry(&mut self) -> Result<()> {
        debug_assert_eq!(self.direction, Direction::Reverse);
        let mut value_type = ValueType::Delete;
        while self.inner.is_valid() {
            let ikey = Self::parse(self.inner.key())?;
            if ikey.sequence <= self.sequence {
                if value_type != ValueType::Delete
                    && self.ucmp.compare(ikey.user_key, &self.saved_key) == Ordering::Less
                {
                    // Reached an older user key; the cached entry is final.
                    break;
                }
                value_type = ikey.value_type;
                self.saved_key.clear();
                self.saved_value.clear();
                if value_type == ValueType::Put {
                    self.saved_key.extend_from_slice(ikey.user_key);
                    self.saved_value.extend_from_slice(self.inner.value());
                }
            }
            self.inner.prev()?;
        }

        if value_type == ValueType::Delete {
            self.valid = false;
            self.saved_key.clear();
            self.saved_value.clear();
            self.direction = Direction::Forward;
        } else {
            self.valid = true;
        }
        Ok(())
    }

    /// Invalidate the cursor once it has left the bounds.
    fn check_bounds(&mut self) {
        if !self.valid {
            return;
        }
        let key = self.key();
        let out = match self.direction {
            Direction::Forward => self
                .upper_bound
                .as_deref()
                .is_some_and(|upper| self.ucmp.compare(key, upper) != Ordering::Less),
            Direction::Reverse => self
                .lower_bound
                .as_deref()
                .is_some_and(|lower| self.ucmp.compare(key, lower) == Ordering::Less),
        };
        if out {
            self.valid = false;
            self.saved_key.clear();
            self.saved_value.clear();
        }
    }

    fn invalidate_on_error<T>(&mut self, result: Result<T>) -> Result<T> {
        if result.is_err() {
            self.valid = false;
        }
        result
    }

    fn do_seek(&mut self, target: &[u8]) -> Result<()> {
        let target = match self.lower_bound.as_deref() {
            Some(lower) if self.ucmp.compare(target, lower) == Ordering::Less => lower.to_vec(),
            _ => target.to_vec(),
        };
        self.direction = Direction::Forward;
        self.saved_key.clear();
        self.saved_value.clear();
        let lookup = LookupKey::new(&target, self.sequence);
        self.inner.seek(lookup.internal_key())?;
        self.find_next_user_entry(false)?;
        self.check_bounds();
        Ok(())
    }

    fn do_seek_to_first(&mut self) -> Result<()> {
        if let Some(lower) = self.lower_bound.clone() {
            return self.do_seek(&lower);
        }
        self.direction = Direction::Forward;
        self.saved_key.clear();
        self.saved_value.clear();
        self.inner.seek_to_first()?;
        self.find_next_user_entry(false)?;
        self.check_bounds();
        Ok(())
    }

    fn do_seek_to_last(&mut self) -> Result<()> {
        self.direction = Direction::Reverse;
        self.saved_key.clear();
        self.saved_value.clear();
        match self.upper_bound.clone() {
            Some(upper) => {
                // Last entry strictly before every version of `upper`.
                let lookup = LookupKey::new(&upper, MAX_SEQUENCE_NUMBER);
                self.inner.seek(lookup.internal_key())?;
                if self.inner.is_valid() {
                    self.inner.prev()?;
                } else {
                    self.inner.seek_to_last()?;
                }
            }
            None => self.inner.seek_to_last()?,
        }
        self.find_prev_user_entry()?;
        self.check_bounds();
        Ok(())
    }

    fn do_next(&mut self) -> Result<()> {
        debug_assert!(self.valid);
        if self.direction == Direction::Reverse {
            self.direction = Direction::Forward;
            // The inner iterator is before the entries of saved_key; step
            // onto them so they are skipped below.
            if self.inner.is_valid() {
                self.inner.next()?;
            } else {
                self.inner.seek_to_first()?;
            }
            if !self.inner.is_valid() {
                self.valid = false;
                self.saved_key.clear();
                return Ok(());
            }
        } else {
            self.saved_key.clear();
            self.saved_key.extend_from_slice(extract_user_key(self.inner.key()));
            self.inner.next()?;
            if !self.inner.is_valid() {
                self.valid = false;
                self.saved_key.clear();
                return Ok(());
            }
        }
        self.find_next_user_entry(true)?;
        self.check_bounds();
        Ok(())
    }

    fn do_prev(&mut self) -> Result<()> {
        debug_assert!(self.valid);
        if self.direction == Direction::Forward {
            // Back up to the last entry before every version of key().
            self.saved_key.clear();
            self.saved_key.extend_from_slice(extract_user_key(self.inner.key()));
            loop {
                self.inner.prev()?;
                if !self.inner.is_valid() {
                    self.valid = false;
                    self.saved_key.clear();
                    self.saved_value.clear();
                    return Ok(());
                }
                if self.ucmp.compare(extract_user_key(self.inner.key()), &self.saved_key) == Ordering::Less {
                    break;
                }
            }
            self.direction = Direction::Reverse;
        }
        self.find_prev_user_entry()?;
        self.check_bounds();
        Ok(())
    }

    /// Consume the cursor into an iterator of owned pairs in key order,
    /// starting from the first key in bounds.
    pub fn entries(self) -> Entries {
        Entries {
            iter: self,
            started: false,
            reverse: false,
        }
    }

    /// Like [`entries`](Self::entries), from the last key backward.
    pub fn entries_rev(self) -> Entries {
        Entries {
            iter: self,
            started: false,
            reverse: true,
        }
    }
}

impl StorageIterator for DBIterator {
    fn is_valid(&self) -> bool {
        self.valid
    }

    fn seek_to_first(&mut self) -> Result<()> {
        let result = self.do_seek_to_first();
        self.invalidate_on_error(result)
    }

    fn seek_to_last(&mut self) -> Result<()> {
        let result = self.do_seek_to_last();
        self.invalidate_on_error(result)
    }

    fn seek(&mut self, key: &[u8]) -> Result<()> {
        let result = self.do_seek(key);
        self.invalidate_on_error(result)
    }

    fn next(&mut self) -> Result<()> {
        if !self.valid {
            return Ok(());
        }
        let result = self.do_next();
        self.invalidate_on_error(result)
    }

    fn prev(&mut self) -> Result<()> {
        if !self.valid {
            return Ok(());
        }
        let result = self.do_prev();
        self.invalidate_on_error(result)
    }

    fn key(&self) -> &[u8] {
        match self.direction {
            Direction::Forward => extract_user_key(self.inner.key()),
            Direction::Reverse => &self.saved_key,
        }
    }

    fn value(&self) -> &[u8] {
        match self.direction {
            Direction::Forward => self.inner.value(),
            Direction::Reverse => &self.saved_value,
        }
    }
}

/// Owned `(key, value)` pairs drained from a [`DBIterator`].
pub struct Entries {
    iter: DBIterator,
    started: bool,
    reverse: bool,
}

impl Iterator for Entries {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        let step = match (self.started, self.reverse) {
            (false, false) => self.iter.seek_to_first(),
            (false, true) => self.iter.seek_to_last(),
            (true, false) => self.iter.next(),
            (true, true) => self.iter.prev(),
        };
        self.started = true;
        if let Err(e) = step {
            // Stop after reporting the error once.
            self.iter.valid = false;
            return Some(Err(e));
        }
        self.iter
            .is_valid()
            .then(|| Ok((self.iter.key().to_vec(), self.iter.value().to_vec())))
    }
}
