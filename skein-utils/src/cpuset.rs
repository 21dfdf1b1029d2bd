//! Growable bitset of CPU (or NUMA node) indices.
//!
//! The textual form is the kernel's list format used throughout sysfs,
//! e.g. `0-3,8,10-11`. [`CpuSet::parse_list`] reads it and `Display`
//! writes it back.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

const WORD_BITS: usize = u64::BITS as usize;

/// A set of CPU indices.
///
/// Trailing zero words are never stored, so two sets with the same members
/// always compare equal.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct CpuSet {
    words: Vec<u64>,
}

/// Error returned when a CPU list string is malformed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid cpu list entry `{entry}`")]
pub struct ParseCpuListError {
    entry: String,
}

impl CpuSet {
    /// Create an empty set.
    #[must_use]
    pub const fn new() -> Self {
        Self { words: Vec::new() }
    }

    /// Create a set containing `0..count`.
    #[must_use]
    pub fn first_n(count: usize) -> Self {
        (0..count).collect()
    }

    /// Create a set containing a single CPU.
    #[must_use]
    pub fn single(cpu: usize) -> Self {
        let mut set = Self::new();
        set.insert(cpu);
        set
    }

    /// Parse the sysfs list format (`"0-3,8"`). Whitespace around the list
    /// and around entries is ignored; an empty string is the empty set.
    pub fn parse_list(list: &str) -> Result<Self, ParseCpuListError> {
        let mut set = Self::new();
        let list = list.trim();
        if list.is_empty() {
            return Ok(set);
        }

        for part in list.split(',') {
            let part = part.trim();
            let invalid = || ParseCpuListError { entry: part.to_string() };
            match part.split_once('-') {
                Some((start, end)) => {
                    let start: usize = start.trim().parse().map_err(|_| invalid())?;
                    let end: usize = end.trim().parse().map_err(|_| invalid())?;
                    if start > end {
                        return Err(invalid());
                    }
                    for cpu in start..=end {
                        set.insert(cpu);
                    }
                }
                None => {
                    let cpu: usize = part.parse().map_err(|_| invalid())?;
                    set.insert(cpu);
                }
            }
        }

        Ok(set)
    }

    /// Add `cpu` to the set. Returns `true` if it was not present.
    pub fn insert(&mut self, cpu: usize) -> bool {
        let (word, bit) = (cpu / WORD_BITS, cpu % WORD_BITS);
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
        let mask = 1u64 << bit;
        let added = self.words[word] & mask == 0;
        self.words[word] |= mask;
        added
    }

    /// Remove `cpu` from the set. Returns `true` if it was present.
    pub fn remove(&mut self, cpu: usize) -> bool {
        let (word, bit) = (cpu / WORD_BITS, cpu % WORD_BITS);
        let Some(slot) = self.words.get_mut(word) else {
            return false;
        };
        let mask = 1u64 << bit;
        let removed = *slot & mask != 0;
        *slot &= !mask;
        self.trim();
        removed
    }

    /// Whether `cpu` is a member.
    #[must_use]
    pub fn contains(&self, cpu: usize) -> bool {
        self.words
            .get(cpu / WORD_BITS)
            .is_some_and(|word| word & (1u64 << (cpu % WORD_BITS)) != 0)
    }

    /// Number of members (popcount).
    #[must_use]
    pub fn len(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Whether the set has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Smallest member, if any.
    #[must_use]
    pub fn first(&self) -> Option<usize> {
        self.iter().next()
    }

    /// Members in ascending order.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            words: &self.words,
            index: 0,
            current: self.words.first().copied().unwrap_or(0),
        }
    }

    /// Members present in both sets.
    #[must_use]
    pub fn intersection(&self, other: &Self) -> Self {
        let mut set = Self {
            words: self
                .words
                .iter()
                .zip(&other.words)
                .map(|(a, b)| a & b)
                .collect(),
        };
        set.trim();
        set
    }

    /// Members present in either set.
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        let (long, short) = if self.words.len() >= other.words.len() {
            (self, other)
        } else {
            (other, self)
        };
        let mut words = long.words.clone();
        for (word, extra) in words.iter_mut().zip(&short.words) {
            *word |= extra;
        }
        Self { words }
    }

    /// Whether the two sets share at least one member.
    #[must_use]
    pub fn intersects(&self, other: &Self) -> bool {
        self.words.iter().zip(&other.words).any(|(a, b)| a & b != 0)
    }

    fn trim(&mut self) {
        while self.words.last() == Some(&0) {
            self.words.pop();
        }
    }
}

/// Ascending iterator over a [`CpuSet`].
#[derive(Debug, Clone)]
pub struct Iter<'a> {
    words: &'a [u64],
    index: usize,
    current: u64,
}

impl Iterator for Iter<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        loop {
            if self.current != 0 {
                let bit = self.current.trailing_zeros() as usize;
                self.current &= self.current - 1;
                return Some(self.index * WORD_BITS + bit);
            }
            self.index += 1;
            self.current = *self.words.get(self.index)?;
        }
    }
}

impl<'a> IntoIterator for &'a CpuSet {
    type Item = usize;
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Iter<'a> {
        self.iter()
    }
}

impl FromIterator<usize> for CpuSet {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        let mut set = Self::new();
        set.extend(iter);
        set
    }
}

impl Extend<usize> for CpuSet {
    fn extend<I: IntoIterator<Item = usize>>(&mut self, iter: I) {
        for cpu in iter {
            self.insert(cpu);
        }
    }
}

impl FromStr for CpuSet {
    type Err = ParseCpuListError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_list(s)
    }
}

impl fmt::Display for CpuSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut iter = self.iter().peekable();
        let mut first = true;
        while let Some(start) = iter.next() {
            let mut end = start;
            while iter.peek() == Some(&(end + 1)) {
                end += 1;
                iter.next();
            }
            if !first {
                f.write_str(",")?;
            }
            first = false;
            if start == end {
                write!(f, "{start}")?;
            } else {
                write!(f, "{start}-{end}")?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for CpuSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CpuSet({self})")
    }
}
