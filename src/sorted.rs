//! Navigation and splitting over sorted key sets.
//!
//! [`split`] carves an ordered key space into ranges at separator keys, so
//! that each range can be processed on its own. Subject keys that coincide
//! with a separator are pulled out of the ranges and reported separately.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::ops::Bound::{Excluded, Unbounded};

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Ordered key sets
// ---------------------------------------------------------------------------

/// An ordered set of keys with neighbour lookups.
pub trait SortedKeys<K: Ord> {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn first(&self) -> Option<&K>;

    fn last(&self) -> Option<&K>;

    fn contains(&self, key: &K) -> bool;

    /// Least key `>= key`.
    fn ceiling(&self, key: &K) -> Option<&K>;

    /// Greatest key `<= key`.
    fn floor(&self, key: &K) -> Option<&K>;

    /// Least key `> key`.
    fn higher(&self, key: &K) -> Option<&K>;

    /// Greatest key `< key`.
    fn lower(&self, key: &K) -> Option<&K>;
}

impl<K: Ord> SortedKeys<K> for BTreeSet<K> {
    fn len(&self) -> usize {
        BTreeSet::len(self)
    }

    fn first(&self) -> Option<&K> {
        BTreeSet::first(self)
    }

    fn last(&self) -> Option<&K> {
        BTreeSet::last(self)
    }

    fn contains(&self, key: &K) -> bool {
        BTreeSet::contains(self, key)
    }

    fn ceiling(&self, key: &K) -> Option<&K> {
        self.range(key..).next()
    }

    fn floor(&self, key: &K) -> Option<&K> {
        self.range(..=key).next_back()
    }

    fn higher(&self, key: &K) -> Option<&K> {
        self.range((Excluded(key), Unbounded)).next()
    }

    fn lower(&self, key: &K) -> Option<&K> {
        self.range(..key).next_back()
    }
}

impl<K: Ord, V> SortedKeys<K> for BTreeMap<K, V> {
    fn len(&self) -> usize {
        BTreeMap::len(self)
    }

    fn first(&self) -> Option<&K> {
        self.keys().next()
    }

    fn last(&self) -> Option<&K> {
        self.keys().next_back()
    }

    fn contains(&self, key: &K) -> bool {
        self.contains_key(key)
    }

    fn ceiling(&self, key: &K) -> Option<&K> {
        self.range(key..).next().map(|(k, _)| k)
    }

    fn floor(&self, key: &K) -> Option<&K> {
        self.range(..=key).next_back().map(|(k, _)| k)
    }

    fn higher(&self, key: &K) -> Option<&K> {
        self.range((Excluded(key), Unbounded)).next().map(|(k, _)| k)
    }

    fn lower(&self, key: &K) -> Option<&K> {
        self.range(..key).next_back().map(|(k, _)| k)
    }
}

/// A strictly ascending slice viewed as a sorted set.
#[derive(Debug, Clone, Copy)]
pub struct SortedSlice<'a, K> {
    keys: &'a [K],
}

impl<'a, K: Ord> SortedSlice<'a, K> {
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] unless `keys` is strictly ascending.
    pub fn new(keys: &'a [K]) -> Result<Self> {
        if keys.windows(2).any(|w| w[0] >= w[1]) {
            return Err(Error::InvalidArgument(
                "sorted slice keys must be strictly ascending".to_string(),
            ));
        }
        Ok(Self { keys })
    }

    pub fn as_slice(&self) -> &'a [K] {
        self.keys
    }

    /// Index of the first key `>= key` (or `> key` when `strict`).
    fn partition(&self, key: &K, strict: bool) -> usize {
        self.keys
            .partition_point(|k| if strict { k <= key } else { k < key })
    }
}

impl<K: Ord> SortedKeys<K> for SortedSlice<'_, K> {
    fn len(&self) -> usize {
        self.keys.len()
    }

    fn first(&self) -> Option<&K> {
        self.keys.first()
    }

    fn last(&self) -> Option<&K> {
        self.keys.last()
    }

    fn contains(&self, key: &K) -> bool {
        self.keys.binary_search(key).is_ok()
    }

    fn ceiling(&self, key: &K) -> Option<&K> {
        self.keys.get(self.partition(key, false))
    }

    fn floor(&self, key: &K) -> Option<&K> {
        let i = self.partition(key, true);
        i.checked_sub(1).and_then(|i| self.keys.get(i))
    }

    fn higher(&self, key: &K) -> Option<&K> {
        self.keys.get(self.partition(key, true))
    }

    fn lower(&self, key: &K) -> Option<&K> {
        let i = self.partition(key, false);
        i.checked_sub(1).and_then(|i| self.keys.get(i))
    }
}

/// The second element of an iterator, if there is one.
pub fn second<I: IntoIterator>(iter: I) -> Option<I::Item> {
    iter.into_iter().nth(1)
}

// ---------------------------------------------------------------------------
// Splitting
// ---------------------------------------------------------------------------

/// Which bounds of a split range are the separators around it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Inclusivity {
    /// Both bounds are subject keys.
    None,
    /// The low bound is the separator below the range.
    Left,
    /// The high bound is the separator above the range.
    #[default]
    Right,
    /// Both bounds are separators.
    Both,
}

/// One range produced by [`split`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyRange<K> {
    pub low: K,
    pub high: K,
    pub inclusivity: Inclusivity,
}

impl<K> KeyRange<K> {
    pub fn bounds(&self) -> (&K, &K) {
        (&self.low, &self.high)
    }
}

impl<K: fmt::Display> fmt::Display for KeyRange<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.low, self.high)
    }
}

/// Split `subject` at `separators`.
///
/// Returns ordered, non-overlapping ranges covering every subject key except
/// those equal to a separator; those are added to `found` instead. The
/// bounds of each range follow `inclusivity`. A side with no separator (the
/// range before the first separator, or after the last) is bounded by the
/// outermost subject key of the range instead.
///
/// # Errors
///
/// [`Error::InvalidArgument`] if `found` is not empty.
pub fn split<K, S, P>(
    subject: &S,
    separators: &P,
    found: &mut BTreeSet<K>,
    inclusivity: Inclusivity,
) -> Result<Vec<KeyRange<K>>>
where
    K: Ord + Clone,
    S: SortedKeys<K> + ?Sized,
    P: SortedKeys<K> + ?Sized,
{
    if !found.is_empty() {
        return Err(Error::InvalidArgument(
            "split needs an empty set to collect found separators".to_string(),
        ));
    }

    let (Some(first), Some(last)) = (subject.first(), subject.last()) else {
        return Ok(Vec::new());
    };
    if separators.is_empty() {
        return Ok(vec![KeyRange {
            low: first.clone(),
            high: last.clone(),
            inclusivity,
        }]);
    }

    let mut ranges = Vec::with_capacity(separators.len() + 2);
    let mut low_sub = Some(first);

    while let Some(current) = low_sub {
        let mut current = Some(current);
        let low_sep = current.and_then(|k| separators.floor(k));

        // The range cannot start on a separator; step past it.
        if let (Some(sub), Some(sep)) = (current, low_sep) {
            if sub == sep {
                found.insert(sep.clone());
                current = subject.higher(sep);
            }
        }

        let high_sep = match low_sep {
            Some(sep) => separators.higher(sep),
            None => separators.first(),
        };

        let mut high_sub = match high_sep {
            Some(sep) => subject.floor(sep),
            None => Some(last),
        };
        if let (Some(sub), Some(sep)) = (high_sub, high_sep) {
            if sub == sep {
                found.insert(sep.clone());
                high_sub = subject.lower(sep);
            }
        }

        if let (Some(lo), Some(hi)) = (current, high_sub) {
            if high_sep != Some(lo) && lo <= hi {
                let (low, high) = match inclusivity {
                    Inclusivity::None => (lo, hi),
                    Inclusivity::Left => (low_sep.unwrap_or(lo), hi),
                    Inclusivity::Right => (lo, high_sep.unwrap_or(hi)),
                    Inclusivity::Both => (low_sep.unwrap_or(lo), high_sep.unwrap_or(hi)),
                };
                ranges.push(KeyRange {
                    low: low.clone(),
                    high: high.clone(),
                    inclusivity,
                });
            }
        }

        if high_sep.is_none() {
            break;
        }
        low_sub = match high_sub {
            Some(hi) => subject.higher(hi),
            // Nothing below the next separator: resume at the separator.
            None => high_sep.and_then(|sep| subject.ceiling(sep)),
        };
    }

    Ok(ranges)
}

/// [`split`] with [`Inclusivity::Right`]: each range's high bound is the
/// separator that ends it, so taking `low..high` of the subject yields the
/// range's keys with the separators left out.
pub fn split_right<K, S, P>(
    subject: &S,
    separators: &P,
    found: &mut BTreeSet<K>,
) -> Result<Vec<KeyRange<K>>>
where
    K: Ord + Clone,
    S: SortedKeys<K> + ?Sized,
    P: SortedKeys<K> + ?Sized,
{
    split(subject, separators, found, Inclusivity::Right)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slice_lookups_match_btreeset() {
        let keys = [2, 4, 6, 8];
        let slice = SortedSlice::new(&keys).unwrap();
        let set: BTreeSet<i32> = keys.into_iter().collect();

        for key in 0..10 {
            assert_eq!(slice.ceiling(&key), set.ceiling(&key), "ceiling {key}");
            assert_eq!(slice.floor(&key), set.floor(&key), "floor {key}");
            assert_eq!(slice.higher(&key), set.higher(&key), "higher {key}");
            assert_eq!(slice.lower(&key), set.lower(&key), "lower {key}");
        }
    }

    #[test]
    fn unsorted_slice_is_rejected() {
        assert!(SortedSlice::new(&[3, 1, 2]).is_err());
        assert!(SortedSlice::new(&[1, 1]).is_err());
    }

    #[test]
    fn second_of_short_iterators() {
        assert_eq!(second([7]), None);
        assert_eq!(second([7, 8, 9]), Some(8));
    }
}
