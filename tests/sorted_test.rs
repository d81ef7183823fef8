//! Integration tests for sorted key navigation and range splitting.

use std::collections::{BTreeMap, BTreeSet};

use skeldex::error::Error;
use skeldex::sorted::{
    Inclusivity, KeyRange, SortedKeys, SortedSlice, second, split, split_right,
};

fn set(keys: &[i32]) -> BTreeSet<i32> {
    keys.iter().copied().collect()
}

fn bounds(ranges: &[KeyRange<i32>]) -> Vec<(i32, i32)> {
    ranges.iter().map(|r| (r.low, r.high)).collect()
}

// ---------------------------------------------------------------------------
// Navigation
// ---------------------------------------------------------------------------

#[test]
fn neighbour_lookups_on_a_set() {
    let keys = set(&[10, 20, 30]);
    assert_eq!(keys.ceiling(&20), Some(&20));
    assert_eq!(keys.ceiling(&21), Some(&30));
    assert_eq!(keys.ceiling(&31), None);
    assert_eq!(keys.floor(&19), Some(&10));
    assert_eq!(keys.floor(&9), None);
    assert_eq!(keys.higher(&20), Some(&30));
    assert_eq!(keys.lower(&20), Some(&10));
    assert_eq!(keys.lower(&10), None);
    assert_eq!(second(&keys), Some(&20));
}

#[test]
fn map_keys_navigate_like_a_set() {
    let map: BTreeMap<i32, &str> = [(1, "a"), (5, "b"), (9, "c")].into_iter().collect();
    assert_eq!(SortedKeys::first(&map), Some(&1));
    assert_eq!(SortedKeys::last(&map), Some(&9));
    assert_eq!(map.higher(&5), Some(&9));
    assert_eq!(map.floor(&4), Some(&1));
    assert!(SortedKeys::contains(&map, &5));
}

// ---------------------------------------------------------------------------
// Splitting
// ---------------------------------------------------------------------------

#[test]
fn right_split_pulls_out_matching_separator() {
    let mut found = BTreeSet::new();
    let ranges = split_right(&set(&[1, 2, 3, 4, 5]), &set(&[3]), &mut found).unwrap();

    assert_eq!(bounds(&ranges), vec![(1, 3), (4, 5)]);
    assert!(ranges.iter().all(|r| r.inclusivity == Inclusivity::Right));
    assert_eq!(found, set(&[3]));
}

#[test]
fn no_separators_yields_one_range() {
    let mut found = BTreeSet::new();
    let ranges = split_right(&set(&[2, 4, 6]), &set(&[]), &mut found).unwrap();
    assert_eq!(bounds(&ranges), vec![(2, 6)]);
    assert!(found.is_empty());
}

#[test]
fn empty_subject_yields_nothing() {
    let mut found = BTreeSet::new();
    let ranges = split_right(&set(&[]), &set(&[1, 2]), &mut found).unwrap();
    assert!(ranges.is_empty());
    assert!(found.is_empty());
}

#[test]
fn subject_made_of_separators_yields_nothing() {
    let mut found = BTreeSet::new();
    let ranges = split_right(&set(&[1, 2, 3]), &set(&[1, 2, 3]), &mut found).unwrap();
    assert!(ranges.is_empty());
    assert_eq!(found, set(&[1, 2, 3]));
}

#[test]
fn none_split_bounds_are_subject_keys() {
    let subject = set(&[1, 2, 4, 5, 7, 8, 9]);
    let mut found = BTreeSet::new();
    let ranges = split(&subject, &set(&[3, 6]), &mut found, Inclusivity::None).unwrap();

    assert_eq!(bounds(&ranges), vec![(1, 2), (4, 5), (7, 9)]);
    assert!(found.is_empty());
}

#[test]
fn left_and_both_bounds_use_separators() {
    let subject = set(&[1, 2, 4, 5, 7, 8, 9]);
    let separators = set(&[3, 6]);

    let mut found = BTreeSet::new();
    let left = split(&subject, &separators, &mut found, Inclusivity::Left).unwrap();
    assert_eq!(bounds(&left), vec![(1, 2), (3, 5), (6, 9)]);

    let mut found = BTreeSet::new();
    let both = split(&subject, &separators, &mut found, Inclusivity::Both).unwrap();
    assert_eq!(bounds(&both), vec![(1, 3), (3, 6), (6, 9)]);
}

#[test]
fn separators_outside_the_subject_are_ignored() {
    let mut found = BTreeSet::new();
    let ranges = split(
        &set(&[10, 11, 12]),
        &set(&[1, 50]),
        &mut found,
        Inclusivity::None,
    )
    .unwrap();
    assert_eq!(bounds(&ranges), vec![(10, 12)]);
    assert!(found.is_empty());
}

#[test]
fn ranges_cover_every_non_separator_key() {
    let subject: BTreeSet<i32> = (0..100).collect();
    let separators: BTreeSet<i32> = (0..100).step_by(7).collect();
    let mut found = BTreeSet::new();
    let ranges = split(&subject, &separators, &mut found, Inclusivity::None).unwrap();

    let mut covered = BTreeSet::new();
    for window in ranges.windows(2) {
        assert!(window[0].high < window[1].low, "ranges overlap or are unordered");
    }
    for r in &ranges {
        covered.extend(subject.range(r.low..=r.high).copied());
    }
    assert_eq!(covered.len() + found.len(), subject.len());
    assert!(covered.is_disjoint(&found));
    assert_eq!(found, separators);
}

#[test]
fn split_works_over_slices_and_maps() {
    let subject: BTreeMap<i32, ()> = (1..=6).map(|k| (k, ())).collect();
    let separators = [2, 5];
    let separators = SortedSlice::new(&separators).unwrap();

    let mut found = BTreeSet::new();
    let ranges = split(&subject, &separators, &mut found, Inclusivity::None).unwrap();
    assert_eq!(bounds(&ranges), vec![(1, 1), (3, 4), (6, 6)]);
    assert_eq!(found, set(&[2, 5]));
}

#[test]
fn split_needs_an_empty_found_set() {
    let mut found = set(&[42]);
    let err = split_right(&set(&[1, 2]), &set(&[1]), &mut found).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
}
