//! Pushing an ordered map to an archive in independently stored ranges.
//!
//! [`deflate`] splits a map's keys at separator keys, pushes each range as
//! its own unit through a [`Scheduler`], and tracks the pushes with one
//! progress leaf per range under a composite. What comes back is a
//! [`Skeleton`]: placeholders for the pushed ranges, plus the separator
//! entries, which stay materialized. [`inflate`] reverses it.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::archive::Archive;
use crate::config::SchedulerConfig;
use crate::error::{Error, Result};
use crate::progress::{AtomicProgress, CompositeProgress, Progress, TaskAbort};
use crate::scheduler::{Executor, Scheduler, WorkResult};
use crate::sorted::{Inclusivity, KeyRange, split};

/// A pushed range: its bounds, where it went, and how many entries it holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder<K, I> {
    pub range: KeyRange<K>,
    pub id: I,
    pub entries: usize,
}

/// A map whose ranges live in an archive, with separator entries kept in
/// memory.
#[derive(Debug)]
pub struct Skeleton<K, V, I> {
    placeholders: Vec<Placeholder<K, I>>,
    retained: BTreeMap<K, V>,
    progress: Arc<CompositeProgress>,
}

impl<K, V, I> Skeleton<K, V, I> {
    pub fn placeholders(&self) -> &[Placeholder<K, I>] {
        &self.placeholders
    }

    /// Entries whose keys were separators.
    pub fn retained(&self) -> &BTreeMap<K, V> {
        &self.retained
    }

    /// Progress of the push that produced this skeleton.
    pub fn progress(&self) -> &Arc<CompositeProgress> {
        &self.progress
    }

    /// Total entry count, pushed and retained.
    pub fn len(&self) -> usize {
        self.retained.len() + self.placeholders.iter().map(|p| p.entries).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Push `map` to `archive` in ranges split at `separators`.
///
/// # Errors
///
/// [`Error::Aborted`] carrying the first range that failed to push; the
/// other ranges still run to completion.
pub fn deflate<K, V, A, E>(
    map: &BTreeMap<K, V>,
    separators: &BTreeSet<K>,
    archive: Arc<A>,
    executor: E,
    config: &SchedulerConfig,
) -> Result<Skeleton<K, V, A::Id>>
where
    K: Ord + Clone + Serialize + Send + Sync + 'static,
    V: Clone + Serialize + Send + Sync + 'static,
    A: Archive,
    E: Executor,
{
    let mut found = BTreeSet::new();
    let ranges = split(map, separators, &mut found, Inclusivity::None)?;

    let units: Arc<Vec<Vec<(K, V)>>> = Arc::new(
        ranges
            .iter()
            .map(|r| {
                map.range(r.low.clone()..=r.high.clone())
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .collect(),
    );
    let retained: BTreeMap<K, V> = found
        .into_iter()
        .filter_map(|k| map.get(&k).cloned().map(|v| (k, v)))
        .collect();

    info!(
        ranges = ranges.len(),
        retained = retained.len(),
        "deflating"
    );

    let pushed = Arc::clone(&units);
    let scheduler = Scheduler::with_config(
        &config.named(format!("{}-deflate", config.name)),
        move |&index: &usize| archive.push_value(&pushed[index]),
        executor,
    );

    let (progress, ids) = run_ranges(&scheduler, ranges.len(), |index| {
        format!("range {index} failed to push")
    })?;

    let placeholders = ranges
        .into_iter()
        .zip(ids)
        .zip(units.iter())
        .map(|((range, id), unit)| Placeholder {
            range,
            id,
            entries: unit.len(),
        })
        .collect();

    Ok(Skeleton {
        placeholders,
        retained,
        progress,
    })
}

/// Pull every range of `skeleton` back and rebuild the full map.
///
/// # Errors
///
/// [`Error::Aborted`] carrying the first range that failed to pull.
pub fn inflate<K, V, A, E>(
    skeleton: &Skeleton<K, V, A::Id>,
    archive: Arc<A>,
    executor: E,
    config: &SchedulerConfig,
) -> Result<BTreeMap<K, V>>
where
    K: Ord + Clone + DeserializeOwned + Send + 'static,
    V: Clone + DeserializeOwned + Send + 'static,
    A: Archive,
    E: Executor,
{
    let ids: Arc<Vec<A::Id>> = Arc::new(
        skeleton
            .placeholders
            .iter()
            .map(|p| p.id.clone())
            .collect(),
    );

    info!(ranges = ids.len(), "inflating");

    let pulled = Arc::clone(&ids);
    let scheduler = Scheduler::with_config(
        &config.named(format!("{}-inflate", config.name)),
        move |&index: &usize| archive.pull_value::<Vec<(K, V)>>(&pulled[index]),
        executor,
    );

    let (_, units) = run_ranges(&scheduler, ids.len(), |index| {
        format!("range {index} failed to pull")
    })?;

    let mut map = skeleton.retained.clone();
    for unit in units {
        map.extend(unit);
    }
    Ok(map)
}

/// Submit ranges `0..count`, one progress leaf each, and collect the values
/// in range order once every range has finished.
fn run_ranges<R: Send + 'static>(
    scheduler: &Scheduler<usize, Arc<AtomicProgress>, R, Error>,
    count: usize,
    describe: impl Fn(usize) -> String,
) -> Result<(Arc<CompositeProgress>, Vec<R>)> {
    let progress = Arc::new(CompositeProgress::new());
    // Dispatch runs from the start; a bounded input only drains while it does.
    scheduler.auto(None)?;
    for index in 0..count {
        let leaf = Arc::new(AtomicProgress::new());
        progress.add(Progress::from(Arc::clone(&leaf)))?;
        scheduler.submit(index, leaf)?;
    }
    progress.seal();
    scheduler.close();

    let mut values: Vec<Option<R>> = std::iter::repeat_with(|| None).take(count).collect();
    while scheduler.has_pending() {
        let WorkResult {
            item,
            deposit,
            outcome,
            ..
        } = scheduler.accept()?;
        match outcome {
            Ok(value) => {
                values[item] = Some(value);
                deposit.set_done();
            }
            Err(failure) => deposit.set_abort(TaskAbort::with_cause(describe(item), failure)),
        }
        debug!(parts = %progress.parts(), "range finished");
    }
    scheduler.wait_dispatcher()?;

    progress.join()?;

    let values = values
        .into_iter()
        .enumerate()
        .map(|(index, value)| {
            value.ok_or_else(|| Error::Task(format!("range {index} produced no result")))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok((progress, values))
}
