//! Full-pool reclaim sweep.
//!
//! A sweep walks every allocation of the generic object type and, based on
//! the raw header only:
//!
//! 1. frees objects whose class info was never committed,
//! 2. frees initialized objects with a reference count of zero,
//! 3. reports everything else to a [`SurvivorSink`].
//!
//! The allocation index is snapshotted before the walk, so frees never
//! mutate the index being iterated. Each free re-reads the header inside
//! the freeing transaction; an object anchored after it was classified is
//! kept and reported instead.

use log::{info, trace, warn};

use crate::error::{PoolError, PoolResult};
use crate::header::{HeaderLayout, HeaderView, ObjectStatus};
use crate::pool::{ObjectPool, PoolOffset, TypeNum, GENERIC_TYPE_NUM};
use crate::registry::SurvivorSink;

/// Outcome of one sweep.
#[derive(Debug, Default)]
pub struct SweepReport {
    /// Objects taken from the allocation index snapshot
    pub visited: usize,
    pub reclaimed_uninitialized: usize,
    pub reclaimed_unreferenced: usize,
    /// Offsets reported to the sink
    pub survivors: usize,
    /// Survivors that were anchored between classification and free
    pub revived: usize,
    /// Objects freed by someone else after the snapshot was taken
    pub vanished: usize,
    /// One `ReclaimFailed` per object that could not be freed
    pub failures: Vec<PoolError>,
}

impl SweepReport {
    pub fn reclaimed(&self) -> usize {
        self.reclaimed_uninitialized + self.reclaimed_unreferenced
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Offsets of objects that could not be reclaimed.
    pub fn failed_offsets(&self) -> Vec<PoolOffset> {
        self.failures.iter().filter_map(PoolError::offset).collect()
    }

    /// Turn a report with failures into `SweepIncomplete`.
    pub fn into_result(self) -> PoolResult<SweepReport> {
        if self.failures.is_empty() {
            Ok(self)
        } else {
            Err(PoolError::SweepIncomplete {
                failures: self.failures,
            })
        }
    }
}

/// Drives the sweep over one pool.
///
/// # Examples
///
/// ```
/// use pmroot::header::HeaderLayout;
/// use pmroot::pool::{ArenaPool, ObjectPool, GENERIC_TYPE_NUM};
/// use pmroot::sweep::SweepEngine;
///
/// let pool = ArenaPool::anonymous(64 * 1024).unwrap();
/// let garbage = pool.allocate(GENERIC_TYPE_NUM, 16).unwrap();
/// let live = pool.allocate(GENERIC_TYPE_NUM, 16).unwrap();
/// pool.update(live, |bytes| {
///     HeaderLayout::STANDARD.write(bytes, 7, 1);
///     Ok(())
/// })
/// .unwrap();
///
/// let mut survivors = Vec::new();
/// let report = SweepEngine::new(&pool).sweep(&mut |offset: u64| survivors.push(offset));
///
/// assert_eq!(report.reclaimed(), 1);
/// assert_eq!(survivors, vec![live]);
/// assert_eq!(pool.objects_of_type(GENERIC_TYPE_NUM), vec![live]);
/// # let _ = garbage;
/// ```
pub struct SweepEngine<'p, P: ObjectPool> {
    pool: &'p P,
    layout: HeaderLayout,
    type_num: TypeNum,
}

impl<'p, P: ObjectPool> SweepEngine<'p, P> {
    pub fn new(pool: &'p P) -> Self {
        Self {
            pool,
            layout: HeaderLayout::STANDARD,
            type_num: GENERIC_TYPE_NUM,
        }
    }

    pub fn with_layout(mut self, layout: HeaderLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Sweep objects of `type_num` instead of the generic type.
    pub fn with_type_num(mut self, type_num: TypeNum) -> Self {
        self.type_num = type_num;
        self
    }

    /// Classify every object without freeing anything.
    pub fn classify(&self) -> Vec<(PoolOffset, ObjectStatus)> {
        let layout = self.layout;
        self.pool
            .objects_of_type(self.type_num)
            .into_iter()
            .filter_map(|offset| {
                self.pool
                    .with_object(offset, |bytes| HeaderView::new(bytes, layout).status())
                    .ok()
                    .map(|status| (offset, status))
            })
            .collect()
    }

    /// Run one sweep, reporting survivors to `sink` synchronously in
    /// allocation-index order.
    pub fn sweep<S>(&self, sink: &mut S) -> SweepReport
    where
        S: SurvivorSink + ?Sized,
    {
        let mut report = SweepReport::default();
        let snapshot = self.pool.objects_of_type(self.type_num);

        for offset in snapshot {
            report.visited += 1;
            self.visit(offset, sink, &mut report);
        }

        info!(
            "Sweep visited {} objects: reclaimed {} ({} uninitialized, {} unreferenced), \
             {} survivors, {} failures",
            report.visited,
            report.reclaimed(),
            report.reclaimed_uninitialized,
            report.reclaimed_unreferenced,
            report.survivors,
            report.failures.len()
        );
        report
    }

    fn visit<S>(&self, offset: PoolOffset, sink: &mut S, report: &mut SweepReport)
    where
        S: SurvivorSink + ?Sized,
    {
        let layout = self.layout;
        let observed = self.pool.with_object(offset, |bytes| {
            let view = HeaderView::new(bytes, layout);
            (view.status(), view.ref_count())
        });

        let status = match observed {
            Ok((ObjectStatus::Anchored, ref_count)) => {
                if ref_count < 0 {
                    warn!(
                        "Object at {offset:#x} has negative reference count {ref_count}; keeping it"
                    );
                }
                trace!("Object at {offset:#x} survives with {ref_count} anchors");
                report.survivors += 1;
                sink.report(offset);
                return;
            }
            Ok((status, _)) => status,
            Err(PoolError::ObjectNotFound(_)) => {
                report.vanished += 1;
                return;
            }
            Err(err) => {
                warn!("Could not read header at {offset:#x}: {err}");
                report.failures.push(reclaim_failed(offset, err));
                return;
            }
        };

        let mut freed_as = status;
        let freed = self.pool.free_if(offset, |bytes| {
            freed_as = HeaderView::new(bytes, layout).status();
            freed_as.is_reclaimable()
        });

        match freed {
            Ok(true) => {
                trace!("Reclaimed {freed_as:?} object at {offset:#x}");
                match freed_as {
                    ObjectStatus::Uninitialized => report.reclaimed_uninitialized += 1,
                    _ => report.reclaimed_unreferenced += 1,
                }
            }
            Ok(false) => {
                trace!("Object at {offset:#x} was anchored before it could be freed");
                report.revived += 1;
                report.survivors += 1;
                sink.report(offset);
            }
            Err(PoolError::ObjectNotFound(_)) => report.vanished += 1,
            Err(err) => {
                warn!("Failed to reclaim object at {offset:#x}: {err}");
                report.failures.push(reclaim_failed(offset, err));
            }
        }
    }
}

fn reclaim_failed(offset: PoolOffset, err: PoolError) -> PoolError {
    match err {
        PoolError::ReclaimFailed { .. } => err,
        other => PoolError::ReclaimFailed {
            offset,
            reason: other.to_string(),
        },
    }
}
