mod common;

use pmroot::{
    error::PoolError,
    header::{HeaderLayout, ObjectStatus},
    pool::{ArenaPool, ObjectPool, GENERIC_TYPE_NUM},
    sweep::SweepEngine,
    test_utils::PoolFixture,
};

#[test]
fn sweep_frees_garbage_and_reports_the_anchored_object() {
    common::init_test_logging();
    let fixture = PoolFixture::new();
    let xroot = fixture.xroot();
    let objs = fixture.objects(&[(0, 0), (7, 0), (7, 2)]);
    let (registry, context) = common::bound_registry();

    let report = xroot.retrieve_anchored_addrs(&context);

    assert_eq!(registry.addrs(), vec![objs[2]]);
    assert_eq!(report.visited, 3);
    assert_eq!(report.reclaimed_uninitialized, 1);
    assert_eq!(report.reclaimed_unreferenced, 1);
    assert_eq!(report.survivors, 1);
    assert!(report.is_clean());
    assert_eq!(fixture.live_objects(), vec![objs[2]]);
    assert_eq!(fixture.header(objs[2]), Some((7, 2)));
}

#[test]
fn second_sweep_reports_the_same_survivors_and_frees_nothing() {
    let fixture = PoolFixture::new();
    let xroot = fixture.xroot();
    fixture.objects(&[(0, 0), (1, 1), (2, 0), (3, 5), (4, 0), (5, 1)]);

    let mut first = Vec::new();
    let report = xroot.sweep_into(&mut |o: u64| first.push(o));
    assert_eq!(report.reclaimed(), 3);

    let mut second = Vec::new();
    let report = xroot.sweep_into(&mut |o: u64| second.push(o));
    assert_eq!(report.reclaimed(), 0);
    assert_eq!(first, second);
    assert_eq!(fixture.live_objects(), second);
}

#[test]
fn survivors_are_reported_in_allocation_order() {
    let fixture = PoolFixture::new();
    let objs = fixture.objects(&[(9, 1), (9, 0), (9, 3), (0, 0), (9, 1)]);

    let mut seen = Vec::new();
    fixture.xroot().sweep_into(&mut |o: u64| seen.push(o));
    assert_eq!(seen, vec![objs[0], objs[2], objs[4]]);
}

#[test]
fn empty_pool_sweep_is_a_no_op() {
    let fixture = PoolFixture::new();
    let (registry, context) = common::bound_registry();
    let report = fixture.xroot().retrieve_anchored_addrs(&context);
    assert_eq!(report.visited, 0);
    assert!(registry.is_empty());
}

#[test]
fn failed_reclaim_leaves_the_object_byte_for_byte() {
    common::init_test_logging();
    let fixture = PoolFixture::new();
    let victim = fixture.object(0xDEAD_BEEF, 0);
    let bystander = fixture.object(0, 0);
    fixture
        .pool
        .update(victim, |bytes| {
            bytes[16..].fill(0x5C);
            Ok(())
        })
        .unwrap();
    let before = fixture.pool.read_bytes(victim).unwrap();

    fixture.pool.faults().fail_free_at(victim);
    let report = fixture.xroot().sweep_into(&mut |_: u64| {});

    assert_eq!(report.failed_offsets(), vec![victim]);
    assert_eq!(report.reclaimed_uninitialized, 1);
    assert_eq!(fixture.pool.read_bytes(victim).unwrap(), before);
    assert!(fixture.pool.read_bytes(bystander).is_err());
    assert_eq!(fixture.live_objects(), vec![victim]);

    // Once the fault is cleared the same object goes on the next sweep.
    fixture.pool.faults().clear();
    let report = fixture.xroot().sweep_into(&mut |_: u64| {});
    assert!(report.is_clean());
    assert_eq!(report.reclaimed_unreferenced, 1);
    assert!(fixture.live_objects().is_empty());
}

#[test]
fn incomplete_sweep_converts_into_an_error() {
    let fixture = PoolFixture::new();
    let a = fixture.object(0, 0);
    let b = fixture.object(4, 0);
    fixture.pool.faults().fail_next_frees(2);

    let report = fixture.xroot().sweep_into(&mut |_: u64| {});
    assert_eq!(report.failed_offsets(), vec![a, b]);
    match report.into_result() {
        Err(PoolError::SweepIncomplete { failures }) => {
            assert_eq!(failures.len(), 2);
            assert!(failures
                .iter()
                .all(|f| matches!(f, PoolError::ReclaimFailed { .. })));
        }
        other => panic!("expected SweepIncomplete, got {other:?}"),
    }
}

#[test]
fn root_region_is_never_swept() {
    let fixture = PoolFixture::new();
    let xroot = fixture.xroot();
    let root = xroot.create_root(4096).unwrap();
    fixture.objects(&[(0, 0), (0, 0)]);

    let report = xroot.sweep_into(&mut |_: u64| {});
    assert_eq!(report.reclaimed_uninitialized, 2);
    assert_eq!(xroot.root_offset().unwrap(), root);
    assert_eq!(fixture.pool.read_bytes(root).unwrap().len(), 4096);
}

#[test]
fn compact_layout_sweeps_by_count_at_eight() {
    let fixture = PoolFixture::new().with_layout(HeaderLayout::COMPACT);
    let objs = fixture.objects(&[(7, 0), (7, 1)]);

    let mut seen = Vec::new();
    let report = fixture.xroot().sweep_into(&mut |o: u64| seen.push(o));
    assert_eq!(seen, vec![objs[1]]);
    assert_eq!(report.reclaimed_unreferenced, 1);
}

#[test]
fn classification_matches_what_a_sweep_does() {
    let pool = ArenaPool::anonymous(64 * 1024).unwrap();
    let fixture = PoolFixture::with_pool(pool);
    let objs = fixture.objects(&[(0, 0), (2, 0), (2, 1)]);

    let classes = SweepEngine::new(&*fixture.pool).classify();
    assert_eq!(
        classes,
        vec![
            (objs[0], ObjectStatus::Uninitialized),
            (objs[1], ObjectStatus::Unreferenced),
            (objs[2], ObjectStatus::Anchored),
        ]
    );
    assert_eq!(fixture.pool.objects_of_type(GENERIC_TYPE_NUM).len(), 3);
}

#[test]
fn sweep_totals_accumulate_per_handle() {
    let fixture = PoolFixture::new();
    let xroot = fixture.xroot();
    fixture.objects(&[(0, 0), (1, 1)]);
    xroot.sweep_into(&mut |_: u64| {});
    fixture.objects(&[(1, 0)]);
    xroot.sweep_into(&mut |_: u64| {});

    let totals = xroot.totals();
    assert_eq!(totals.sweeps, 2);
    assert_eq!(totals.reclaimed, 2);
    assert_eq!(totals.survivors_reported, 2);
    assert_eq!(totals.failures, 0);
}
