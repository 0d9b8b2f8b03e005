#![no_main]

use libfuzzer_sys::fuzz_target;
use pmroot::pool::ObjectPool;
use pmroot::test_utils::PoolFixture;

// Drive a pool through allocate/anchor/release/sweep sequences and check
// that a sweep only ever leaves initialized, referenced objects behind.
fuzz_target!(|data: &[u8]| {
    let fixture = PoolFixture::with_capacity(256 * 1024);
    let xroot = fixture.xroot();
    let mut objects = Vec::new();

    for chunk in data.chunks(2) {
        let [op, arg] = [chunk[0], *chunk.get(1).unwrap_or(&0)];
        match op % 5 {
            0 | 1 => {
                let class_info = u64::from(arg % 4);
                if let Ok(offset) = fixture.try_object(class_info, i32::from(arg % 3)) {
                    objects.push(offset);
                }
            }
            2 if !objects.is_empty() => {
                let _ = xroot.anchor(objects[arg as usize % objects.len()]);
            }
            3 if !objects.is_empty() => {
                let _ = xroot.release(objects[arg as usize % objects.len()]);
            }
            _ => {
                let report = xroot.sweep_into(&mut |_: u64| {});
                assert!(report.is_clean());
                for offset in fixture.live_objects() {
                    let (class_info, ref_count) = fixture.header(offset).unwrap();
                    assert!(class_info != 0 && ref_count != 0);
                }
                objects.retain(|o| fixture.pool.with_object(*o, |_| ()).is_ok());
            }
        }
    }
});
