#![no_main]

use libfuzzer_sys::fuzz_target;
use pmroot::header::{HeaderLayout, HeaderView, ObjectStatus};

fuzz_target!(|data: &[u8]| {
    for layout in [HeaderLayout::STANDARD, HeaderLayout::COMPACT] {
        let view = HeaderView::new(data, layout);
        let status = view.status();

        if !view.is_complete() {
            assert_eq!(status, ObjectStatus::Uninitialized);
            continue;
        }
        match status {
            ObjectStatus::Uninitialized => assert_eq!(view.class_info(), 0),
            ObjectStatus::Unreferenced => assert_eq!(view.ref_count(), 0),
            ObjectStatus::Anchored => assert_ne!(view.ref_count(), 0),
        }

        // Re-encoding what was read must give back the same header.
        let mut copy = data.to_vec();
        assert!(layout.write(&mut copy, view.class_info(), view.ref_count()));
        assert_eq!(&copy[..layout.header_len()], &data[..layout.header_len()]);
    }
});
