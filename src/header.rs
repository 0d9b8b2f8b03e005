//! Raw header access for pool objects.
//!
//! Every object of the generic pool type starts with a class-info tag and a
//! reference count at fixed byte offsets. The sweep reads those two fields
//! straight from the object bytes instead of materializing a typed view, so
//! the layout here has to mirror whatever the allocator-side writers use.

use std::mem::size_of;

/// Byte positions of the two header fields inside an object.
///
/// # Examples
///
/// ```
/// use pmroot::header::HeaderLayout;
///
/// let layout = HeaderLayout::STANDARD;
/// assert_eq!(layout.class_info_offset(), 0);
/// assert_eq!(layout.ref_count_offset(), 12);
/// assert_eq!(layout.header_len(), 16);
///
/// assert!(HeaderLayout::new(0, 4).is_none());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HeaderLayout {
    class_info_offset: usize,
    ref_count_offset: usize,
}

impl HeaderLayout {
    /// Class-info word at 0, reference count at 12.
    pub const STANDARD: HeaderLayout = HeaderLayout {
        class_info_offset: 0,
        ref_count_offset: 12,
    };

    /// Reference count packed directly after the class-info word.
    pub const COMPACT: HeaderLayout = HeaderLayout {
        class_info_offset: 0,
        ref_count_offset: 8,
    };

    /// A custom layout, or `None` if the two fields overlap or would end
    /// past the address space.
    pub const fn new(class_info_offset: usize, ref_count_offset: usize) -> Option<Self> {
        match (
            class_info_offset.checked_add(size_of::<u64>()),
            ref_count_offset.checked_add(size_of::<i32>()),
        ) {
            (Some(class_end), Some(ref_end))
                if ref_count_offset >= class_end || class_info_offset >= ref_end =>
            {
                Some(Self {
                    class_info_offset,
                    ref_count_offset,
                })
            }
            _ => None,
        }
    }

    pub const fn class_info_offset(&self) -> usize {
        self.class_info_offset
    }

    pub const fn ref_count_offset(&self) -> usize {
        self.ref_count_offset
    }

    /// Number of leading bytes an object needs to carry both fields.
    pub const fn header_len(&self) -> usize {
        let class_end = self.class_info_offset + size_of::<u64>();
        let ref_end = self.ref_count_offset + size_of::<i32>();
        if class_end > ref_end { class_end } else { ref_end }
    }

    /// Encode a header into `bytes`. Returns `false` if the span is too short.
    pub fn write(&self, bytes: &mut [u8], class_info: u64, ref_count: i32) -> bool {
        if bytes.len() < self.header_len() {
            return false;
        }
        self.write_class_info(bytes, class_info);
        self.write_ref_count(bytes, ref_count);
        true
    }

    pub(crate) fn write_class_info(&self, bytes: &mut [u8], class_info: u64) {
        let at = self.class_info_offset;
        bytes[at..at + size_of::<u64>()].copy_from_slice(&class_info.to_le_bytes());
    }

    pub(crate) fn write_ref_count(&self, bytes: &mut [u8], ref_count: i32) {
        let at = self.ref_count_offset;
        bytes[at..at + size_of::<i32>()].copy_from_slice(&ref_count.to_le_bytes());
    }
}

impl Default for HeaderLayout {
    fn default() -> Self {
        Self::STANDARD
    }
}

/// How the sweep treats an object, derived purely from its header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectStatus {
    /// Class info was never committed
    Uninitialized,
    /// Initialized, but no anchors hold it
    Unreferenced,
    /// Initialized and held by at least one anchor
    Anchored,
}

impl ObjectStatus {
    pub fn is_reclaimable(self) -> bool {
        !matches!(self, ObjectStatus::Anchored)
    }
}

/// Read-only view over the leading bytes of a pool object.
#[derive(Debug, Clone, Copy)]
pub struct HeaderView<'a> {
    bytes: &'a [u8],
    layout: HeaderLayout,
}

impl<'a> HeaderView<'a> {
    pub fn new(bytes: &'a [u8], layout: HeaderLayout) -> Self {
        Self { bytes, layout }
    }

    pub fn layout(&self) -> HeaderLayout {
        self.layout
    }

    /// Whether the span is long enough to hold both fields.
    pub fn is_complete(&self) -> bool {
        self.bytes.len() >= self.layout.header_len()
    }

    /// Class-info tag; zero when missing or never written.
    pub fn class_info(&self) -> u64 {
        self.read_field::<8>(self.layout.class_info_offset)
            .map(u64::from_le_bytes)
            .unwrap_or(0)
    }

    /// Number of external anchors; zero when the field is out of range.
    pub fn ref_count(&self) -> i32 {
        self.read_field::<4>(self.layout.ref_count_offset)
            .map(i32::from_le_bytes)
            .unwrap_or(0)
    }

    pub fn is_initialized(&self) -> bool {
        self.is_complete() && self.class_info() != 0
    }

    /// Classify the object. Anything other than an exact zero count is
    /// treated as anchored, including negative counts.
    pub fn status(&self) -> ObjectStatus {
        if !self.is_initialized() {
            ObjectStatus::Uninitialized
        } else if self.ref_count() == 0 {
            ObjectStatus::Unreferenced
        } else {
            ObjectStatus::Anchored
        }
    }

    fn read_field<const N: usize>(&self, at: usize) -> Option<[u8; N]> {
        self.bytes
            .get(at..at.checked_add(N)?)
            .and_then(|field| field.try_into().ok())
    }
}
