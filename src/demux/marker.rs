use memchr::memmem;

/// Start Of Image.
pub const FRAME_START: [u8; 2] = [0xFF, 0xD8];
/// End Of Image.
pub const FRAME_END: [u8; 2] = [0xFF, 0xD9];

pub(crate) fn find_marker(haystack: &[u8], marker: &[u8; 2]) -> Option<usize> {
    memmem::find(haystack, marker)
}
