//! Shared pieces used by the codec modules.

pub mod cursor;
pub mod huffman;

use crate::Error;

/// Resolve an (offset,length) region of a borrowed buffer, verifying the
/// arithmetic before any slicing happens.
pub fn slice_range(buf: &[u8], offset: usize, length: usize) -> Result<&[u8], Error> {
    match offset.checked_add(length) {
        Some(end) if end <= buf.len() => Ok(&buf[offset..end]),
        _ => Err(Error::InvalidArgument("region exceeds buffer bounds"))
    }
}

/// Mutable variant of `slice_range`.
pub fn slice_range_mut(buf: &mut [u8], offset: usize, length: usize) -> Result<&mut [u8], Error> {
    match offset.checked_add(length) {
        Some(end) if end <= buf.len() => Ok(&mut buf[offset..end]),
        _ => Err(Error::InvalidArgument("region exceeds buffer bounds"))
    }
}

#[test]
fn range_checks() {
    let buf = [0u8;10];
    assert_eq!(slice_range(&buf,2,8).unwrap().len(),8);
    assert_eq!(slice_range(&buf,2,9),Err(Error::InvalidArgument("region exceeds buffer bounds")));
    assert_eq!(slice_range(&buf,usize::MAX,2),Err(Error::InvalidArgument("region exceeds buffer bounds")));
}
