//! Framing of messages over a bounded-size characteristic.
//!
//! Every fragment starts with a one-byte header: [MORE] when further fragments follow,
//! [LAST] on the final one. The header counts towards the transport's update length, so
//! a fragment carries at most `max - 1` payload bytes.
use std::collections::VecDeque;
use std::num::NonZeroUsize;

/// Header of a fragment followed by more.
pub const MORE: u8 = 0x01;
/// Header of the final fragment of a message.
pub const LAST: u8 = 0x00;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentHeader {
    More,
    Last,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FragmentError {
    #[error("empty fragment")]
    Empty,
    #[error("invalid fragment header 0x{0:02x}")]
    InvalidHeader(u8),
}

impl TryFrom<u8> for FragmentHeader {
    type Error = FragmentError;

    fn try_from(byte: u8) -> Result<Self, FragmentError> {
        match byte {
            MORE => Ok(FragmentHeader::More),
            LAST => Ok(FragmentHeader::Last),
            other => Err(FragmentError::InvalidHeader(other)),
        }
    }
}

impl From<FragmentHeader> for u8 {
    fn from(header: FragmentHeader) -> u8 {
        match header {
            FragmentHeader::More => MORE,
            FragmentHeader::Last => LAST,
        }
    }
}

/// Number of fragments needed for `len` payload bytes at `block_size` bytes per fragment.
pub fn count_fragments(len: usize, block_size: NonZeroUsize) -> usize {
    len.div_ceil(block_size.get())
}

/// The payload slice of fragment `index`, and whether it is the last one.
pub fn fragment_slice(data: &[u8], index: usize, block_size: NonZeroUsize) -> (&[u8], bool) {
    let start = index.saturating_mul(block_size.get()).min(data.len());
    let end = start.saturating_add(block_size.get()).min(data.len());
    (&data[start..end], end == data.len())
}

/// Split `data` into header-prefixed fragments, in transmission order.
pub fn frame(data: &[u8], block_size: NonZeroUsize) -> VecDeque<Vec<u8>> {
    (0..count_fragments(data.len(), block_size))
        .map(|index| {
            let (chunk, is_last) = fragment_slice(data, index, block_size);
            let mut fragment = Vec::with_capacity(chunk.len() + 1);
            fragment.push(if is_last { LAST } else { MORE });
            fragment.extend_from_slice(chunk);
            fragment
        })
        .collect()
}

/// Append the payload of `fragment` to `buffer`.
///
/// `buffer` is left untouched when the fragment is rejected.
pub fn append_fragment(buffer: &mut Vec<u8>, fragment: &[u8]) -> Result<FragmentHeader, FragmentError> {
    let (&first, payload) = fragment.split_first().ok_or(FragmentError::Empty)?;
    let header = FragmentHeader::try_from(first)?;
    buffer.extend_from_slice(payload);
    Ok(header)
}

/// Reassemble a complete message, failing on a bad header or a missing final fragment.
pub fn reassemble<'a, I>(fragments: I) -> Result<Option<Vec<u8>>, FragmentError>
where
    I: IntoIterator<Item = &'a [u8]>,
{
    let mut buffer = Vec::new();
    for fragment in fragments {
        if append_fragment(&mut buffer, fragment)? == FragmentHeader::Last {
            return Ok(Some(buffer));
        }
    }
    Ok(None)
}
