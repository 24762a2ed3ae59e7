use thiserror::Error;

/// First three bytes of every gzip member: ID1, ID2, CM = deflate.
pub const MEMBER_MAGIC: [u8; 3] = [0x1f, 0x8b, 0x08];

/// FLG bit announcing an extra field after the fixed 10-byte header.
pub const FLG_FEXTRA: u8 = 0x04;

/// Subfield id of the member-length field ("PG").
pub const LENGTH_SUBFIELD_ID: [u8; 2] = *b"PG";

/// Size of the FEXTRA payload written into every member:
///   SI1 SI2 + LEN:u16 + member_len:u32 = 2 + 2 + 4 = 8
pub const LENGTH_SUBFIELD_SIZE: usize = 8;

/// Fixed prefix of a member written by this tool:
///   fixed gzip header[10] + XLEN:u16 + length subfield[8] = 20
pub const MEMBER_HEADER_SIZE: usize = 20;

/// Byte offset of the little-endian u32 member length inside the header.
pub const MEMBER_LEN_OFFSET: usize = 16;

/// gzip trailer: CRC32:u32 + ISIZE:u32.
pub const MEMBER_TRAILER_SIZE: usize = 8;

/// Smallest member the length-prefixed reader accepts.
pub const MIN_MEMBER_LEN: usize = MEMBER_HEADER_SIZE + MEMBER_TRAILER_SIZE;

/// Default raw bytes per block: 64 KB.
pub const DEFAULT_BLOCK_SIZE: usize = 64 * 1024;

/// Largest configurable block size: 16 MB.
pub const MAX_BLOCK_SIZE: usize = 16 * 1024 * 1024;

/// Upper bound on a member length accepted from the stream. Stored deflate
/// blocks add a few bytes per 64 KB, so twice the largest block is ample.
pub const MAX_MEMBER_LEN: usize = 2 * MAX_BLOCK_SIZE;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct FormatError(pub String);

impl FormatError {
    fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// FEXTRA payload handed to the codec for every compressed block. The length
/// slot is zero until [`MemberHeader::stamp`] fills it in.
pub fn length_subfield() -> [u8; LENGTH_SUBFIELD_SIZE] {
    let mut buf = [0u8; LENGTH_SUBFIELD_SIZE];
    buf[0..2].copy_from_slice(&LENGTH_SUBFIELD_ID);
    buf[2..4].copy_from_slice(&4u16.to_le_bytes());
    buf
}

/// Decoded view of the 20-byte header this tool puts on every member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemberHeader {
    /// Total bytes of the member, header and trailer included.
    pub member_len: u32,
}

impl MemberHeader {
    /// Parse a header read from the stream, checking the signature and the
    /// length subfield.
    pub fn from_bytes(buf: &[u8; MEMBER_HEADER_SIZE]) -> Result<Self, FormatError> {
        check_layout(buf)?;
        let member_len = u32::from_le_bytes([buf[16], buf[17], buf[18], buf[19]]);
        let len = member_len as usize;
        if len < MIN_MEMBER_LEN {
            return Err(FormatError::new(format!(
                "member length {len} is smaller than the minimum of {MIN_MEMBER_LEN} bytes"
            )));
        }
        if len > MAX_MEMBER_LEN {
            return Err(FormatError::new(format!(
                "member length {len} exceeds the maximum of {MAX_MEMBER_LEN} bytes"
            )));
        }
        Ok(Self { member_len })
    }

    /// Write the member's own total length into its header.
    ///
    /// The member must carry the zeroed length subfield produced by
    /// [`length_subfield`] as its only extra field.
    pub fn stamp(member: &mut [u8]) -> Result<Self, FormatError> {
        if member.len() < MIN_MEMBER_LEN {
            return Err(FormatError::new(format!(
                "codec produced a {}-byte member, shorter than a gzip header and trailer",
                member.len()
            )));
        }
        check_layout(&member[..MEMBER_HEADER_SIZE])?;
        let len = member.len();
        if len > MAX_MEMBER_LEN {
            return Err(FormatError::new(format!(
                "member of {len} bytes exceeds the maximum of {MAX_MEMBER_LEN} bytes"
            )));
        }
        let member_len = len as u32;
        member[MEMBER_LEN_OFFSET..MEMBER_HEADER_SIZE].copy_from_slice(&member_len.to_le_bytes());
        Ok(Self { member_len })
    }
}

fn check_layout(header: &[u8]) -> Result<(), FormatError> {
    if header[..3] != MEMBER_MAGIC {
        return Err(FormatError::new(format!(
            "bad member signature {:02x} {:02x} {:02x}; not a gzip member",
            header[0], header[1], header[2]
        )));
    }
    if header[3] & FLG_FEXTRA == 0 {
        return Err(FormatError::new(
            "member has no extra field; archive was not created by this program",
        ));
    }
    let xlen = u16::from_le_bytes([header[10], header[11]]) as usize;
    if xlen != LENGTH_SUBFIELD_SIZE || header[12..14] != LENGTH_SUBFIELD_ID {
        return Err(FormatError::new(
            "member extra field does not hold a length subfield",
        ));
    }
    if u16::from_le_bytes([header[14], header[15]]) != 4 {
        return Err(FormatError::new("length subfield has an unexpected size"));
    }
    Ok(())
}

/// Position of the first member signature in `haystack` at or after `from`.
pub fn find_member_magic(haystack: &[u8], from: usize) -> Option<usize> {
    if from >= haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(MEMBER_MAGIC.len())
        .position(|w| w == MEMBER_MAGIC)
        .map(|pos| from + pos)
}
