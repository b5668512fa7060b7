//! The on-disk index format.
//!
//! ```text
//! header      "DIRC" | version: u32 | entry count: u32
//! entries     stat fields (10 x u32) | object id (32 bytes) | flags: u16
//!             [extended flags: u16] | path | NUL padding (v2/v3)
//!             ... | varint strip count | path suffix | NUL (v4)
//! extensions  signature (4 bytes) | size: u32 | body
//! trailer     SHA-256 of everything above
//! ```
//!
//! All integers are big-endian.

use std::io::{self, Write};

use bstr::{BString, ByteSlice};
use dircache_crypto::{verify_trailer, ChecksumWriter, TRAILER_LEN};
use dircache_store::EntryMode;
use dircache_types::{ObjectId, OBJECT_ID_LEN};
use tracing::debug;

use crate::cache_tree::CacheTree;
use crate::config::IndexVersion;
use crate::entry::{validate_path, EntryFlags, IndexEntry, Stage, StatTime};
use crate::error::{IndexError, IndexResult};
use crate::table::validate_all;

pub(crate) const SIGNATURE: &[u8; 4] = b"DIRC";
const TREE_SIGNATURE: &[u8; 4] = b"TREE";
const HEADER_LEN: usize = 12;

const FLAG_ASSUME_VALID: u16 = 0x8000;
const FLAG_EXTENDED: u16 = 0x4000;
const FLAG_STAGE_SHIFT: u16 = 12;
const FLAG_NAME_MASK: u16 = 0x0fff;

const EXT_SKIP_WORKTREE: u16 = 0x4000;
const EXT_INTENT_TO_ADD: u16 = 0x2000;
const EXT_KNOWN: u16 = EXT_SKIP_WORKTREE | EXT_INTENT_TO_ADD;

/// Stat fields, object id and flags word.
const FIXED_LEN: usize = 10 * 4 + OBJECT_ID_LEN + 2;

/// A parsed index file.
#[derive(Debug)]
pub(crate) struct DecodedIndex {
    pub version: IndexVersion,
    pub entries: Vec<IndexEntry>,
    pub cache_tree: CacheTree,
}

/// The version actually written for `requested`: versions 2 and 3 follow
/// whether any entry needs extended flags; version 4 is kept as is.
pub(crate) fn effective_version(requested: IndexVersion, entries: &[IndexEntry]) -> IndexVersion {
    match requested {
        IndexVersion::V4 => IndexVersion::V4,
        _ if entries.iter().any(|e| e.flags.needs_extended()) => IndexVersion::V3,
        _ => IndexVersion::V2,
    }
}

/// Serialize a complete index image, trailer included.
pub(crate) fn encode<W: Write>(
    inner: W,
    entries: &[IndexEntry],
    cache_tree: &CacheTree,
    version: IndexVersion,
) -> io::Result<W> {
    let mut out = ChecksumWriter::new(inner);
    out.write_all(SIGNATURE)?;
    out.write_all(&version.as_u32().to_be_bytes())?;
    out.write_all(&(entries.len() as u32).to_be_bytes())?;

    let mut record = Vec::with_capacity(FIXED_LEN + 64);
    let mut previous: &[u8] = b"";
    for entry in entries {
        record.clear();
        encode_entry(&mut record, entry, version, previous);
        out.write_all(&record)?;
        previous = entry.path.as_slice();
    }

    if !cache_tree.is_empty() {
        let mut body = Vec::new();
        cache_tree.encode(&mut body);
        out.write_all(TREE_SIGNATURE)?;
        out.write_all(&(body.len() as u32).to_be_bytes())?;
        out.write_all(&body)?;
    }

    let (inner, _) = out.finish()?;
    Ok(inner)
}

fn encode_entry(buf: &mut Vec<u8>, entry: &IndexEntry, version: IndexVersion, previous: &[u8]) {
    let start = buf.len();
    for field in [
        entry.ctime.secs,
        entry.ctime.nanos,
        entry.mtime.secs,
        entry.mtime.nanos,
        entry.dev,
        entry.ino,
        entry.mode.mode_bits(),
        entry.uid,
        entry.gid,
        entry.size,
    ] {
        buf.extend_from_slice(&field.to_be_bytes());
    }
    buf.extend_from_slice(entry.object_id.as_bytes());

    let extended = version != IndexVersion::V2 && entry.flags.needs_extended();
    let mut flags = (entry.path.len().min(FLAG_NAME_MASK as usize) as u16)
        | ((entry.stage.as_u8() as u16) << FLAG_STAGE_SHIFT);
    if entry.flags.assume_valid {
        flags |= FLAG_ASSUME_VALID;
    }
    if extended {
        flags |= FLAG_EXTENDED;
    }
    buf.extend_from_slice(&flags.to_be_bytes());
    if extended {
        let mut ext = 0u16;
        if entry.flags.skip_worktree {
            ext |= EXT_SKIP_WORKTREE;
        }
        if entry.flags.intent_to_add {
            ext |= EXT_INTENT_TO_ADD;
        }
        buf.extend_from_slice(&ext.to_be_bytes());
    }

    let path = entry.path.as_slice();
    match version {
        IndexVersion::V4 => {
            let common = previous
                .iter()
                .zip(path)
                .take_while(|(a, b)| a == b)
                .count();
            encode_offset_varint(buf, (previous.len() - common) as u64);
            buf.extend_from_slice(&path[common..]);
            buf.push(0);
        }
        IndexVersion::V2 | IndexVersion::V3 => {
            buf.extend_from_slice(path);
            let padded = (buf.len() - start + 8) & !7;
            buf.resize(start + padded, 0);
        }
    }
}

/// Parse and verify a complete index image.
pub(crate) fn decode(data: &[u8]) -> IndexResult<DecodedIndex> {
    if data.len() < HEADER_LEN + TRAILER_LEN {
        return Err(IndexError::format(data.len(), "file too short"));
    }
    let body = verify_trailer(data).ok_or(IndexError::ChecksumMismatch)?;

    let mut r = Reader { data: body, pos: 0 };
    if r.take(4)? != SIGNATURE {
        return Err(IndexError::format(0, "bad signature"));
    }
    let version = IndexVersion::try_from(r.u32()?)?;
    let count = r.u32()? as usize;

    let mut entries: Vec<IndexEntry> = Vec::with_capacity(count.min(body.len() / FIXED_LEN));
    for _ in 0..count {
        let offset = r.pos;
        let previous = entries.last().map(|e| e.path.as_slice()).unwrap_or_default();
        let entry = decode_entry(&mut r, version, previous)?;
        validate_path(&entry.path)?;
        if let Some(prev) = entries.last() {
            if prev.cmp_key(&entry) != std::cmp::Ordering::Less {
                return Err(IndexError::format(
                    offset,
                    format!("entry {:?} out of order", entry.path),
                ));
            }
        }
        entries.push(entry);
    }
    validate_all(&entries)?;

    let mut cache_tree = CacheTree::new();
    while r.remaining() > 0 {
        let offset = r.pos;
        let signature = r.take(4)?;
        let size = r.u32()? as usize;
        let payload = r.take(size)?;
        if signature == TREE_SIGNATURE {
            cache_tree = CacheTree::decode(payload)?;
            cache_tree.verify(&entries)?;
        } else if signature[0].is_ascii_uppercase() {
            debug!(
                signature = %signature.as_bstr(),
                size,
                offset,
                "skipping optional index extension"
            );
        } else {
            return Err(IndexError::UnsupportedExtension(
                signature.to_str_lossy().into_owned(),
            ));
        }
    }

    Ok(DecodedIndex {
        version,
        entries,
        cache_tree,
    })
}

fn decode_entry(r: &mut Reader<'_>, version: IndexVersion, previous: &[u8]) -> IndexResult<IndexEntry> {
    let start = r.pos;
    let ctime = StatTime::new(r.u32()?, r.u32()?);
    let mtime = StatTime::new(r.u32()?, r.u32()?);
    let dev = r.u32()?;
    let ino = r.u32()?;
    let mode_bits = r.u32()?;
    let uid = r.u32()?;
    let gid = r.u32()?;
    let size = r.u32()?;
    let object_id = ObjectId::from_slice(r.take(OBJECT_ID_LEN)?)
        .map_err(|e| IndexError::format(start, e.to_string()))?;
    let flags = r.u16()?;

    // 040000 is a sparse-directory placeholder.
    let mode = EntryMode::from_mode_bits(mode_bits)
        .ok_or_else(|| IndexError::format(start, format!("invalid mode {mode_bits:o}")))?;
    let stage = Stage::from_u8(((flags >> FLAG_STAGE_SHIFT) & 0x3) as u8)
        .ok_or_else(|| IndexError::format(start, "invalid stage"))?;

    let mut entry_flags = EntryFlags {
        assume_valid: flags & FLAG_ASSUME_VALID != 0,
        ..EntryFlags::default()
    };
    if flags & FLAG_EXTENDED != 0 {
        if version == IndexVersion::V2 {
            return Err(IndexError::format(start, "extended flags in version 2"));
        }
        let ext = r.u16()?;
        if ext & !EXT_KNOWN != 0 {
            return Err(IndexError::format(start, format!("unknown extended flags {ext:#06x}")));
        }
        entry_flags.skip_worktree = ext & EXT_SKIP_WORKTREE != 0;
        entry_flags.intent_to_add = ext & EXT_INTENT_TO_ADD != 0;
    }

    let name_len = (flags & FLAG_NAME_MASK) as usize;
    let header_len = r.pos - start;
    let path = match version {
        IndexVersion::V4 => {
            let strip = r.offset_varint()? as usize;
            if strip > previous.len() {
                return Err(IndexError::format(start, "prefix strip exceeds previous path"));
            }
            let suffix = r.until_nul()?;
            let mut path = BString::from(&previous[..previous.len() - strip]);
            path.extend_from_slice(suffix);
            path
        }
        IndexVersion::V2 | IndexVersion::V3 => {
            let path = if name_len < FLAG_NAME_MASK as usize {
                BString::from(r.take(name_len)?)
            } else {
                BString::from(r.until_nul()?)
            };
            let record = (header_len + path.len() + 8) & !7;
            r.seek(start + record)?;
            path
        }
    };
    if name_len < FLAG_NAME_MASK as usize && name_len != path.len() {
        return Err(IndexError::format(start, "name length disagrees with path"));
    }

    Ok(IndexEntry {
        path,
        stage,
        mode,
        object_id,
        ctime,
        mtime,
        dev,
        ino,
        uid,
        gid,
        size,
        flags: entry_flags,
    })
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, n: usize) -> IndexResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| IndexError::format(self.pos, "unexpected end of data"))?;
        let data = self.data;
        let bytes = &data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn seek(&mut self, pos: usize) -> IndexResult<()> {
        if pos > self.data.len() {
            return Err(IndexError::format(self.pos, "record extends past end of data"));
        }
        self.pos = pos;
        Ok(())
    }

    fn u16(&mut self) -> IndexResult<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> IndexResult<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Bytes up to the next NUL, which is consumed.
    fn until_nul(&mut self) -> IndexResult<&'a [u8]> {
        let data = self.data;
        let rest = &data[self.pos..];
        let nul = rest
            .find_byte(0)
            .ok_or_else(|| IndexError::format(self.pos, "unterminated path"))?;
        self.pos += nul + 1;
        Ok(&rest[..nul])
    }

    fn offset_varint(&mut self) -> IndexResult<u64> {
        let (value, used) = decode_offset_varint(&self.data[self.pos..])
            .ok_or_else(|| IndexError::format(self.pos, "bad prefix length"))?;
        self.pos += used;
        Ok(value)
    }
}

/// Big-endian base-128 integer where each continuation adds one, so every
/// value has exactly one encoding.
pub(crate) fn encode_offset_varint(buf: &mut Vec<u8>, mut value: u64) {
    let mut tmp = [0u8; 10];
    let mut pos = tmp.len() - 1;
    tmp[pos] = (value & 0x7f) as u8;
    value >>= 7;
    while value != 0 {
        value -= 1;
        pos -= 1;
        tmp[pos] = 0x80 | (value & 0x7f) as u8;
        value >>= 7;
    }
    buf.extend_from_slice(&tmp[pos..]);
}

/// Decode an offset varint. Returns (value, bytes consumed), or `None` on
/// truncation or overflow.
pub(crate) fn decode_offset_varint(data: &[u8]) -> Option<(u64, usize)> {
    let mut bytes = data.iter();
    let mut c = *bytes.next()?;
    let mut value = (c & 0x7f) as u64;
    let mut used = 1;
    while c & 0x80 != 0 {
        c = *bytes.next()?;
        used += 1;
        value = value
            .checked_add(1)?
            .checked_mul(128)?
            .checked_add((c & 0x7f) as u64)?;
    }
    Some((value, used))
}
