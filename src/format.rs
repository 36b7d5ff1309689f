//! Record data-format tags (the 4-bit format field packed into every
//! record header) plus the four native-endianness convenience requests
//! that `start_record` collapses to a concrete tag.

use crate::byteorder::Endian;

/// A record's data format. The first twelve variants are concrete,
/// on-the-wire tags (0x0-0xB). The last four (`BinInt32`, `BinInt64`,
/// `BinF32`, `BinF64`) are endianness-agnostic requests: valid only as an
/// argument to `start_record`/`append_record`, never stored in a header —
/// `start_record` resolves them to the concrete BE/LE variant matching the
/// writer's native endianness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    BinGeneric,
    AscExec,
    BinInt32Be,
    BinInt32Le,
    BinInt64Be,
    BinInt64Le,
    BinF32Be,
    BinF32Le,
    BinF64Be,
    BinF64Le,
    AscGeneric,
    AscXml,
    BinInt32,
    BinInt64,
    BinF32,
    BinF64,
}

impl Format {
    /// Decode a concrete 4-bit wire tag. Returns `None` for tags with no
    /// assigned meaning (15, 12-14 are unused wire values; 0xF0-0xF3 only
    /// ever appear as in-memory requests, never on the wire).
    pub fn from_tag(tag: u8) -> Option<Format> {
        use Format::*;
        Some(match tag {
            0x0 => BinGeneric,
            0x1 => AscExec,
            0x2 => BinInt32Be,
            0x3 => BinInt32Le,
            0x4 => BinInt64Be,
            0x5 => BinInt64Le,
            0x6 => BinF32Be,
            0x7 => BinF32Le,
            0x8 => BinF64Be,
            0x9 => BinF64Le,
            0xA => AscGeneric,
            0xB => AscXml,
            _ => return None,
        })
    }

    /// The 4-bit wire tag for a concrete format. `None` for the four
    /// endianness-agnostic request variants, which never appear on the wire.
    pub fn wire_tag(self) -> Option<u8> {
        use Format::*;
        Some(match self {
            BinGeneric => 0x0,
            AscExec => 0x1,
            BinInt32Be => 0x2,
            BinInt32Le => 0x3,
            BinInt64Be => 0x4,
            BinInt64Le => 0x5,
            BinF32Be => 0x6,
            BinF32Le => 0x7,
            BinF64Be => 0x8,
            BinF64Le => 0x9,
            AscGeneric => 0xA,
            AscXml => 0xB,
            BinInt32 | BinInt64 | BinF32 | BinF64 => return None,
        })
    }

    /// Item size in bytes, used to validate `nb % item_size == 0` on typed
    /// reads/writes and to pick the swap width.
    pub fn item_size(self) -> usize {
        use Format::*;
        match self {
            BinGeneric | AscExec | AscGeneric | AscXml => 1,
            BinInt32Be | BinInt32Le | BinInt32 | BinF32Be | BinF32Le | BinF32 => 4,
            BinInt64Be | BinInt64Le | BinInt64 | BinF64Be | BinF64Le | BinF64 => 8,
        }
    }

    /// Declared endianness of a concrete sized format; `None` for the
    /// generic/text formats (which carry no per-item endianness) and for
    /// the unresolved agnostic requests.
    pub fn endian(self) -> Option<Endian> {
        use Format::*;
        match self {
            BinInt32Be | BinInt64Be | BinF32Be | BinF64Be => Some(Endian::Big),
            BinInt32Le | BinInt64Le | BinF32Le | BinF64Le => Some(Endian::Little),
            _ => None,
        }
    }

    /// Collapse an endianness-agnostic request to the concrete BE/LE
    /// variant matching `native`. Concrete formats pass through unchanged.
    pub fn resolve(self, native: Endian) -> Format {
        use Format::*;
        match self {
            BinInt32 => if native == Endian::Little { BinInt32Le } else { BinInt32Be },
            BinInt64 => if native == Endian::Little { BinInt64Le } else { BinInt64Be },
            BinF32 => if native == Endian::Little { BinF32Le } else { BinF32Be },
            BinF64 => if native == Endian::Little { BinF64Le } else { BinF64Be },
            other => other,
        }
    }

    /// Whether this endianness-agnostic request is satisfied by a concrete
    /// format already in force (used by `append_record`, which must accept
    /// either BE or LE when the caller asks for the agnostic form again).
    pub fn agnostic_matches(self, concrete: Format) -> bool {
        use Format::*;
        matches!(
            (self, concrete),
            (BinInt32, BinInt32Be)
                | (BinInt32, BinInt32Le)
                | (BinInt64, BinInt64Be)
                | (BinInt64, BinInt64Le)
                | (BinF32, BinF32Be)
                | (BinF32, BinF32Le)
                | (BinF64, BinF64Be)
                | (BinF64, BinF64Le)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_concrete_tags() {
        for tag in 0..=0xBu8 {
            let fmt = Format::from_tag(tag).expect("tag in range");
            assert_eq!(fmt.wire_tag(), Some(tag));
        }
    }

    #[test]
    fn unassigned_tags_reject() {
        assert!(Format::from_tag(0xC).is_none());
        assert!(Format::from_tag(0xF).is_none());
    }

    #[test]
    fn agnostic_resolves_per_native() {
        assert_eq!(Format::BinInt32.resolve(Endian::Little), Format::BinInt32Le);
        assert_eq!(Format::BinInt32.resolve(Endian::Big), Format::BinInt32Be);
    }

    #[test]
    fn agnostic_matches_either_width() {
        assert!(Format::BinF64.agnostic_matches(Format::BinF64Be));
        assert!(Format::BinF64.agnostic_matches(Format::BinF64Le));
        assert!(!Format::BinF64.agnostic_matches(Format::BinF32Be));
    }

    #[test]
    fn item_sizes() {
        assert_eq!(Format::BinGeneric.item_size(), 1);
        assert_eq!(Format::BinInt32Be.item_size(), 4);
        assert_eq!(Format::BinF64Le.item_size(), 8);
    }
}
