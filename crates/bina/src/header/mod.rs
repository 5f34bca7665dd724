//! Container header dialects.
//!
//! Every dialect follows the same two-phase contract. On write,
//! [`Header::prepare_write`] reserves a zero-filled block and fixes the base
//! offset before any data is written; [`Header::finish_write`] runs once the
//! body, string table and relocation table are in place, and seeks back to
//! fill in sizes that were unknown until then. On read, [`Header::read`]
//! parses the fields and configures the reader's byte order and base offset.

mod bina_v1;
mod bina_v2;
mod gens;
mod mirage;
mod pacx;

use std::io::{Read, Seek, Write};

pub use bina_v1::BinaV1Header;
pub use bina_v2::BinaV2Header;
pub use gens::GensHeader;
pub use mirage::{MirageHeader, MirageNode};
pub use pacx::{PacType, PacxHeader};

use crate::{
    error::{Error, Result},
    order::ByteOrder,
    reader::BinaryReader,
    relocation::RelocationKind,
    writer::BinaryWriter,
};

/// A half-open byte range `[start, end)` in the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: u64,
    pub end: u64,
}

impl Span {
    #[must_use]
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    #[must_use]
    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Positions recorded while writing the body, handed to `finish_write`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BodyLayout {
    /// Start of the data body (the base offset).
    pub base_offset: u64,
    /// The string table, including its trailing padding.
    pub string_table: Span,
    /// The relocation table, including its trailing padding.
    pub final_table: Span,
}

/// Read, prepare-write and finish-write contract shared by all dialects.
pub trait Header: Sized {
    /// Parse the header at the current position.
    ///
    /// On success the reader's byte order and base offset describe the body.
    fn read<R: Read + Seek>(reader: &mut BinaryReader<R>) -> Result<Self>;

    /// Emit the placeholder block and set the writer's base offset.
    fn prepare_write<W: Write + Seek>(&self, writer: &mut BinaryWriter<W>) -> Result<()>;

    /// Record the final layout, write any trailer and emit the real header.
    ///
    /// The stream is left at the end of the file.
    fn finish_write<W: Write + Seek>(
        &mut self,
        writer: &mut BinaryWriter<W>,
        layout: &BodyLayout,
    ) -> Result<()>;

    /// Byte order of the header fields and body.
    fn byte_order(&self) -> ByteOrder;

    /// Encoding of the relocation table.
    fn relocation_kind(&self) -> RelocationKind;

    /// Base offset of the body, valid after `read` or `prepare_write`.
    fn base_offset(&self) -> u64;

    /// Absolute span of the relocation table, valid after `read`.
    fn final_table(&self) -> Span;

    /// Total file size as recorded in the header.
    fn file_size(&self) -> u32;
}

/// Parse a 2 or 3 digit ASCII version such as `b"210"`.
pub(crate) fn parse_version(raw: &[u8]) -> Result<u16> {
    let digits: &[u8] = match raw.iter().position(|&b| b == 0 || b == b' ') {
        Some(end) => &raw[..end],
        None => raw,
    };
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return Err(Error::invalid_format(
            "header version",
            format!("\"{}\" is not a number", raw.escape_ascii()),
        ));
    }
    Ok(digits
        .iter()
        .fold(0u16, |acc, &d| acc * 10 + u16::from(d - b'0')))
}

/// Render a version as three ASCII digits.
pub(crate) fn version_digits(version: u16) -> Result<[u8; 3]> {
    if version > 999 {
        return Err(Error::invalid_format(
            "header version",
            format!("{version} does not fit in three digits"),
        ));
    }
    Ok([
        b'0' + (version / 100) as u8,
        b'0' + (version / 10 % 10) as u8,
        b'0' + (version % 10) as u8,
    ])
}

/// Byte order from an endian flag, falling back to `fallback` with a warning.
pub(crate) fn order_from_flag(flag: u8, fallback: ByteOrder) -> ByteOrder {
    ByteOrder::from_flag(flag).unwrap_or_else(|| {
        tracing::warn!(
            flag = %char::from(flag).escape_default(),
            ?fallback,
            "unknown endian flag"
        );
        fallback
    })
}

/// Narrow a stream position or length to a 32-bit header field.
pub(crate) fn to_u32(value: u64, field: &'static str) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| Error::invalid_format("header", format!("{field} {value:#x} exceeds 32 bits")))
}

pub(crate) fn warn_if_nonzero(field: &'static str, value: u64) {
    if value != 0 {
        tracing::warn!(field, value, "reserved header field is not zero");
    }
}

/// Any supported header, selected by inspecting the first bytes.
#[derive(Debug, Clone, PartialEq)]
pub enum AnyHeader {
    BinaV1(BinaV1Header),
    BinaV2(BinaV2Header),
    Pacx(PacxHeader),
    Gens(GensHeader),
    Mirage(MirageHeader),
}

/// Header dialect names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    BinaV1,
    BinaV2,
    Pacx,
    Gens,
    Mirage,
}

impl Dialect {
    /// Guess the dialect from up to the first 0x20 bytes of a file.
    #[must_use]
    pub fn detect(prefix: &[u8]) -> Self {
        let word = |at: usize| {
            prefix
                .get(at..at + 4)
                .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
        };
        if prefix.starts_with(bina_v2::SIGNATURE) {
            Self::BinaV2
        } else if prefix.starts_with(pacx::SIGNATURE) {
            Self::Pacx
        } else if prefix.get(0x1C..0x20) == Some(bina_v1::SIGNATURE) {
            Self::BinaV1
        } else if word(0).is_some_and(|w| w & mirage::FLAG_ROOT != 0)
            && word(4) == Some(mirage::SIGNATURE)
        {
            Self::Mirage
        } else {
            Self::Gens
        }
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::BinaV1 => "BINA v1",
            Self::BinaV2 => "BINA v2",
            Self::Pacx => "PACx",
            Self::Gens => "Gens",
            Self::Mirage => "Mirage",
        }
    }
}

impl AnyHeader {
    #[must_use]
    pub fn dialect(&self) -> Dialect {
        match self {
            Self::BinaV1(_) => Dialect::BinaV1,
            Self::BinaV2(_) => Dialect::BinaV2,
            Self::Pacx(_) => Dialect::Pacx,
            Self::Gens(_) => Dialect::Gens,
            Self::Mirage(_) => Dialect::Mirage,
        }
    }

    /// Version number, for dialects that carry one.
    #[must_use]
    pub fn version(&self) -> Option<u16> {
        match self {
            Self::BinaV1(h) => Some(h.version),
            Self::BinaV2(h) => Some(h.version),
            Self::Pacx(h) => Some(h.version),
            Self::Gens(_) | Self::Mirage(_) => None,
        }
    }
}

macro_rules! delegate {
    ($self:expr, $h:ident => $body:expr) => {
        match $self {
            AnyHeader::BinaV1($h) => $body,
            AnyHeader::BinaV2($h) => $body,
            AnyHeader::Pacx($h) => $body,
            AnyHeader::Gens($h) => $body,
            AnyHeader::Mirage($h) => $body,
        }
    };
}

impl Header for AnyHeader {
    fn read<R: Read + Seek>(reader: &mut BinaryReader<R>) -> Result<Self> {
        let start = reader.position()?;
        let available = reader.stream_len()?.saturating_sub(start).min(0x20);
        let prefix = reader.read_bytes(available as usize)?;
        reader.jump_to(start)?;

        Ok(match Dialect::detect(&prefix) {
            Dialect::BinaV1 => Self::BinaV1(BinaV1Header::read(reader)?),
            Dialect::BinaV2 => Self::BinaV2(BinaV2Header::read(reader)?),
            Dialect::Pacx => Self::Pacx(PacxHeader::read(reader)?),
            Dialect::Gens => Self::Gens(GensHeader::read(reader)?),
            Dialect::Mirage => Self::Mirage(MirageHeader::read(reader)?),
        })
    }

    fn prepare_write<W: Write + Seek>(&self, writer: &mut BinaryWriter<W>) -> Result<()> {
        delegate!(self, h => h.prepare_write(writer))
    }

    fn finish_write<W: Write + Seek>(
        &mut self,
        writer: &mut BinaryWriter<W>,
        layout: &BodyLayout,
    ) -> Result<()> {
        delegate!(self, h => h.finish_write(writer, layout))
    }

    fn byte_order(&self) -> ByteOrder {
        delegate!(self, h => h.byte_order())
    }

    fn relocation_kind(&self) -> RelocationKind {
        delegate!(self, h => h.relocation_kind())
    }

    fn base_offset(&self) -> u64 {
        delegate!(self, h => h.base_offset())
    }

    fn final_table(&self) -> Span {
        delegate!(self, h => h.final_table())
    }

    fn file_size(&self) -> u32 {
        delegate!(self, h => h.file_size())
    }
}
