//! Read and write BINA-family binary containers.
//!
//! Hedgehog Engine data files wrap their payload in a small container: a
//! header, a body whose internal pointers are stored as offsets from a base
//! position, a deduplicated string table, and a relocation table listing
//! every offset slot so a loader can rebase them.
//!
//! # Design principles
//!
//! - **Synchronous**: every operation is a blocking call on a seekable stream
//! - **Two-phase headers**: a placeholder is written first and filled in once
//!   the body, strings and relocations are known
//! - **One instance per file**: writers own their pending offsets and string
//!   table and are used to completion, then dropped
//!
//! # Example
//!
//! ```
//! use std::io::Cursor;
//!
//! use bina::{BinaV2Header, Container, ContainerWriter};
//!
//! let mut container = ContainerWriter::new(Cursor::new(Vec::new()), BinaV2Header::default())?;
//! let writer = container.writer();
//! writer.add_string("name", "Sonic")?;
//! writer.write(1.5f32)?;
//! let (stream, _) = container.finish()?;
//!
//! let mut opened = Container::<_, BinaV2Header>::open(Cursor::new(stream.into_inner()))?;
//! assert_eq!(opened.reader().get_string()?, "Sonic");
//! assert_eq!(opened.reader().read::<f32>()?, 1.5);
//! # Ok::<(), bina::Error>(())
//! ```

mod container;
mod error;
pub mod field;
pub mod header;
mod order;
mod reader;
pub mod relocation;
mod strings;
mod writer;

pub use container::{Container, ContainerWriter, Relocation};
pub use error::{Error, Result};
pub use field::{FieldType, Value, parse_layout};
pub use header::{
    AnyHeader, BinaV1Header, BinaV2Header, BodyLayout, Dialect, GensHeader, Header, MirageHeader,
    MirageNode, PacType, PacxHeader, Span,
};
pub use order::{ByteOrder, Primitive};
pub use reader::BinaryReader;
pub use relocation::{RelocationCodec, RelocationKind};
pub use strings::{StringEntry, StringTable};
pub use writer::{BinaryWriter, OffsetWidth, PatchOptions};
