//! Mirage node-tree header. Always big-endian.
//!
//! A 0x10 byte root record is followed by a depth-first tree of nodes:
//!
//! ```text
//! root:  u32 file size | ROOT    u32 signature    u32 final table offset    u32 final table length
//! node:  u32 size | flags        u32 value        [u8; 8] name
//! ```
//!
//! The top three bits of each size carry flags. A node marked as a leaf is
//! followed by its payload; any other node is followed by its children, the
//! last of which is marked as the last child. The final node in depth-first
//! order is the body: its payload is the data written after
//! `prepare_write`, and its start is the base offset.

use std::io::{Read, Seek, Write};

use super::{BodyLayout, Header, Span, to_u32};
use crate::{
    error::{Error, Result},
    order::ByteOrder,
    reader::BinaryReader,
    relocation::RelocationKind,
    writer::BinaryWriter,
};

pub(super) const SIGNATURE: u32 = 0x0133_054A;
pub(super) const FLAG_ROOT: u32 = 0x8000_0000;
const FLAG_LAST_CHILD: u32 = 0x4000_0000;
const FLAG_LEAF: u32 = 0x2000_0000;
const SIZE_MASK: u32 = 0x1FFF_FFFF;
const ROOT_LEN: u64 = 0x10;
const NODE_LEN: u64 = 0x10;
const NAME_LEN: usize = 8;
/// Deepest node nesting accepted when reading or writing a tree.
const MAX_DEPTH: usize = 64;

/// A named node in the Mirage tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirageNode {
    /// Up to eight single-byte characters.
    pub name: String,
    pub value: u32,
    pub children: Vec<MirageNode>,
    /// Payload of a leaf. Unused for the body node.
    pub payload: Vec<u8>,
}

impl MirageNode {
    #[must_use]
    pub fn new(name: impl Into<String>, value: u32) -> Self {
        Self {
            name: name.into(),
            value,
            children: Vec::new(),
            payload: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_child(mut self, child: MirageNode) -> Self {
        self.children.push(child);
        self
    }

    #[must_use]
    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }

    #[must_use]
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirageHeader {
    pub file_size: u32,
    /// Relocation table position, relative to the root record.
    pub final_table_offset: u32,
    pub final_table_length: u32,
    /// Top-level nodes; the last node in depth-first order holds the body.
    pub nodes: Vec<MirageNode>,
    start: u64,
    base: u64,
}

impl Default for MirageHeader {
    fn default() -> Self {
        Self {
            file_size: 0,
            final_table_offset: 0,
            final_table_length: 0,
            nodes: vec![MirageNode::new("Contexts", 0)],
            start: 0,
            base: ROOT_LEN + NODE_LEN,
        }
    }
}

impl MirageHeader {
    /// A header for writing with the given node tree.
    #[must_use]
    pub fn new(nodes: Vec<MirageNode>) -> Self {
        Self {
            nodes,
            ..Self::default()
        }
    }

    /// The node whose payload is the body.
    #[must_use]
    pub fn body_node(&self) -> Option<&MirageNode> {
        let mut node = self.nodes.last()?;
        while let Some(child) = node.children.last() {
            node = child;
        }
        Some(node)
    }
}

/// Reject trees nested deeper than [`MAX_DEPTH`] without recursing.
fn check_depth(nodes: &[MirageNode]) -> Result<()> {
    let mut stack: Vec<(&MirageNode, usize)> = nodes.iter().map(|node| (node, 1)).collect();
    while let Some((node, depth)) = stack.pop() {
        if depth > MAX_DEPTH {
            return Err(too_deep(&node.name));
        }
        stack.extend(node.children.iter().map(|child| (child, depth + 1)));
    }
    Ok(())
}

fn too_deep(name: &str) -> Error {
    Error::invalid_format(
        "Mirage node",
        format!("node \"{name}\" is nested deeper than {MAX_DEPTH} levels"),
    )
}

fn node_size(size: u64, flags: u32) -> Result<u32> {
    let size = to_u32(size, "Mirage node size")?;
    if size > SIZE_MASK {
        return Err(Error::invalid_format(
            "Mirage node",
            format!("size {size:#x} overflows the flag bits"),
        ));
    }
    Ok(size | flags)
}

fn write_placeholders<W: Write + Seek>(
    nodes: &[MirageNode],
    writer: &mut BinaryWriter<W>,
    on_body_path: bool,
) -> Result<()> {
    for (i, node) in nodes.iter().enumerate() {
        let is_body_path = on_body_path && i + 1 == nodes.len();
        writer.write_nulls(NODE_LEN as usize)?;
        if !node.is_leaf() {
            write_placeholders(&node.children, writer, is_body_path)?;
        } else if !is_body_path {
            writer.write_bytes(&node.payload)?;
        }
    }
    Ok(())
}

/// Bytes emitted by `write_placeholders` for the same nodes.
fn placeholder_len(nodes: &[MirageNode], on_body_path: bool) -> u64 {
    let mut total = 0;
    for (i, node) in nodes.iter().enumerate() {
        let is_body_path = on_body_path && i + 1 == nodes.len();
        total += NODE_LEN;
        if !node.is_leaf() {
            total += placeholder_len(&node.children, is_body_path);
        } else if !is_body_path {
            total += node.payload.len() as u64;
        }
    }
    total
}

/// Fill in node records over the placeholders, returning their total size.
fn write_nodes<W: Write + Seek>(
    nodes: &[MirageNode],
    writer: &mut BinaryWriter<W>,
    on_body_path: bool,
    body_len: u64,
) -> Result<u64> {
    let mut total = 0;
    for (i, node) in nodes.iter().enumerate() {
        let is_last = i + 1 == nodes.len();
        let is_body_path = on_body_path && is_last;
        let start = writer.position()?;
        writer.jump_to(start + NODE_LEN)?;

        let content = if !node.is_leaf() {
            write_nodes(&node.children, writer, is_body_path, body_len)?
        } else if is_body_path {
            body_len
        } else {
            node.payload.len() as u64
        };
        let size = NODE_LEN + content;
        let end = start + size;

        let mut flags = 0;
        if is_last {
            flags |= FLAG_LAST_CHILD;
        }
        if node.is_leaf() {
            flags |= FLAG_LEAF;
        }
        writer.jump_to(start)?;
        writer.write(node_size(size, flags)?)?;
        writer.write(node.value)?;
        writer.write_fixed_string(&node.name, NAME_LEN)?;
        writer.jump_to(end)?;
        total += size;
    }
    Ok(total)
}

/// Parse sibling nodes until one is marked as the last child.
///
/// Leaf payload spans are collected in depth-first order.
fn read_nodes<R: Read + Seek>(
    reader: &mut BinaryReader<R>,
    limit: u64,
    depth: usize,
    leaves: &mut Vec<Span>,
) -> Result<Vec<MirageNode>> {
    let mut nodes = Vec::new();
    loop {
        let start = reader.position()?;
        if start + NODE_LEN > limit {
            tracing::warn!(start, limit, "Mirage node run ended without a last child");
            break;
        }
        let size_flags: u32 = reader.read()?;
        let value = reader.read()?;
        let name = reader.read_fixed_string(NAME_LEN)?;
        let size = u64::from(size_flags & SIZE_MASK);
        if size < NODE_LEN || start + size > limit {
            return Err(Error::invalid_format(
                "Mirage node",
                format!("node \"{name}\" at {start:#x} has invalid size {size:#x}"),
            ));
        }

        if depth > MAX_DEPTH {
            return Err(too_deep(&name));
        }

        let mut node = MirageNode::new(name, value);
        if size_flags & FLAG_LEAF != 0 {
            leaves.push(Span::new(start + NODE_LEN, start + size));
        } else {
            node.children = read_nodes(reader, start + size, depth + 1, leaves)?;
        }
        reader.jump_to(start + size)?;
        nodes.push(node);

        if size_flags & FLAG_LAST_CHILD != 0 {
            break;
        }
    }
    Ok(nodes)
}

/// Load leaf payloads in depth-first order, skipping the body.
fn load_payloads<R: Read + Seek>(
    nodes: &mut [MirageNode],
    reader: &mut BinaryReader<R>,
    leaves: &mut std::slice::Iter<'_, Span>,
    body: Span,
) -> Result<()> {
    for node in nodes {
        if !node.is_leaf() {
            load_payloads(&mut node.children, reader, leaves, body)?;
            continue;
        }
        let Some(&span) = leaves.next() else {
            break;
        };
        if span != body {
            reader.jump_to(span.start)?;
            node.payload = reader.read_bytes(span.len() as usize)?;
        }
    }
    Ok(())
}

impl Header for MirageHeader {
    fn read<R: Read + Seek>(reader: &mut BinaryReader<R>) -> Result<Self> {
        let start = reader.position()?;
        reader.set_byte_order(ByteOrder::Big);

        let size_flags: u32 = reader.read()?;
        let signature: u32 = reader.read()?;
        if signature != SIGNATURE {
            return Err(Error::invalid_signature(
                &SIGNATURE.to_be_bytes(),
                &signature.to_be_bytes(),
            ));
        }
        if size_flags & FLAG_ROOT == 0 {
            tracing::warn!(size_flags, "Mirage root flag is not set");
        }
        let file_size = size_flags & SIZE_MASK;
        let final_table_offset: u32 = reader.read()?;
        let final_table_length = reader.read()?;

        let limit = start + u64::from(final_table_offset);
        if limit + u64::from(final_table_length) > reader.stream_len()? {
            return Err(Error::UnexpectedEndOfData {
                context: "Mirage node tree",
            });
        }
        let mut leaves = Vec::new();
        let mut nodes = read_nodes(reader, limit, 1, &mut leaves)?;
        let body = *leaves.last().ok_or_else(|| {
            Error::invalid_format("Mirage header", "node tree has no leaf to hold the body")
        })?;
        load_payloads(&mut nodes, reader, &mut leaves.iter(), body)?;
        reader.jump_to(body.start)?;
        reader.set_base_offset(body.start);

        let header = Self {
            file_size,
            final_table_offset,
            final_table_length,
            nodes,
            start,
            base: body.start,
        };
        tracing::debug!(
            file_size,
            final_table_offset,
            nodes = header.nodes.len(),
            "read Mirage header"
        );
        Ok(header)
    }

    fn prepare_write<W: Write + Seek>(&self, writer: &mut BinaryWriter<W>) -> Result<()> {
        if self.nodes.is_empty() {
            return Err(Error::invalid_format(
                "Mirage header",
                "at least one node is required",
            ));
        }
        check_depth(&self.nodes)?;
        writer.set_byte_order(ByteOrder::Big);
        writer.write_nulls(ROOT_LEN as usize)?;
        write_placeholders(&self.nodes, writer, true)?;
        let base = writer.position()?;
        writer.set_base_offset(base);
        Ok(())
    }

    fn finish_write<W: Write + Seek>(
        &mut self,
        writer: &mut BinaryWriter<W>,
        layout: &BodyLayout,
    ) -> Result<()> {
        check_depth(&self.nodes)?;
        let end = writer.position()?;
        let mismatch = || {
            Error::invalid_format(
                "Mirage header",
                "body layout does not match the prepared node tree",
            )
        };
        let body_len = layout
            .final_table
            .start
            .checked_sub(layout.base_offset)
            .ok_or_else(mismatch)?;
        let start = layout
            .base_offset
            .checked_sub(ROOT_LEN + placeholder_len(&self.nodes, true))
            .ok_or_else(mismatch)?;

        self.start = start;
        self.base = layout.base_offset;
        self.file_size = node_size(end - start, 0)?;
        self.final_table_offset = to_u32(layout.final_table.start - start, "final table offset")?;
        self.final_table_length = to_u32(layout.final_table.len(), "final table length")?;

        writer.with_byte_order(ByteOrder::Big, |w| {
            w.jump_to(start + ROOT_LEN)?;
            write_nodes(&self.nodes, w, true, body_len)?;
            w.jump_to(start)?;
            w.write(self.file_size | FLAG_ROOT)?;
            w.write(SIGNATURE)?;
            w.write(self.final_table_offset)?;
            w.write(self.final_table_length)
        })?;
        writer.jump_to(end)
    }

    fn byte_order(&self) -> ByteOrder {
        ByteOrder::Big
    }

    fn relocation_kind(&self) -> RelocationKind {
        RelocationKind::Fixed
    }

    fn base_offset(&self) -> u64 {
        self.base
    }

    fn final_table(&self) -> Span {
        let table = self.start + u64::from(self.final_table_offset);
        Span::new(table, table + u64::from(self.final_table_length))
    }

    fn file_size(&self) -> u32 {
        self.file_size
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn sample_tree() -> Vec<MirageNode> {
        vec![
            MirageNode::new("Model", 5)
                .with_child(MirageNode::new("Info", 1).with_payload(vec![1, 2, 3, 4]))
                .with_child(MirageNode::new("Contexts", 2)),
        ]
    }

    fn written(header: &mut MirageHeader, body: &[u8]) -> Vec<u8> {
        let mut writer = BinaryWriter::new(Cursor::new(Vec::new()), ByteOrder::Little);
        header.prepare_write(&mut writer).unwrap();
        let base = writer.base_offset();
        writer.write_bytes(body).unwrap();
        let table_start = writer.position().unwrap();
        writer.write_bytes(&[0, 0, 0, 0]).unwrap();
        let layout = BodyLayout {
            base_offset: base,
            string_table: Span::new(table_start, table_start),
            final_table: Span::new(table_start, table_start + 4),
        };
        header.finish_write(&mut writer, &layout).unwrap();
        writer.into_inner().into_inner()
    }

    #[test]
    fn test_tree_layout() {
        let mut header = MirageHeader::new(sample_tree());
        let bytes = written(&mut header, &[0xAA; 8]);

        // Root, Model, Info (+4 payload), Contexts, 8 body bytes, 4 table bytes.
        assert_eq!(bytes.len(), 0x10 + 0x10 + 0x14 + 0x10 + 8 + 4);
        assert_eq!(&bytes[0..4], &(0x8000_0000u32 | 0x50).to_be_bytes());
        assert_eq!(&bytes[4..8], &SIGNATURE.to_be_bytes());
        assert_eq!(&bytes[8..12], &0x4Cu32.to_be_bytes());
        assert_eq!(&bytes[12..16], &4u32.to_be_bytes());

        // Model: last child, not a leaf, size = 0x10 + 0x14 + 0x18.
        assert_eq!(&bytes[0x10..0x14], &(0x4000_0000u32 | 0x3C).to_be_bytes());
        assert_eq!(&bytes[0x18..0x20], b"Model\0\0\0");
        // Info: leaf, not last.
        assert_eq!(&bytes[0x20..0x24], &(0x2000_0000u32 | 0x14).to_be_bytes());
        assert_eq!(&bytes[0x30..0x34], &[1, 2, 3, 4]);
        // Contexts: leaf and last child, spans the body.
        assert_eq!(&bytes[0x34..0x38], &(0x6000_0000u32 | 0x18).to_be_bytes());
        assert_eq!(&bytes[0x3C..0x44], b"Contexts");
        assert_eq!(header.base_offset(), 0x44);
    }

    #[test]
    fn test_read_back_tree() {
        let mut header = MirageHeader::new(sample_tree());
        let bytes = written(&mut header, &[0xAA; 8]);

        let mut reader = BinaryReader::new(Cursor::new(bytes), ByteOrder::Little);
        let read = MirageHeader::read(&mut reader).unwrap();
        assert_eq!(read, header);
        assert_eq!(reader.base_offset(), 0x44);
        assert_eq!(reader.position().unwrap(), 0x44);
        assert_eq!(read.body_node().unwrap().name, "Contexts");
        assert_eq!(read.final_table(), Span::new(0x4C, 0x50));
    }

    #[test]
    fn test_signature_mismatch() {
        let mut bytes = vec![0u8; 0x20];
        bytes[0..4].copy_from_slice(&0x8000_0020u32.to_be_bytes());
        let mut reader = BinaryReader::new(Cursor::new(bytes), ByteOrder::Big);
        assert!(matches!(
            MirageHeader::read(&mut reader),
            Err(Error::InvalidSignature { .. })
        ));
    }

    #[test]
    fn test_empty_tree_rejected() {
        let header = MirageHeader::new(Vec::new());
        let mut writer = BinaryWriter::new(Cursor::new(Vec::new()), ByteOrder::Big);
        assert!(header.prepare_write(&mut writer).is_err());
    }

    /// A chain of `depth` non-leaf nodes ending in one leaf.
    fn nested_chain(depth: usize) -> MirageNode {
        let mut node = MirageNode::new("Leaf", 0);
        for _ in 0..depth {
            node = MirageNode::new("Nest", 0).with_child(node);
        }
        node
    }

    #[test]
    fn test_deep_tree_rejected_on_write() {
        let header = MirageHeader::new(vec![nested_chain(MAX_DEPTH)]);
        let mut writer = BinaryWriter::new(Cursor::new(Vec::new()), ByteOrder::Big);
        assert!(matches!(
            header.prepare_write(&mut writer),
            Err(Error::InvalidFormat { .. })
        ));

        let mut header = MirageHeader::new(vec![nested_chain(MAX_DEPTH - 1)]);
        written(&mut header, &[]);
    }

    #[test]
    fn test_deep_tree_rejected_on_read() {
        // 100 nested non-leaf nodes, each the last child of its parent.
        let depth = 100u32;
        let tree_len = depth * 0x10;
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&(0x8000_0000 | (0x10 + tree_len)).to_be_bytes());
        bytes.extend_from_slice(&SIGNATURE.to_be_bytes());
        bytes.extend_from_slice(&(0x10 + tree_len).to_be_bytes());
        bytes.extend_from_slice(&0u32.to_be_bytes());
        for level in 0..depth {
            let size = tree_len - level * 0x10;
            bytes.extend_from_slice(&(0x4000_0000 | size).to_be_bytes());
            bytes.extend_from_slice(&0u32.to_be_bytes());
            bytes.extend_from_slice(b"Nest\0\0\0\0");
        }

        let mut reader = BinaryReader::new(Cursor::new(bytes), ByteOrder::Big);
        assert!(matches!(
            MirageHeader::read(&mut reader),
            Err(Error::InvalidFormat { .. })
        ));
    }

    #[test]
    fn test_table_past_end_of_stream() {
        let mut header = MirageHeader::new(sample_tree());
        let mut bytes = written(&mut header, &[0xAA; 8]);
        bytes[12..16].copy_from_slice(&0x1000u32.to_be_bytes());
        let mut reader = BinaryReader::new(Cursor::new(bytes), ByteOrder::Big);
        assert!(matches!(
            MirageHeader::read(&mut reader),
            Err(Error::UnexpectedEndOfData { .. })
        ));
    }

    #[test]
    fn test_mismatched_layout_is_an_error() {
        let mut header = MirageHeader::new(sample_tree());
        let mut writer = BinaryWriter::new(Cursor::new(Vec::new()), ByteOrder::Big);
        let layout = BodyLayout {
            base_offset: 0x08,
            string_table: Span::new(0x04, 0x04),
            final_table: Span::new(0x04, 0x08),
        };
        assert!(matches!(
            header.finish_write(&mut writer, &layout),
            Err(Error::InvalidFormat { .. })
        ));
    }
}
