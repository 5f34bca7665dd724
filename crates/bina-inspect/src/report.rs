//! Per-file inspection results.

use std::{fmt, path::Path};

use bina::{AnyHeader, ByteOrder, Header, Relocation, Value};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct RelocationReport {
    pub slot: u64,
    pub target: u64,
}

#[derive(Debug, Serialize)]
pub struct Report {
    pub path: String,
    pub dialect: &'static str,
    pub version: Option<u16>,
    pub byte_order: &'static str,
    pub file_size: u32,
    pub base_offset: u64,
    pub final_table_start: u64,
    pub final_table_length: u64,
    pub relocations: Vec<RelocationReport>,
    /// Decoded record fields, rendered as text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<Vec<String>>,
}

impl Report {
    pub fn new(
        path: &Path,
        header: &AnyHeader,
        relocations: &[Relocation],
        record: Option<Vec<Value>>,
    ) -> Self {
        let table = header.final_table();
        Self {
            path: path.display().to_string(),
            dialect: header.dialect().name(),
            version: header.version(),
            byte_order: match header.byte_order() {
                ByteOrder::Little => "little",
                ByteOrder::Big => "big",
            },
            file_size: header.file_size(),
            base_offset: header.base_offset(),
            final_table_start: table.start,
            final_table_length: table.len(),
            relocations: relocations
                .iter()
                .map(|r| RelocationReport {
                    slot: r.slot,
                    target: r.target,
                })
                .collect(),
            record: record.map(|values| values.iter().map(ToString::to_string).collect()),
        }
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.path)?;
        match self.version {
            Some(version) => writeln!(f, "  dialect      {} (version {version})", self.dialect)?,
            None => writeln!(f, "  dialect      {}", self.dialect)?,
        }
        writeln!(f, "  byte order   {}", self.byte_order)?;
        writeln!(f, "  file size    {:#x}", self.file_size)?;
        writeln!(f, "  base offset  {:#x}", self.base_offset)?;
        writeln!(
            f,
            "  final table  {:#x} (+{:#x})",
            self.final_table_start, self.final_table_length
        )?;
        writeln!(f, "  relocations  {}", self.relocations.len())?;
        for r in &self.relocations {
            writeln!(f, "    {:#010x} -> {:#010x}", r.slot, r.target)?;
        }
        if let Some(record) = &self.record {
            writeln!(f, "  record")?;
            for (i, value) in record.iter().enumerate() {
                writeln!(f, "    [{i}] {value}")?;
            }
        }
        Ok(())
    }
}
