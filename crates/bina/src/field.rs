//! Record layouts described by field type names.
//!
//! Concrete formats use [`BinaryReader::read`] and [`BinaryWriter::write`]
//! directly. This module covers layouts only known at run time, such as a
//! record description typed on a command line.

use std::{
    fmt,
    io::{Read, Seek, Write},
    str::FromStr,
};

use glam::{Quat, Vec2, Vec3, Vec4};

use crate::{
    error::{Error, Result},
    reader::BinaryReader,
    writer::BinaryWriter,
};

/// A field type with a defined wire representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    U64,
    I64,
    F32,
    F64,
    Vec2,
    Vec3,
    Vec4,
    Quat,
    /// Offset slot pointing at a null-terminated string.
    String,
    /// Raw offset slot, relative to the base offset.
    Offset,
}

impl FromStr for FieldType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "u8" | "byte" => Self::U8,
            "i8" | "sbyte" => Self::I8,
            "u16" | "ushort" => Self::U16,
            "i16" | "short" => Self::I16,
            "u32" | "uint" => Self::U32,
            "i32" | "int" => Self::I32,
            "u64" | "ulong" => Self::U64,
            "i64" | "long" => Self::I64,
            "f32" | "float" => Self::F32,
            "f64" | "double" => Self::F64,
            "vec2" => Self::Vec2,
            "vec3" => Self::Vec3,
            "vec4" => Self::Vec4,
            "quat" => Self::Quat,
            "string" | "str" => Self::String,
            "offset" | "ptr" => Self::Offset,
            _ => {
                return Err(Error::UnsupportedType {
                    type_name: s.to_owned(),
                });
            }
        })
    }
}

/// Parse a comma-separated list such as `"u32,f32,string"`.
pub fn parse_layout(layout: &str) -> Result<Vec<FieldType>> {
    layout
        .split(',')
        .filter(|s| !s.trim().is_empty())
        .map(str::parse)
        .collect()
}

/// A decoded field value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    U8(u8),
    I8(i8),
    U16(u16),
    I16(i16),
    U32(u32),
    I32(i32),
    U64(u64),
    I64(i64),
    F32(f32),
    F64(f64),
    Vec2(Vec2),
    Vec3(Vec3),
    Vec4(Vec4),
    Quat(Quat),
    String(String),
    Offset(u64),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::U8(v) => write!(f, "{v}"),
            Self::I8(v) => write!(f, "{v}"),
            Self::U16(v) => write!(f, "{v}"),
            Self::I16(v) => write!(f, "{v}"),
            Self::U32(v) => write!(f, "{v}"),
            Self::I32(v) => write!(f, "{v}"),
            Self::U64(v) => write!(f, "{v}"),
            Self::I64(v) => write!(f, "{v}"),
            Self::F32(v) => write!(f, "{v}"),
            Self::F64(v) => write!(f, "{v}"),
            Self::Vec2(v) => write!(f, "{v}"),
            Self::Vec3(v) => write!(f, "{v}"),
            Self::Vec4(v) => write!(f, "{v}"),
            Self::Quat(v) => write!(f, "{v}"),
            Self::String(v) => write!(f, "{v:?}"),
            Self::Offset(v) => write!(f, "{v:#x}"),
        }
    }
}

impl<R: Read + Seek> BinaryReader<R> {
    /// Read one value of type `ty`. Strings and offsets follow the
    /// configured offset width.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnexpectedEndOfData`] if the stream ends mid-value.
    pub fn read_value(&mut self, ty: FieldType) -> Result<Value> {
        Ok(match ty {
            FieldType::U8 => Value::U8(self.read()?),
            FieldType::I8 => Value::I8(self.read()?),
            FieldType::U16 => Value::U16(self.read()?),
            FieldType::I16 => Value::I16(self.read()?),
            FieldType::U32 => Value::U32(self.read()?),
            FieldType::I32 => Value::I32(self.read()?),
            FieldType::U64 => Value::U64(self.read()?),
            FieldType::I64 => Value::I64(self.read()?),
            FieldType::F32 => Value::F32(self.read()?),
            FieldType::F64 => Value::F64(self.read()?),
            FieldType::Vec2 => Value::Vec2(self.read()?),
            FieldType::Vec3 => Value::Vec3(self.read()?),
            FieldType::Vec4 => Value::Vec4(self.read()?),
            FieldType::Quat => Value::Quat(self.read()?),
            FieldType::String => Value::String(self.get_string()?),
            FieldType::Offset => Value::Offset(self.read_offset()?),
        })
    }

    /// Read one value per entry of `layout`, in order.
    pub fn read_record(&mut self, layout: &[FieldType]) -> Result<Vec<Value>> {
        layout.iter().map(|&ty| self.read_value(ty)).collect()
    }
}

impl<W: Write + Seek> BinaryWriter<W> {
    /// Write one value. Strings go through the string table under `name`.
    ///
    /// # Errors
    ///
    /// Fails if `name` is already pending or a string is not Latin-1.
    pub fn write_value(&mut self, name: &str, value: &Value) -> Result<()> {
        match value {
            Value::U8(v) => self.write(*v),
            Value::I8(v) => self.write(*v),
            Value::U16(v) => self.write(*v),
            Value::I16(v) => self.write(*v),
            Value::U32(v) => self.write(*v),
            Value::I32(v) => self.write(*v),
            Value::U64(v) => self.write(*v),
            Value::I64(v) => self.write(*v),
            Value::F32(v) => self.write(*v),
            Value::F64(v) => self.write(*v),
            Value::Vec2(v) => self.write(*v),
            Value::Vec3(v) => self.write(*v),
            Value::Vec4(v) => self.write(*v),
            Value::Quat(v) => self.write(*v),
            Value::String(v) => self.add_string(name, v),
            Value::Offset(v) => match self.offset_width() {
                crate::writer::OffsetWidth::U32 => {
                    let v = u32::try_from(*v).map_err(|_| {
                        Error::invalid_format("offset", format!("{v:#x} exceeds 32 bits"))
                    })?;
                    self.write(v)
                }
                crate::writer::OffsetWidth::U64 => self.write(*v),
            },
        }
    }

    /// Write a record; string fields are named `{prefix}_{index}`.
    pub fn write_record(&mut self, prefix: &str, values: &[Value]) -> Result<()> {
        for (i, value) in values.iter().enumerate() {
            self.write_value(&format!("{prefix}_{i}"), value)?;
        }
        Ok(())
    }
}
