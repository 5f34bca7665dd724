//! Byte order selection and fixed-width primitive encoding.

use glam::{Quat, Vec2, Vec3, Vec4};

/// Byte order of the numeric fields in a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ByteOrder {
    #[default]
    Little,
    Big,
}

impl ByteOrder {
    /// Map a header endian flag (`'B'` or `'L'`) to a byte order.
    #[must_use]
    pub fn from_flag(flag: u8) -> Option<Self> {
        match flag {
            b'B' => Some(Self::Big),
            b'L' => Some(Self::Little),
            _ => None,
        }
    }

    /// The endian flag character written into headers.
    #[must_use]
    pub fn flag(self) -> u8 {
        match self {
            Self::Big => b'B',
            Self::Little => b'L',
        }
    }
}

/// A value with a fixed-size wire representation.
///
/// Implemented for the integer and float primitives and for the `glam`
/// vector types, which are stored as consecutive `f32` components.
pub trait Primitive: Sized + Copy {
    /// Encoded size in bytes.
    const SIZE: usize;

    /// Decode from exactly `SIZE` bytes.
    fn decode(bytes: &[u8], order: ByteOrder) -> Self;

    /// Append the encoded bytes to `out`.
    fn encode(self, order: ByteOrder, out: &mut Vec<u8>);
}

macro_rules! impl_primitive {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Primitive for $ty {
                const SIZE: usize = std::mem::size_of::<$ty>();

                fn decode(bytes: &[u8], order: ByteOrder) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$ty>()];
                    raw.copy_from_slice(&bytes[..Self::SIZE]);
                    match order {
                        ByteOrder::Little => <$ty>::from_le_bytes(raw),
                        ByteOrder::Big => <$ty>::from_be_bytes(raw),
                    }
                }

                fn encode(self, order: ByteOrder, out: &mut Vec<u8>) {
                    match order {
                        ByteOrder::Little => out.extend_from_slice(&self.to_le_bytes()),
                        ByteOrder::Big => out.extend_from_slice(&self.to_be_bytes()),
                    }
                }
            }
        )*
    };
}

impl_primitive!(u8, i8, u16, i16, u32, i32, u64, i64, f32, f64);

macro_rules! impl_vector {
    ($($ty:ty => $n:literal),* $(,)?) => {
        $(
            impl Primitive for $ty {
                const SIZE: usize = $n * 4;

                fn decode(bytes: &[u8], order: ByteOrder) -> Self {
                    let mut components = [0.0f32; $n];
                    for (i, c) in components.iter_mut().enumerate() {
                        *c = f32::decode(&bytes[i * 4..], order);
                    }
                    <$ty>::from_array(components)
                }

                fn encode(self, order: ByteOrder, out: &mut Vec<u8>) {
                    for c in self.to_array() {
                        c.encode(order, out);
                    }
                }
            }
        )*
    };
}

impl_vector!(Vec2 => 2, Vec3 => 3, Vec4 => 4, Quat => 4);
