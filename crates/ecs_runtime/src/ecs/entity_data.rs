//! Entity data trait and stream helpers
//!
//! Entity data are plain records attached to at most one entity. Persisted
//! data use the engine's little-endian memory stream layout.

use super::entity::EntityHandle;
use super::error::EcsError;
use crate::foundation::math::Mat4;
use std::any::Any;
use std::io::{Read, Write};

/// Dynamic-typing helper implemented for every `'static` type
pub trait AsAny: Any {
    /// Upcast to `&dyn Any`
    fn as_any(&self) -> &dyn Any;

    /// Upcast to `&mut dyn Any`
    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// Rust name of the concrete type
    fn type_name(&self) -> &'static str;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

/// A component-data record owned by one entity
///
/// Only [`type_name`](AsAny::type_name) is mandatory; persistence and the
/// owner back-reference are opt-in.
pub trait EntityData: AsAny {
    /// Called when the data is attached to `owner`
    fn set_owner(&mut self, _owner: EntityHandle) {}

    /// Entity the data was attached to, when the type keeps the back-reference
    fn owner(&self) -> Option<EntityHandle> {
        None
    }

    /// Whether [`serialize`](Self::serialize) writes anything
    fn is_serializable(&self) -> bool {
        false
    }

    /// Write the persisted record
    fn serialize(&self, _stream: &mut dyn Write) -> Result<(), EcsError> {
        Err(EcsError::SerializationUnsupported(std::any::type_name::<Self>()))
    }

    /// Read the persisted record written by `version` of the format
    fn deserialize(&mut self, _stream: &mut dyn Read, _version: u32) -> Result<(), EcsError> {
        Err(EcsError::SerializationUnsupported(std::any::type_name::<Self>()))
    }
}

/// Little-endian stream writers
pub mod stream {
    use super::*;

    /// Write an `i32`
    pub fn write_i32(stream: &mut dyn Write, value: i32) -> Result<(), EcsError> {
        stream.write_all(&value.to_le_bytes())?;
        Ok(())
    }

    /// Read an `i32`
    pub fn read_i32(stream: &mut dyn Read) -> Result<i32, EcsError> {
        let mut bytes = [0u8; 4];
        stream.read_exact(&mut bytes)?;
        Ok(i32::from_le_bytes(bytes))
    }

    /// Write a string as `len + 1`, the bytes, then a NUL terminator
    pub fn write_string(stream: &mut dyn Write, value: &str) -> Result<(), EcsError> {
        let size = i32::try_from(value.len() + 1)
            .map_err(|_| EcsError::InvalidString(format!("{} bytes is too long", value.len())))?;
        write_i32(stream, size)?;
        stream.write_all(value.as_bytes())?;
        stream.write_all(&[0])?;
        Ok(())
    }

    /// Read a string written by [`write_string`]
    pub fn read_string(stream: &mut dyn Read) -> Result<String, EcsError> {
        let size = read_i32(stream)?;
        let size = usize::try_from(size)
            .map_err(|_| EcsError::InvalidString(format!("negative length {size}")))?;
        if size == 0 {
            return Ok(String::new());
        }

        let mut bytes = Vec::new();
        let read = stream.take(size as u64).read_to_end(&mut bytes)?;
        if read != size {
            return Err(EcsError::InvalidString(format!("expected {size} bytes, stream ended after {read}")));
        }
        if bytes.last() == Some(&0) {
            bytes.pop();
        }
        String::from_utf8(bytes).map_err(|e| EcsError::InvalidString(e.to_string()))
    }

    /// Write 16 raw `f32` values, column-major (translation at 12..15)
    pub fn write_matrix(stream: &mut dyn Write, matrix: &Mat4) -> Result<(), EcsError> {
        let mut bytes = [0u8; 64];
        for (chunk, value) in bytes.chunks_exact_mut(4).zip(matrix.iter()) {
            chunk.copy_from_slice(&value.to_le_bytes());
        }
        stream.write_all(&bytes)?;
        Ok(())
    }

    /// Read a matrix written by [`write_matrix`]
    pub fn read_matrix(stream: &mut dyn Read) -> Result<Mat4, EcsError> {
        let mut bytes = [0u8; 64];
        stream.read_exact(&mut bytes)?;
        let raw: [u32; 16] = bytemuck::pod_read_unaligned(&bytes);
        let values = raw.map(|bits| f32::from_bits(u32::from_le(bits)));
        Ok(Mat4::from_column_slice(&values))
    }
}

#[cfg(test)]
mod tests {
    use super::stream::*;
    use super::*;
    use std::io::Cursor;

    #[derive(Default)]
    struct Plain;
    impl EntityData for Plain {}

    #[test]
    fn test_default_capabilities() {
        let data = Plain;
        assert!(!data.is_serializable());
        assert!(data.owner().is_none());
        assert!(data.type_name().ends_with("Plain"));
        let mut out = Vec::new();
        assert!(matches!(
            data.serialize(&mut out),
            Err(EcsError::SerializationUnsupported(_))
        ));
    }

    #[test]
    fn test_string_layout_matches_memory_stream() {
        let mut out = Vec::new();
        write_string(&mut out, "Bone").unwrap();
        assert_eq!(out, vec![5, 0, 0, 0, b'B', b'o', b'n', b'e', 0]);

        let read = read_string(&mut Cursor::new(out)).unwrap();
        assert_eq!(read, "Bone");
    }

    #[test]
    fn test_plain_data_cannot_be_loaded() {
        let mut data = Plain;
        let err = data.deserialize(&mut Cursor::new(vec![1u8, 2, 3]), 1).unwrap_err();
        match err {
            EcsError::SerializationUnsupported(name) => assert!(name.ends_with("Plain")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_truncated_stream_is_an_error() {
        let mut cursor = Cursor::new(vec![9u8, 0, 0, 0, b'a']);
        assert!(matches!(read_string(&mut cursor), Err(EcsError::InvalidString(_))));
    }

    #[test]
    fn test_huge_length_prefix_fails_without_allocating_it() {
        let mut out = i32::MAX.to_le_bytes().to_vec();
        out.extend_from_slice(b"abc");
        assert!(matches!(
            read_string(&mut Cursor::new(out)),
            Err(EcsError::InvalidString(_))
        ));
    }

    #[test]
    fn test_matrix_translation_lands_in_elements_12_to_14() {
        let m = crate::foundation::math::translation(1.0, 2.0, 3.0);
        let mut out = Vec::new();
        write_matrix(&mut out, &m).unwrap();
        assert_eq!(out.len(), 64);
        assert_eq!(&out[48..52], &1.0f32.to_le_bytes());
        assert_eq!(&out[52..56], &2.0f32.to_le_bytes());
        assert_eq!(&out[56..60], &3.0f32.to_le_bytes());
    }
}
