use std::io::{Read, Write};

use crate::error::SerialiseError;
use crate::id::ResourceId;

type Result<T> = std::result::Result<T, SerialiseError>;

/// Little-endian writers used by every persisted structure in this crate.
pub trait WriteLeExt: Write {
    fn write_u32_le(&mut self, v: u32) -> Result<()> {
        self.write_all(&v.to_le_bytes())?;
        Ok(())
    }

    fn write_u64_le(&mut self, v: u64) -> Result<()> {
        self.write_all(&v.to_le_bytes())?;
        Ok(())
    }

    fn write_resource_id(&mut self, id: ResourceId) -> Result<()> {
        self.write_u64_le(id.raw())
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.write_all(bytes)?;
        Ok(())
    }

    fn write_len_prefixed_bytes_u64(&mut self, bytes: &[u8]) -> Result<()> {
        self.write_u64_le(bytes.len() as u64)?;
        self.write_bytes(bytes)
    }
}

impl<T: Write + ?Sized> WriteLeExt for T {}

pub trait ReadLeExt: Read {
    fn read_u32_le(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    fn read_u64_le(&mut self) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.read_exact(&mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    fn read_resource_id(&mut self) -> Result<ResourceId> {
        Ok(ResourceId::from_raw(self.read_u64_le()?))
    }

    fn read_exact_vec(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        buf.try_reserve_exact(len)
            .map_err(|_| SerialiseError::OutOfMemory { len })?;
        buf.resize(len, 0);
        self.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Read a `u64` length and that many bytes. Lengths above `limit` are rejected before
    /// anything is allocated.
    fn read_len_prefixed_bytes_u64(&mut self, limit: u64) -> Result<Vec<u8>> {
        let len = self.read_u64_le()?;
        if len > limit {
            return Err(SerialiseError::Corrupt("length prefix exceeds remaining input"));
        }
        let len = usize::try_from(len).map_err(|_| SerialiseError::Corrupt("length overflow"))?;
        self.read_exact_vec(len)
    }
}

impl<T: Read + ?Sized> ReadLeExt for T {}
