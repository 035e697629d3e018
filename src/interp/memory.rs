//! Byte-addressed device memory for the reference evaluator.

use bytemuck::Pod;

use super::encoding::{from_bits, to_bits};
use super::value::Cell;
use super::ExecError;
use crate::types::Dtype;

/// First valid address. Address 0 stays unmapped so null pointers fault.
pub const BASE_ADDRESS: u64 = 0x1000;

const ALIGN: u64 = 64;

/// A flat little-endian heap. Allocations are bump-allocated and never
/// freed.
#[derive(Clone, Debug, Default)]
pub struct Memory {
    bytes: Vec<u8>,
}

impl Memory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve `size` zeroed bytes and return their address.
    pub fn alloc(&mut self, size: u64) -> u64 {
        let start = (self.bytes.len() as u64).div_ceil(ALIGN) * ALIGN;
        self.bytes.resize((start + size) as usize, 0);
        BASE_ADDRESS + start
    }

    /// Allocate and initialize a buffer from a slice of plain values.
    pub fn alloc_slice<T: Pod>(&mut self, data: &[T]) -> u64 {
        let raw: &[u8] = bytemuck::cast_slice(data);
        let addr = self.alloc(raw.len() as u64);
        let start = (addr - BASE_ADDRESS) as usize;
        self.bytes[start..start + raw.len()].copy_from_slice(raw);
        addr
    }

    /// Read `len` plain values starting at `addr`.
    pub fn read_slice<T: Pod>(&self, addr: u64, len: usize) -> Result<Vec<T>, ExecError> {
        let size = std::mem::size_of::<T>();
        let raw = self.range(addr, (len * size) as u64)?;
        Ok(raw
            .chunks_exact(size)
            .map(bytemuck::pod_read_unaligned::<T>)
            .collect())
    }

    fn range(&self, addr: u64, size: u64) -> Result<&[u8], ExecError> {
        let (start, end) = self.bounds(addr, size)?;
        Ok(&self.bytes[start..end])
    }

    fn bounds(&self, addr: u64, size: u64) -> Result<(usize, usize), ExecError> {
        let in_range = addr >= BASE_ADDRESS
            && addr
                .checked_add(size)
                .is_some_and(|end| end - BASE_ADDRESS <= self.bytes.len() as u64);
        if !in_range {
            return Err(ExecError::new(format!(
                "out-of-bounds access of {} bytes at {:#x}",
                size, addr
            )));
        }
        let start = (addr - BASE_ADDRESS) as usize;
        Ok((start, start + size as usize))
    }

    /// Load one element of `dtype`.
    pub fn read(&self, addr: u64, dtype: &Dtype) -> Result<Cell, ExecError> {
        let size = dtype.byte_size();
        let raw = self.range(addr, size)?;
        let mut buf = [0u8; 8];
        buf[..raw.len()].copy_from_slice(raw);
        Ok(from_bits(dtype, u64::from_le_bytes(buf)))
    }

    /// Store one element of `dtype`.
    pub fn write(&mut self, addr: u64, dtype: &Dtype, cell: Cell) -> Result<(), ExecError> {
        let size = dtype.byte_size();
        let (start, end) = self.bounds(addr, size)?;
        let bits = to_bits(dtype, &cell).to_le_bytes();
        self.bytes[start..end].copy_from_slice(&bits[..size as usize]);
        Ok(())
    }

    /// Bytes allocated so far.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}
