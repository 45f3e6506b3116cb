//! The backing stream contract (spec §6) and two concrete implementations
//! (spec §4.M): an in-memory stream for tests and a growable memory-mapped
//! file stream for real use, grounded in the teacher's `extensible_mmap.rs`.

use std::cmp::max;
use std::fs::File;
use std::io;

use memmap::{MmapMut, MmapOptions};

/// Random-access, byte-addressed backing medium. Every call is offset
/// addressed; there is no seek cursor because the tree never does
/// sequential streaming I/O.
pub trait Stream {
    fn read_at(&self, off: u64, buf: &mut [u8]) -> io::Result<()>;
    fn write_at(&mut self, off: u64, buf: &[u8]) -> io::Result<()>;
    fn len(&self) -> u64;
    fn set_len(&mut self, n: u64) -> io::Result<()>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// `Vec<u8>`-backed stream. Growth is infallible, so this is what every unit
/// test in this crate uses.
#[derive(Debug, Default)]
pub struct MemStream {
    data: Vec<u8>,
}

impl MemStream {
    pub fn new() -> Self {
        MemStream { data: Vec::new() }
    }

    pub fn from_vec(data: Vec<u8>) -> Self {
        MemStream { data }
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }
}

impl Stream for MemStream {
    fn read_at(&self, off: u64, buf: &mut [u8]) -> io::Result<()> {
        let start = off as usize;
        let end = start + buf.len();
        if end > self.data.len() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "read past end of stream",
            ));
        }
        buf.copy_from_slice(&self.data[start..end]);
        Ok(())
    }

    fn write_at(&mut self, off: u64, buf: &[u8]) -> io::Result<()> {
        let start = off as usize;
        let end = start + buf.len();
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
        self.data[start..end].copy_from_slice(buf);
        Ok(())
    }

    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    fn set_len(&mut self, n: u64) -> io::Result<()> {
        self.data.resize(n as usize, 0);
        Ok(())
    }
}

/// Growable memory-mapped file stream. Doubles capacity the way
/// `ExtensibleMmapMut` did, capped at `growth_ceiling` bytes per step once
/// the stream is already large, instead of the teacher's hardcoded 1 GiB --
/// ART images are expected to start far smaller than the bulk integer dumps
/// that file was built for.
pub struct MmapStream {
    backing: File,
    ram: MmapMut,
    growth_ceiling: u64,
    len: u64,
}

impl MmapStream {
    const DEFAULT_GROWTH_CEILING: u64 = 64 * 1024 * 1024;

    pub fn open(backing: File) -> io::Result<Self> {
        Self::with_growth_ceiling(backing, Self::DEFAULT_GROWTH_CEILING)
    }

    pub fn with_growth_ceiling(backing: File, growth_ceiling: u64) -> io::Result<Self> {
        let metadata = backing.metadata()?;
        let len = metadata.len();
        let mapped = max(len, 1);
        backing.set_len(mapped)?;
        let ram = unsafe { MmapOptions::new().map_mut(&backing)? };
        Ok(MmapStream {
            backing,
            ram,
            growth_ceiling,
            len,
        })
    }

    fn ensure_capacity(&mut self, needed: u64) -> io::Result<()> {
        let cur = self.ram.len() as u64;
        if cur >= needed {
            return Ok(());
        }
        let doubled = if cur > self.growth_ceiling {
            cur + self.growth_ceiling
        } else {
            cur.saturating_mul(2).max(1)
        };
        let new_size = max(needed, doubled);
        self.backing.set_len(new_size)?;
        self.ram.flush_async()?;
        let mut new_ram = unsafe { MmapOptions::new().map_mut(&self.backing)? };
        std::mem::swap(&mut self.ram, &mut new_ram);
        Ok(())
    }
}

impl Stream for MmapStream {
    fn read_at(&self, off: u64, buf: &mut [u8]) -> io::Result<()> {
        let start = off as usize;
        let end = start + buf.len();
        if off + buf.len() as u64 > self.len {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "read past end of stream",
            ));
        }
        buf.copy_from_slice(&self.ram[start..end]);
        Ok(())
    }

    fn write_at(&mut self, off: u64, buf: &[u8]) -> io::Result<()> {
        let end = off + buf.len() as u64;
        self.ensure_capacity(end)?;
        let start = off as usize;
        self.ram[start..end as usize].copy_from_slice(buf);
        if end > self.len {
            self.len = end;
        }
        Ok(())
    }

    fn len(&self) -> u64 {
        self.len
    }

    fn set_len(&mut self, n: u64) -> io::Result<()> {
        if n > self.ram.len() as u64 {
            self.ensure_capacity(n)?;
        } else if n < self.ram.len() as u64 {
            self.ram.flush_async()?;
            self.backing.set_len(n.max(1))?;
            let mut new_ram = unsafe { MmapOptions::new().map_mut(&self.backing)? };
            std::mem::swap(&mut self.ram, &mut new_ram);
        }
        self.len = n;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mem_stream_grows_on_write() {
        let mut s = MemStream::new();
        s.write_at(10, &[1, 2, 3]).unwrap();
        assert_eq!(s.len(), 13);
        let mut buf = [0u8; 3];
        s.read_at(10, &mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3]);
    }

    #[test]
    fn mmap_stream_roundtrips_through_a_real_file() {
        let file = tempfile::tempfile().unwrap();
        let mut s = MmapStream::open(file).unwrap();
        s.write_at(0, b"hello").unwrap();
        s.write_at(1_000_000, b"world").unwrap();
        assert_eq!(s.len(), 1_000_005);
        let mut buf = [0u8; 5];
        s.read_at(1_000_000, &mut buf).unwrap();
        assert_eq!(&buf, b"world");
        s.set_len(5).unwrap();
        assert_eq!(s.len(), 5);
    }
}
