//! Byte stream over the scattered segments of one lane.
//!
//! Reads and writes walk the physical file in runs of owned bytes,
//! skipping every range the [`ReservedAddressSpace`] reports as used.
//! With length tracking enabled the first eight virtual bytes hold the
//! stream length as a big-endian `u64`; positions reported to callers
//! exclude those bytes.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};

use crate::ReservedAddressSpace;

const LENGTH_SIZE: u64 = 8;

#[derive(Debug)]
pub struct NonContiguousFile<S: ReservedAddressSpace> {
    file: File,
    space: S,
    track_length: bool,
    /// Caller-visible position
    pos: u64,
    /// Tracked length, caller-visible coordinates
    len: u64,
    len_dirty: bool,
}

impl<S: ReservedAddressSpace> NonContiguousFile<S> {
    /// Wrap `file`, which must be open for reading and writing.
    pub fn new(file: File, space: S, track_length: bool) -> io::Result<Self> {
        let mut stream = Self {
            file,
            space,
            track_length,
            pos: 0,
            len: 0,
            len_dirty: false,
        };
        if track_length {
            let mut header = [0u8; LENGTH_SIZE as usize];
            // a lane never written reads back as zeros
            stream.transfer(0, Transfer::Read(&mut header))?;
            stream.len = u64::from_be_bytes(header);
        }
        Ok(stream)
    }

    pub fn space(&self) -> &S {
        &self.space
    }

    /// Stream length: the tracked length, or what the physical file backs.
    pub fn len(&self) -> io::Result<u64> {
        if self.track_length {
            Ok(self.len)
        } else {
            self.space.last_virtual_addr()
        }
    }

    pub fn is_empty(&self) -> io::Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Persist the tracked length (if changed) and sync file data.
    pub fn close(mut self) -> io::Result<()> {
        self.flush()?;
        self.file.sync_data()
    }

    fn header_len(&self) -> u64 {
        if self.track_length {
            LENGTH_SIZE
        } else {
            0
        }
    }

    fn write_length(&mut self) -> io::Result<()> {
        if !self.len_dirty {
            return Ok(());
        }
        let header = self.len.to_be_bytes();
        self.transfer(0, Transfer::Write(&header))?;
        self.len_dirty = false;
        Ok(())
    }

    /// Move bytes between `buf` and the virtual range starting at
    /// `virtual_addr` (internal coordinates, header included). Returns the
    /// number of bytes moved; reads stop early at end of file.
    fn transfer(&mut self, virtual_addr: u64, mut buf: Transfer<'_>) -> io::Result<usize> {
        let total = buf.len();
        let mut done = 0usize;
        let mut current = self.space.xlate(virtual_addr);

        while done < total {
            if self.space.is_used(current) {
                current = self.space.next_unused(current);
            }
            let end = self.space.next_unused(current);
            let run = (end - current + 1).min((total - done) as u64) as usize;

            self.file.seek(SeekFrom::Start(current))?;
            let moved = match &mut buf {
                Transfer::Read(b) => self.file.read(&mut b[done..done + run])?,
                Transfer::Write(b) => {
                    self.file.write_all(&b[done..done + run])?;
                    run
                }
            };
            if moved == 0 {
                break;
            }
            current += moved as u64;
            done += moved;
        }
        Ok(done)
    }
}

enum Transfer<'a> {
    Read(&'a mut [u8]),
    Write(&'a [u8]),
}

impl Transfer<'_> {
    fn len(&self) -> usize {
        match self {
            Transfer::Read(b) => b.len(),
            Transfer::Write(b) => b.len(),
        }
    }
}

impl<S: ReservedAddressSpace> Read for NonContiguousFile<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut want = buf.len();
        if self.track_length {
            want = want.min(self.len.saturating_sub(self.pos) as usize);
        }
        if want == 0 {
            return Ok(0);
        }
        let start = self.pos + self.header_len();
        let n = self.transfer(start, Transfer::Read(&mut buf[..want]))?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl<S: ReservedAddressSpace> Write for NonContiguousFile<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let start = self.pos + self.header_len();
        let n = self.transfer(start, Transfer::Write(buf))?;
        self.pos += n as u64;
        if self.track_length && self.pos > self.len {
            self.len = self.pos;
            self.len_dirty = true;
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.write_length()?;
        self.file.flush()
    }
}

impl<S: ReservedAddressSpace> Seek for NonContiguousFile<S> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::Current(off) => self.pos.checked_add_signed(off),
            SeekFrom::End(off) => self.len()?.checked_add_signed(off),
        };
        match target {
            Some(n) => {
                self.pos = n;
                Ok(n)
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek to a negative or overflowing position",
            )),
        }
    }
}

impl<S: ReservedAddressSpace> Drop for NonContiguousFile<S> {
    fn drop(&mut self) {
        // Errors here have nowhere to go; close() reports them.
        let _ = self.write_length();
    }
}
