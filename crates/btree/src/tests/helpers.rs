use std::io::{self, Write};

use crate::format::{node_header_size, item_size};
use crate::{BTreeBuilder, IndexKey, Position, Result};

/// `max_node_size` that fits exactly `n` items of `K`/`P`.
pub fn node_size_for<K: IndexKey, P: Position>(n: usize) -> u32 {
    (node_header_size::<P>() + n * item_size::<K, P>()) as u32
}

/// Bulk-loads `pairs` into memory and returns `(height, bytes)`.
pub fn build<K, P>(pairs: &[(K, P)], max_node_size: u32, min_separation: u64) -> Result<(u32, Vec<u8>)>
where
    K: IndexKey,
    P: Position,
{
    let mut builder = BTreeBuilder::<K, P, _>::new(Vec::new(), max_node_size, min_separation)?;
    for (key, pos) in pairs {
        builder.add_key(key.clone(), *pos)?;
    }
    builder.finish()
}

/// Accepts at most `limit` bytes per `write` call.
pub struct ShortSink {
    pub limit: usize,
    pub data: Vec<u8>,
}

impl Write for ShortSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = buf.len().min(self.limit);
        self.data.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Fails every `write` after the first `writes_left`.
pub struct FailingSink {
    pub writes_left: usize,
    pub data: Vec<u8>,
}

impl Write for FailingSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.writes_left == 0 {
            return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
        }
        self.writes_left -= 1;
        self.data.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
