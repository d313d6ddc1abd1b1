use config::IndexConfig;
use std::cmp::Ordering;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::marker::PhantomData;
use std::path::Path;
use std::sync::Mutex;

use crate::error::{BTreeError, Result};
use crate::format::{min_node_size, node_fixed_size, Header, IndexKey, Position, Trailer, HEADER_BYTES};
use crate::node::{BTreeItem, BTreeNode};

/// Zero-copy view over a complete index held in memory.
///
/// `data` must be the whole index as written by [`crate::BTreeBuilder`]:
/// header, nodes, trailer. The header and trailer are validated once on
/// construction; nodes are parsed as lookups visit them. Lookups check
/// node bounds but not key ordering; run [`verify`](BTreeSlice::verify) once
/// on untrusted input.
///
/// Lookups only read `data`, so one view can serve any number of threads.
#[derive(Debug, Clone)]
pub struct BTreeSlice<'a, K, P> {
    data: &'a [u8],
    header: Header,
    trailer: Trailer<P>,
    nodes_end: usize,
    _key: PhantomData<K>,
}

impl<'a, K: IndexKey, P: Position> BTreeSlice<'a, K, P> {
    /// Opens `data` with the default [`IndexConfig`].
    pub fn new(data: &'a [u8]) -> Result<Self> {
        Self::with_config(data, &IndexConfig::default())
    }

    pub fn with_config(data: &'a [u8], config: &IndexConfig) -> Result<Self> {
        let trailer_len = Trailer::<P>::ENCODED_LEN;
        if data.len() < HEADER_BYTES + trailer_len {
            return Err(BTreeError::Format(format!(
                "index of {} bytes cannot hold a header and trailer",
                data.len()
            )));
        }

        let header = Header::read_from(&mut &data[..HEADER_BYTES])?;
        header.validate::<K, P>(config.check_key_type)?;

        let nodes_end = data.len() - trailer_len;
        let trailer = Trailer::<P>::read_from(&mut &data[nodes_end..])?;
        check_trailer::<K, P>(&trailer, (nodes_end - HEADER_BYTES) as u64, config)?;

        Ok(Self {
            data,
            header,
            trailer,
            nodes_end,
            _key: PhantomData,
        })
    }

    /// Position of the greatest indexed key `<= key`. For a key below every
    /// indexed key this is the position of the first key.
    pub fn lookup(&self, key: &K) -> Result<P> {
        self.lookup_by(|stored| stored.cmp(key))
    }

    /// Like [`lookup`](BTreeSlice::lookup) with a comparator that orders a
    /// stored key against the query.
    pub fn lookup_by<F>(&self, mut cmp: F) -> Result<P>
    where
        F: FnMut(&K) -> Ordering,
    {
        descend(&self.trailer, self.nodes_end as u64, |at| {
            Ok(self.parse_node(at)?.lookup_by(&mut cmp))
        })
    }

    /// The node stored at `pos`, with its key ordering checked.
    pub fn node_at(&self, pos: P) -> Result<BTreeNode<'a, K, P>> {
        let at = node_offset(pos, self.nodes_end as u64)?;
        let node = self.parse_node(at)?;
        node.validate()?;
        Ok(node)
    }

    /// Walks every node front to back, checking bounds and key ordering.
    /// Returns the number of nodes.
    pub fn verify(&self) -> Result<u64> {
        let mut at = HEADER_BYTES;
        let mut count = 0;
        while at < self.nodes_end {
            let node = self.parse_node(at as u64)?;
            node.validate()?;
            at += node.encoded_len();
            count += 1;
        }
        Ok(count)
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn trailer(&self) -> &Trailer<P> {
        &self.trailer
    }

    pub fn height(&self) -> u32 {
        self.trailer.tree_height
    }

    fn parse_node(&self, at: u64) -> Result<BTreeNode<'a, K, P>> {
        let start = at as usize;
        let end = self
            .nodes_end
            .min(start.saturating_add(self.trailer.max_node_size as usize));
        let data: &'a [u8] = self.data;
        BTreeNode::parse(&data[start..end])
    }
}

/// Index reader over a seekable source, one node read per tree level.
///
/// The source sits behind a `Mutex` so lookups work through `&self` and a
/// reader can be shared between threads. Each lookup holds the lock for
/// its whole descent.
pub struct BTreeReader<K, P, R = BufReader<File>> {
    source: Mutex<Source<R>>,
    header: Header,
    trailer: Trailer<P>,
    nodes_end: u64,
    _key: PhantomData<K>,
}

struct Source<R> {
    rdr: R,
    buf: Vec<u8>,
}

impl<K: IndexKey, P: Position> BTreeReader<K, P> {
    /// Opens an index file with the default [`IndexConfig`].
    pub fn open<Q: AsRef<Path>>(path: Q) -> Result<Self> {
        Self::open_with_config(path, &IndexConfig::default())
    }

    pub fn open_with_config<Q: AsRef<Path>>(path: Q, config: &IndexConfig) -> Result<Self> {
        let f = File::open(path)?;
        Self::from_reader(BufReader::new(f), config)
    }
}

impl<K: IndexKey, P: Position, R: Read + Seek> BTreeReader<K, P, R> {
    /// Validates the header and trailer of the index in `rdr`.
    ///
    /// # Errors
    ///
    /// [`BTreeError::Format`] if the source is too short, the header does
    /// not match `K` and `P`, or the trailer is inconsistent with the file.
    pub fn from_reader(mut rdr: R, config: &IndexConfig) -> Result<Self> {
        let len = rdr.seek(SeekFrom::End(0))?;
        let trailer_len = Trailer::<P>::ENCODED_LEN as u64;
        if len < HEADER_BYTES as u64 + trailer_len {
            return Err(BTreeError::Format(format!(
                "index of {len} bytes cannot hold a header and trailer"
            )));
        }

        rdr.seek(SeekFrom::Start(0))?;
        let header = Header::read_from(&mut rdr)?;
        header.validate::<K, P>(config.check_key_type)?;

        let nodes_end = len - trailer_len;
        rdr.seek(SeekFrom::Start(nodes_end))?;
        let trailer = Trailer::<P>::read_from(&mut rdr)?;
        check_trailer::<K, P>(&trailer, nodes_end - HEADER_BYTES as u64, config)?;

        Ok(Self {
            source: Mutex::new(Source {
                rdr,
                buf: Vec::with_capacity(trailer.max_node_size as usize),
            }),
            header,
            trailer,
            nodes_end,
            _key: PhantomData,
        })
    }

    /// Position of the greatest indexed key `<= key`. For a key below every
    /// indexed key this is the position of the first key.
    pub fn lookup(&self, key: &K) -> Result<P> {
        self.lookup_by(|stored| stored.cmp(key))
    }

    pub fn lookup_by<F>(&self, mut cmp: F) -> Result<P>
    where
        F: FnMut(&K) -> Ordering,
    {
        let mut guard = self.lock()?;
        let src = &mut *guard;
        let max_node_size = self.trailer.max_node_size;
        descend(&self.trailer, self.nodes_end, |at| {
            src.load(at, self.nodes_end, max_node_size)?;
            Ok(BTreeNode::<K, P>::parse(&src.buf)?.lookup_by(&mut cmp))
        })
    }

    /// Copies of the items of the node at `pos`, plus its first position.
    pub fn node_items(&self, pos: P) -> Result<(P, Vec<BTreeItem<K, P>>)> {
        let at = node_offset(pos, self.nodes_end)?;
        let mut guard = self.lock()?;
        guard.load(at, self.nodes_end, self.trailer.max_node_size)?;
        let node = BTreeNode::<K, P>::parse_validated(&guard.buf)?;
        Ok((node.first_pos(), node.items().collect()))
    }

    /// Reads every node front to back, checking bounds and key ordering.
    /// Returns the number of nodes.
    pub fn verify(&self) -> Result<u64> {
        let mut guard = self.lock()?;
        let mut at = HEADER_BYTES as u64;
        let mut count = 0;
        while at < self.nodes_end {
            guard.load(at, self.nodes_end, self.trailer.max_node_size)?;
            let node = BTreeNode::<K, P>::parse_validated(&guard.buf)?;
            at += node.encoded_len() as u64;
            count += 1;
        }
        Ok(count)
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn trailer(&self) -> &Trailer<P> {
        &self.trailer
    }

    pub fn height(&self) -> u32 {
        self.trailer.tree_height
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Source<R>>> {
        self.source
            .lock()
            .map_err(|e| BTreeError::Io(io::Error::new(io::ErrorKind::Other, format!("lock poisoned: {e}"))))
    }
}

impl<R: Read + Seek> Source<R> {
    /// Reads up to `max_node_size` bytes at `at` into `buf`, stopping at
    /// `nodes_end`.
    fn load(&mut self, at: u64, nodes_end: u64, max_node_size: u32) -> Result<()> {
        let want = (nodes_end - at).min(u64::from(max_node_size));
        self.rdr.seek(SeekFrom::Start(at))?;
        self.buf.clear();
        (&mut self.rdr).take(want).read_to_end(&mut self.buf)?;
        if (self.buf.len() as u64) < want {
            return Err(BTreeError::Format(format!(
                "node at {at} truncated: {} of {want} bytes",
                self.buf.len()
            )));
        }
        Ok(())
    }
}

/// Walks from the root down `tree_height` levels. `step` loads the node at
/// a byte offset and returns the position to follow.
fn descend<P, F>(trailer: &Trailer<P>, nodes_end: u64, mut step: F) -> Result<P>
where
    P: Position,
    F: FnMut(u64) -> Result<P>,
{
    let mut pos = trailer.root_pos;
    for _ in 0..trailer.tree_height {
        let at = node_offset(pos, nodes_end)?;
        pos = step(at)?;
    }
    Ok(pos)
}

/// Byte offset of a node position, checked against the node region.
fn node_offset<P: Position>(pos: P, nodes_end: u64) -> Result<u64> {
    match pos.to_u64() {
        Some(at) if at >= HEADER_BYTES as u64 && at < nodes_end => Ok(at),
        _ => Err(BTreeError::Format(format!(
            "node position {pos:?} outside the node region"
        ))),
    }
}

fn check_trailer<K: IndexKey, P: Position>(
    trailer: &Trailer<P>,
    nodes_len: u64,
    config: &IndexConfig,
) -> Result<()> {
    let min = min_node_size::<K, P>();
    if (trailer.max_node_size as usize) < min {
        return Err(BTreeError::Format(format!(
            "max node size {} below the minimum of {min}",
            trailer.max_node_size
        )));
    }
    if trailer.max_node_size > config.max_read_node_size {
        return Err(BTreeError::Format(format!(
            "max node size {} exceeds the read limit {}",
            trailer.max_node_size, config.max_read_node_size
        )));
    }
    // Each level costs at least one node.
    let needed = u64::from(trailer.tree_height) * node_fixed_size::<P>() as u64;
    if needed > nodes_len {
        return Err(BTreeError::Format(format!(
            "tree height {} does not fit in {nodes_len} bytes of nodes",
            trailer.tree_height
        )));
    }
    Ok(())
}
