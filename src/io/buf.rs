use core::fmt;

/// Index of a buffer in the pool. Stable for the life of the cache.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BufId(pub usize);

/// Per-buffer metadata. The data page and the lock wait slot live beside
/// the head, indexed by the same [`BufId`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BufferHead {
    /// Device the buffer is bound to; 0 when unbound.
    pub dev: u32,
    pub block: u32,
    /// The page holds changes the device has not seen.
    pub dirty: bool,
    /// The page holds the block's contents.
    pub uptodate: bool,
    /// A transfer is in flight.
    pub locked: bool,
    /// Holders currently using the buffer. Reusable only at zero.
    pub pin_count: u32,
    pub(crate) hashed: bool,
    pub(crate) ring_prev: BufId,
    pub(crate) ring_next: BufId,
    pub(crate) hash_prev: Option<BufId>,
    pub(crate) hash_next: Option<BufId>,
}
impl BufferHead {
    pub(crate) const fn new(id: BufId) -> BufferHead {
        BufferHead {
            dev: 0,
            block: 0,
            dirty: false,
            uptodate: false,
            locked: false,
            pin_count: 0,
            hashed: false,
            ring_prev: id,
            ring_next: id,
            hash_prev: None,
            hash_next: None,
        }
    }
    pub fn is_bound(&self) -> bool {
        self.dev != 0
    }
    pub fn holds(&self, dev: u32, block: u32) -> bool {
        self.dev == dev && self.block == block
    }
    /// Forget the identity and the contents.
    pub(crate) fn unbind(&mut self) {
        self.dev = 0;
        self.block = 0;
        self.dirty = false;
        self.uptodate = false;
    }
}

/// A pinned buffer, as handed out by the cache.
///
/// The handle is only meaningful until it is given back with
/// `BufferCache::release`; the cache refuses handles whose identity no
/// longer matches the buffer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Buf {
    pub(crate) id: BufId,
    pub(crate) dev: u32,
    pub(crate) block: u32,
}
impl Buf {
    pub fn id(&self) -> BufId {
        self.id
    }
    pub fn dev(&self) -> u32 {
        self.dev
    }
    pub fn block(&self) -> u32 {
        self.block
    }
}
impl fmt::Display for Buf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "buf {} ({}:{})", self.id.0, self.dev, self.block)
    }
}
