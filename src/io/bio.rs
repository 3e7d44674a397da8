//! Buffer cache.
//!
//! The buffer cache is a fixed pool of buffers holding cached copies of
//! disk blocks. Caching disk blocks in memory reduces the number of disk
//! reads and also provides a synchronization point for disk blocks used
//! by multiple tasks.
//!
//! Interface:
//! - To get a buffer for a particular disk block, call `read`.
//! - After changing buffer data, call `write_data` (or `mark_dirty`); the
//!   block reaches the disk on `sync_device`, `sync_all`, or when the
//!   buffer is reused.
//! - When done with the buffer, call `release`.
//! - Do not use the buffer after calling `release`.
//!
//! Several tasks may hold the same buffer at once. Every wait in here can
//! let other tasks run and change the pool, so whatever was checked before
//! a wait is checked again after it.

use super::{
    buf::{Buf, BufId, BufferHead},
    lru::BufLru,
};
use crate::{
    hardware::{Block, BlockDevice, Direction, DiskError},
    param::{BLOCK_SIZE, BUFFER_HEAD_SIZE, NBUF},
    proc::Scheduler,
    sync::{SpinMutex, SpinMutexGuard, WaitSlot},
};
use alloc::{boxed::Box, sync::Arc, vec::Vec};
use core::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};
use log::{debug, info, warn};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BioError {
    /// The block could not be transferred.
    Io { dev: u32, block: u32 },
}
impl fmt::Display for BioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BioError::Io { dev, block } => write!(f, "I/O error on dev {} block {}", dev, block),
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Acquisitions satisfied from the hash chains.
    pub hits: u64,
    /// Acquisitions that claimed a buffer.
    pub misses: u64,
    /// Claims rolled back and started over.
    pub retries: u64,
}

/// How many buffers fit in `bytes` of memory.
pub const fn nbuf_for_memory(bytes: usize) -> usize {
    bytes / (BLOCK_SIZE + BUFFER_HEAD_SIZE)
}

enum Claim {
    Won(Buf),
    /// Another task bound the identity while this one was writing back.
    LostRace,
    /// The old contents could not be written; the buffer keeps them.
    WriteBackFailed,
}

pub struct BufferCache<D: BlockDevice> {
    sched: Arc<Scheduler>,
    disk: D,
    lru: SpinMutex<BufLru>,
    /// Data pages. Only touched while the buffer is not locked, or by the
    /// task that locked it for a transfer.
    pages: Box<[SpinMutex<Block>]>,
    /// Per-buffer slot for tasks waiting for a transfer to finish.
    unlocked: Box<[WaitSlot]>,
    /// Tasks waiting for any buffer to become free.
    buffer_wait: WaitSlot,
    hits: AtomicU64,
    misses: AtomicU64,
    retries: AtomicU64,
}
impl<D: BlockDevice> BufferCache<D> {
    pub fn new(sched: Arc<Scheduler>, disk: D, nbuf: usize) -> BufferCache<D> {
        let lru = BufLru::new(nbuf);
        info!(
            "bio: {} buffers, {} bytes",
            nbuf,
            nbuf * (BLOCK_SIZE + BUFFER_HEAD_SIZE)
        );
        BufferCache {
            sched,
            disk,
            lru: SpinMutex::new(lru),
            pages: (0..nbuf)
                .map(|_| SpinMutex::new([0u8; BLOCK_SIZE]))
                .collect::<Vec<_>>()
                .into_boxed_slice(),
            unlocked: (0..nbuf).map(|_| WaitSlot::new()).collect::<Vec<_>>().into_boxed_slice(),
            buffer_wait: WaitSlot::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            retries: AtomicU64::new(0),
        }
    }

    /// A cache of the default size.
    pub fn with_default_pool(sched: Arc<Scheduler>, disk: D) -> BufferCache<D> {
        BufferCache::new(sched, disk, NBUF)
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }
    pub fn device(&self) -> &D {
        &self.disk
    }
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
        }
    }
    /// A copy of buffer `id`'s metadata.
    pub fn head(&self, id: BufId) -> BufferHead {
        *self.lru().head(id)
    }
    /// Check the hash chains and the ring. Halts on corruption.
    pub fn verify(&self) {
        self.lru().verify();
    }

    fn lru(&self) -> SpinMutexGuard<'_, BufLru> {
        self.lru.lock_masked(self.sched.cpu())
    }

    /// Sleep until no transfer is in flight on `id`.
    fn wait_on_buffer(&self, id: BufId) {
        loop {
            let intr = self.sched.block_interrupts();
            if !self.lru().head(id).locked {
                return;
            }
            self.sched.sleep_on_masked(&self.unlocked[id.0], intr);
        }
    }

    /// Sleep until `id` is unlocked, then lock it.
    fn lock_buffer(&self, id: BufId) -> (u32, u32) {
        loop {
            let intr = self.sched.block_interrupts();
            {
                let mut lru = self.lru();
                let head = lru.head_mut(id);
                if !head.locked {
                    head.locked = true;
                    return (head.dev, head.block);
                }
            }
            self.sched.sleep_on_masked(&self.unlocked[id.0], intr);
        }
    }

    /// Move `id`'s page to or from the disk. The device may sleep; the
    /// buffer stays locked until it returns.
    fn transfer(&self, id: BufId, direction: Direction) -> Result<(), DiskError> {
        let (dev, block) = self.lock_buffer(id);
        let result = {
            let mut page = self.pages[id.0].lock();
            self.disk.transfer(direction, dev, block, &mut page)
        };
        {
            let mut lru = self.lru();
            let head = lru.head_mut(id);
            head.locked = false;
            match (direction, result) {
                (Direction::Read, Ok(())) => head.uptodate = true,
                (Direction::Write, Ok(())) => head.dirty = false,
                (_, Err(_)) => {}
            }
        }
        self.sched.wake_up(&self.unlocked[id.0]);
        result
    }

    fn unpin(&self, id: BufId) {
        {
            let mut lru = self.lru();
            let head = lru.head_mut(id);
            if head.pin_count == 0 {
                panic!("brelse: trying to free free buffer {}", id.0);
            }
            head.pin_count -= 1;
        }
        self.sched.wake_up(&self.buffer_wait);
    }

    /// The handle must still name a pinned buffer.
    fn check(&self, buf: Buf) {
        let head = self.head(buf.id);
        if head.pin_count == 0 || !head.holds(buf.dev, buf.block) {
            panic!("bio: stale handle for {}", buf);
        }
    }

    /// Pin the cached buffer for `(dev, block)`, if there is one. Does not
    /// allocate.
    pub fn lookup(&self, dev: u32, block: u32) -> Option<Buf> {
        loop {
            let id = {
                let mut lru = self.lru();
                let id = lru.find(dev, block)?;
                lru.head_mut(id).pin_count += 1;
                id
            };
            self.wait_on_buffer(id);
            // Claims only take unpinned buffers and re-identify them off the
            // chains, so a buffer pinned here should keep its identity.
            if self.lru().head(id).holds(dev, block) {
                return Some(Buf { id, dev, block });
            }
            debug!("bio: buf {} changed identity under lookup of {}:{}", id.0, dev, block);
            self.unpin(id);
        }
    }

    /// Pin a buffer bound to `(dev, block)`, claiming one if the block is
    /// not cached. Sleeps while every buffer is in use. The contents are
    /// only valid if the buffer is up to date.
    ///
    /// A buffer whose write-back fails keeps its old block and is passed
    /// over for the rest of the call. Once nothing else is left, the oldest
    /// of them is reused and its contents are lost.
    pub fn acquire(&self, dev: u32, block: u32) -> Buf {
        let mut unwritable: Vec<BufId> = Vec::new();
        loop {
            if let Some(buf) = self.lookup(dev, block) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return buf;
            }
            let Some(victim) = self.find_victim(&unwritable) else {
                self.wait_for_free_buffer(dev, block);
                continue;
            };
            let discard = unwritable.contains(&victim);
            match self.claim(victim, dev, block, discard) {
                Claim::Won(buf) => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    debug!("bio: {} claimed", buf);
                    return buf;
                }
                Claim::LostRace => {
                    self.retries.fetch_add(1, Ordering::Relaxed);
                    warn!("bio: lost race for {}:{}, retrying", dev, block);
                }
                Claim::WriteBackFailed => {
                    self.retries.fetch_add(1, Ordering::Relaxed);
                    unwritable.push(victim);
                }
            }
        }
    }

    /// Sleep on `buffer_wait` unless a buffer came free since the scan.
    fn wait_for_free_buffer(&self, dev: u32, block: u32) {
        let intr = self.sched.block_interrupts();
        {
            let lru = self.lru();
            if (0..lru.len()).any(|i| lru.head(BufId(i)).pin_count == 0) {
                return;
            }
        }
        warn!("bio: no free buffers for {}:{}, sleeping", dev, block);
        self.sched.sleep_on_masked(&self.buffer_wait, intr);
    }

    /// The oldest buffer nobody holds, unlocked. Buffers in `avoid` are
    /// only returned when no other buffer is free.
    fn find_victim(&self, avoid: &[BufId]) -> Option<BufId> {
        let order = self.lru().ring_order();
        let mut fallback = None;
        for id in order {
            if self.lru().head(id).pin_count != 0 {
                continue;
            }
            self.wait_on_buffer(id);
            if self.lru().head(id).pin_count != 0 {
                continue;
            }
            if !avoid.contains(&id) {
                return Some(id);
            }
            fallback = fallback.or(Some(id));
        }
        // Waits above may have let another task pin it.
        fallback.filter(|&id| self.lru().head(id).pin_count == 0)
    }

    /// Re-identify `id` as `(dev, block)`, writing back its old contents
    /// first unless `discard` is set.
    fn claim(&self, id: BufId, dev: u32, block: u32, discard: bool) -> Claim {
        let old = {
            let mut lru = self.lru();
            lru.head_mut(id).pin_count += 1;
            lru.hash_remove(id);
            *lru.head(id)
        };

        // Off the chains and pinned: nobody else can reach it while this
        // task sleeps in the write.
        if old.dirty && discard {
            warn!(
                "bio: dropping unwritten {}:{} to make room for {}:{}",
                old.dev, old.block, dev, block
            );
        } else if old.dirty {
            if let Err(err) = self.transfer(id, Direction::Write) {
                warn!(
                    "bio: write-back of {}:{} failed: {}",
                    old.dev, old.block, err
                );
                self.roll_back(id, true);
                return Claim::WriteBackFailed;
            }
        }

        let mut lru = self.lru();
        if lru.find(dev, block).is_some() {
            drop(lru);
            self.roll_back(id, false);
            return Claim::LostRace;
        }
        let head = lru.head_mut(id);
        head.unbind();
        head.dev = dev;
        head.block = block;
        lru.hash_insert(id);
        lru.move_to_tail(id);
        Claim::Won(Buf { id, dev, block })
    }

    /// Give a claimed buffer back to the pool. With `keep`, it stays bound
    /// to its old identity unless that identity was taken meanwhile.
    fn roll_back(&self, id: BufId, keep: bool) {
        {
            let mut lru = self.lru();
            let BufferHead { dev, block, .. } = *lru.head(id);
            if keep && lru.find(dev, block).is_none() {
                lru.hash_insert(id);
            } else {
                if keep {
                    warn!("bio: dropping unwritten {}:{}", dev, block);
                }
                lru.head_mut(id).unbind();
            }
            lru.move_to_tail(id);
        }
        self.unpin(id);
    }

    /// Drop a pin. The handle must not be used afterwards.
    pub fn release(&self, buf: Buf) {
        self.wait_on_buffer(buf.id);
        let head = self.head(buf.id);
        if head.pin_count != 0 && !head.holds(buf.dev, buf.block) {
            panic!("bio: stale handle for {}", buf);
        }
        self.unpin(buf.id);
    }

    /// Pin `(dev, block)` with its contents read in.
    pub fn read(&self, dev: u32, block: u32) -> Result<Buf, BioError> {
        let buf = self.acquire(dev, block);
        if self.head(buf.id).uptodate {
            return Ok(buf);
        }
        if let Err(err) = self.transfer(buf.id, Direction::Read) {
            warn!("bio: read of {}:{} failed: {}", dev, block, err);
        }
        if self.head(buf.id).uptodate {
            return Ok(buf);
        }
        self.release(buf);
        Err(BioError::Io { dev, block })
    }

    /// Run `f` on the buffer's contents.
    pub fn read_data<R>(&self, buf: Buf, f: impl FnOnce(&Block) -> R) -> R {
        self.wait_on_buffer(buf.id);
        self.check(buf);
        let page = self.pages[buf.id.0].lock();
        f(&page)
    }

    /// Run `f` on the buffer's contents and mark them dirty and up to
    /// date. Read the block first when `f` changes only part of it.
    pub fn write_data<R>(&self, buf: Buf, f: impl FnOnce(&mut Block) -> R) -> R {
        self.wait_on_buffer(buf.id);
        self.check(buf);
        let result = {
            let mut page = self.pages[buf.id.0].lock();
            f(&mut page)
        };
        let mut lru = self.lru();
        let head = lru.head_mut(buf.id);
        head.dirty = true;
        head.uptodate = true;
        result
    }

    pub fn mark_dirty(&self, buf: Buf) {
        self.wait_on_buffer(buf.id);
        self.check(buf);
        self.lru().head_mut(buf.id).dirty = true;
    }
    pub fn is_dirty(&self, buf: Buf) -> bool {
        self.wait_on_buffer(buf.id);
        self.head(buf.id).dirty
    }
    pub fn is_uptodate(&self, buf: Buf) -> bool {
        self.wait_on_buffer(buf.id);
        self.head(buf.id).uptodate
    }
    pub fn pin_count(&self, buf: Buf) -> u32 {
        self.head(buf.id).pin_count
    }

    /// Write every dirty buffer. Buffers that fail stay dirty; the first
    /// failure is returned once all have been tried.
    pub fn sync_all(&self) -> Result<(), BioError> {
        self.sync(|_| true)
    }

    /// Write every dirty buffer of `dev`.
    pub fn sync_device(&self, dev: u32) -> Result<(), BioError> {
        self.sync(|head| head.dev == dev)
    }

    fn sync(&self, wanted: impl Fn(&BufferHead) -> bool) -> Result<(), BioError> {
        let mut result = Ok(());
        for i in 0..self.len() {
            let id = BufId(i);
            self.wait_on_buffer(id);
            let head = self.head(id);
            if !head.dirty || !head.is_bound() || !wanted(&head) {
                continue;
            }
            if let Err(err) = self.transfer(id, Direction::Write) {
                warn!("bio: sync of {}:{} failed: {}", head.dev, head.block, err);
                if result.is_ok() {
                    result = Err(BioError::Io {
                        dev: head.dev,
                        block: head.block,
                    });
                }
            }
        }
        result
    }

    /// Flush everything and forget the identity of every buffer that is
    /// neither held nor still dirty.
    pub fn shutdown(&self) -> Result<(), BioError> {
        let result = self.sync_all();
        let mut unbound = 0;
        let mut lru = self.lru();
        for i in 0..lru.len() {
            let id = BufId(i);
            let head = lru.head(id);
            if head.pin_count != 0 || head.locked || head.dirty {
                continue;
            }
            if head.is_bound() {
                lru.hash_remove(id);
                lru.head_mut(id).unbind();
                unbound += 1;
            }
        }
        info!("bio: shutdown, {} buffers unbound", unbound);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        hardware::RamDisk,
        proc::{ContextSwitch, TaskId},
    };

    struct NoSwitch;
    impl ContextSwitch for NoSwitch {
        fn switch_to(&self, _prev: TaskId, _next: TaskId) {}
        fn exit_to(&self, _prev: TaskId, _next: TaskId) {}
    }

    fn cache(nbuf: usize) -> BufferCache<RamDisk> {
        let sched = Arc::new(Scheduler::new(Arc::new(NoSwitch)));
        BufferCache::new(sched, RamDisk::new(64), nbuf)
    }

    #[test]
    fn sizing_counts_heads_and_pages() {
        assert_eq!(nbuf_for_memory(10 * (BLOCK_SIZE + BUFFER_HEAD_SIZE) + 5), 10);
        assert_eq!(nbuf_for_memory(BLOCK_SIZE), 0);
        let sched = Arc::new(Scheduler::new(Arc::new(NoSwitch)));
        assert_eq!(BufferCache::with_default_pool(sched, RamDisk::new(1)).len(), NBUF);
    }

    #[test]
    fn written_data_is_read_back_after_reuse() {
        let cache = cache(2);
        let buf = cache.acquire(1, 7);
        cache.write_data(buf, |page| page[..4].copy_from_slice(b"data"));
        cache.release(buf);

        // Push 1:7 out of a two-buffer pool.
        for block in 8..10 {
            let other = cache.read(1, block).unwrap();
            cache.release(other);
        }
        assert!(cache.lookup(1, 7).is_none());

        let buf = cache.read(1, 7).unwrap();
        assert_eq!(cache.read_data(buf, |page| page[..4].to_vec()), b"data");
        assert!(!cache.is_dirty(buf));
        cache.release(buf);
        cache.verify();
    }

    #[test]
    fn claims_rotate_through_the_ring() {
        let cache = cache(3);
        let ids: Vec<BufId> = (0..4)
            .map(|block| {
                let buf = cache.acquire(1, block);
                cache.release(buf);
                buf.id()
            })
            .collect();
        assert_eq!(ids, vec![BufId(0), BufId(1), BufId(2), BufId(0)]);
        assert_eq!(
            cache.stats(),
            CacheStats {
                hits: 0,
                misses: 4,
                retries: 0
            }
        );
    }

    #[test]
    fn lookup_pins_only_cached_blocks() {
        let cache = cache(2);
        assert!(cache.lookup(1, 1).is_none());
        let buf = cache.acquire(1, 1);
        let again = cache.lookup(1, 1).unwrap();
        assert_eq!(again.id(), buf.id());
        assert_eq!(cache.pin_count(buf), 2);
        cache.release(again);
        cache.release(buf);
        assert_eq!(cache.head(buf.id()).pin_count, 0);
    }

    #[test]
    fn read_of_a_missing_block_reports_a_fault() {
        let cache = cache(2);
        assert_eq!(cache.read(1, 64), Err(BioError::Io { dev: 1, block: 64 }));
        let head = cache.head(BufId(0));
        assert_eq!(head.pin_count, 0);
        assert!(!head.uptodate);
        cache.verify();
    }

    #[test]
    fn single_buffer_pool_survives_an_unwritable_block() {
        let cache = cache(1);
        let buf = cache.acquire(1, 64);
        cache.write_data(buf, |page| page[0] = 1);
        cache.release(buf);

        let next = cache.acquire(1, 2);
        assert_eq!((next.dev(), next.block()), (1, 2));
        assert_eq!(cache.stats().retries, 1);
        cache.release(next);
        cache.verify();
    }

    #[test]
    #[should_panic(expected = "trying to free free buffer")]
    fn double_release_is_fatal() {
        let cache = cache(2);
        let buf = cache.acquire(1, 1);
        cache.release(buf);
        cache.release(buf);
    }

    #[test]
    fn shutdown_flushes_and_unbinds() {
        let cache = cache(2);
        let held = cache.acquire(1, 1);
        let buf = cache.acquire(1, 2);
        cache.write_data(buf, |page| page[0] = 9);
        cache.release(buf);

        cache.shutdown().unwrap();
        assert!(!cache.head(buf.id()).is_bound());
        assert!(cache.head(held.id()).is_bound());
        cache.verify();
        cache.release(held);

        let mut page = [0u8; BLOCK_SIZE];
        cache.device().transfer(Direction::Read, 1, 2, &mut page).unwrap();
        assert_eq!(page[0], 9);
    }
}
