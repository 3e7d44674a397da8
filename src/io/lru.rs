//! Buffer pool index: hash chains keyed on (dev, block) and the recency ring.
//!
//! Both structures are doubly linked through [`BufId`]s stored in the
//! buffer heads. Every buffer is on the ring at all times. A buffer is on
//! a hash chain only while it is bound to an identity, except for the
//! short window in which a claimer holding the only pin re-identifies it.

use super::buf::{BufId, BufferHead};
use crate::param::NR_HASH;
use alloc::{vec, vec::Vec};

pub struct BufLru {
    heads: Vec<BufferHead>,
    /// Oldest buffer; reuse scans start here.
    ring: BufId,
    hash: [Option<BufId>; NR_HASH],
}
impl BufLru {
    /// Link `nbuf` unbound buffers into the ring in index order.
    pub fn new(nbuf: usize) -> BufLru {
        if nbuf == 0 {
            panic!("bio: empty buffer pool");
        }
        let mut heads: Vec<BufferHead> = (0..nbuf).map(|i| BufferHead::new(BufId(i))).collect();
        for (i, head) in heads.iter_mut().enumerate() {
            head.ring_prev = BufId((i + nbuf - 1) % nbuf);
            head.ring_next = BufId((i + 1) % nbuf);
        }
        BufLru {
            heads,
            ring: BufId(0),
            hash: [None; NR_HASH],
        }
    }

    pub fn len(&self) -> usize {
        self.heads.len()
    }
    pub fn head(&self, id: BufId) -> &BufferHead {
        &self.heads[id.0]
    }
    pub fn head_mut(&mut self, id: BufId) -> &mut BufferHead {
        &mut self.heads[id.0]
    }

    fn bucket(dev: u32, block: u32) -> usize {
        (dev ^ block) as usize % NR_HASH
    }

    /// The bound buffer holding `(dev, block)`, if any.
    pub fn find(&self, dev: u32, block: u32) -> Option<BufId> {
        let mut cursor = self.hash[Self::bucket(dev, block)];
        while let Some(id) = cursor {
            let head = self.head(id);
            if head.holds(dev, block) {
                return Some(id);
            }
            cursor = head.hash_next;
        }
        None
    }

    /// Put `id` at the front of the chain for its current identity.
    pub fn hash_insert(&mut self, id: BufId) {
        let head = self.head(id);
        if head.hashed || !head.is_bound() {
            panic!("bio: hash_insert of buf {} ({}:{})", id.0, head.dev, head.block);
        }
        let bucket = Self::bucket(head.dev, head.block);
        let first = self.hash[bucket];
        if let Some(first) = first {
            self.head_mut(first).hash_prev = Some(id);
        }
        let head = self.head_mut(id);
        head.hash_prev = None;
        head.hash_next = first;
        head.hashed = true;
        self.hash[bucket] = Some(id);
    }

    /// Take `id` off its chain. Must run before the identity changes.
    pub fn hash_remove(&mut self, id: BufId) {
        let head = *self.head(id);
        if !head.hashed {
            return;
        }
        match head.hash_prev {
            Some(prev) => self.head_mut(prev).hash_next = head.hash_next,
            None => self.hash[Self::bucket(head.dev, head.block)] = head.hash_next,
        }
        if let Some(next) = head.hash_next {
            self.head_mut(next).hash_prev = head.hash_prev;
        }
        let head = self.head_mut(id);
        head.hash_prev = None;
        head.hash_next = None;
        head.hashed = false;
    }

    /// Make `id` the newest buffer on the ring.
    pub fn move_to_tail(&mut self, id: BufId) {
        if self.len() == 1 {
            return;
        }
        // On a circular ring the oldest becomes the newest by advancing.
        if self.ring == id {
            self.ring = self.head(id).ring_next;
            return;
        }
        let BufferHead {
            ring_prev,
            ring_next,
            ..
        } = *self.head(id);
        self.head_mut(ring_prev).ring_next = ring_next;
        self.head_mut(ring_next).ring_prev = ring_prev;

        let first = self.ring;
        let last = self.head(first).ring_prev;
        self.head_mut(last).ring_next = id;
        self.head_mut(first).ring_prev = id;
        let head = self.head_mut(id);
        head.ring_prev = last;
        head.ring_next = first;
    }

    /// Ring members, oldest first.
    pub fn ring_order(&self) -> Vec<BufId> {
        let mut order = Vec::with_capacity(self.len());
        let mut cursor = self.ring;
        for _ in 0..self.len() {
            order.push(cursor);
            cursor = self.head(cursor).ring_next;
        }
        order
    }

    /// Walk the ring and every chain, halting on any inconsistency.
    pub fn verify(&self) {
        let mut seen = vec![false; self.len()];
        let mut cursor = self.ring;
        for _ in 0..self.len() {
            if seen[cursor.0] {
                panic!("bio: ring revisits buf {}", cursor.0);
            }
            seen[cursor.0] = true;
            let next = self.head(cursor).ring_next;
            if self.head(next).ring_prev != cursor {
                panic!("bio: ring link broken at buf {}", cursor.0);
            }
            cursor = next;
        }
        if cursor != self.ring {
            panic!("bio: ring does not close");
        }

        let mut chained = 0;
        for (bucket, first) in self.hash.iter().enumerate() {
            let mut prev = None;
            let mut cursor = *first;
            while let Some(id) = cursor {
                let head = self.head(id);
                chained += 1;
                if chained > self.len() {
                    panic!("bio: hash chain {} loops", bucket);
                }
                if !head.hashed || head.hash_prev != prev {
                    panic!("bio: hash link broken at buf {}", id.0);
                }
                if Self::bucket(head.dev, head.block) != bucket {
                    panic!("bio: buf {} on wrong hash chain", id.0);
                }
                if self.find(head.dev, head.block) != Some(id) {
                    panic!("bio: duplicate buffers for {}:{}", head.dev, head.block);
                }
                prev = cursor;
                cursor = head.hash_next;
            }
        }

        for (i, head) in self.heads.iter().enumerate() {
            if head.hashed && !head.is_bound() {
                panic!("bio: unbound buf {} is hashed", i);
            }
            // Only a claimer holding a pin may keep a bound buffer off the chains.
            if head.is_bound() && !head.hashed && head.pin_count == 0 {
                panic!("bio: buf {} bound {}:{} but hashed=false", i, head.dev, head.block);
            }
        }
        let hashed = self.heads.iter().filter(|head| head.hashed).count();
        if hashed != chained {
            panic!("bio: {} buffers hashed, {} on chains", hashed, chained);
        }
    }
}
