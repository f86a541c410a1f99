use core::{
  ptr::NonNull,
  sync::atomic::{
    AtomicUsize,
    Ordering,
  },
};

use portable_atomic::AtomicU128;

/// Head of the chunk stack: generation tag in the high 64 bits, pointer in
/// the low 64. Swapping both words in one compare-and-swap defeats ABA:
/// a chunk can be popped, reused, and pushed back at the same address before
/// a slow thread retries its CAS, but the tag will have moved on.
#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
struct TaggedHead(u128);

impl TaggedHead {
  fn new(ptr: *mut u8, tag: u64) -> Self {
    Self((u128::from(tag)) << 64 | ptr as usize as u128)
  }

  fn ptr(self) -> *mut u8 {
    self.0 as usize as *mut u8
  }

  fn tag(self) -> u64 {
    (self.0 >> 64) as u64
  }
}

// A resident chunk lends its first word as the stack link. Accessed
// atomically because a slow pop may read the word of a chunk another thread
// already owns; the tagged CAS then rejects whatever was read.
#[inline(always)]
fn link_of(chunk: *mut u8) -> &'static AtomicUsize {
  unsafe { &*(chunk as *const AtomicUsize) }
}

/// Lock-free LIFO of free chunks, shared by every arena. A chunk on the
/// stack lends its first word as the link to the next chunk; once popped the
/// word belongs to the slab's free list again.
pub struct ChunkStack {
  head: AtomicU128,
}

impl ChunkStack {
  pub const fn new() -> Self {
    Self {
      head: AtomicU128::new(0),
    }
  }

  pub fn push(&self, chunk: NonNull<u8>) {
    let mut old = TaggedHead(self.head.load(Ordering::Relaxed));

    loop {
      link_of(chunk.as_ptr()).store(old.ptr() as usize, Ordering::Relaxed);
      let new = TaggedHead::new(chunk.as_ptr(), old.tag().wrapping_add(1));

      match self.head.compare_exchange_weak(
        old.0,
        new.0,
        Ordering::Release,
        Ordering::Relaxed,
      ) {
        Ok(_) => return,
        Err(head) => old = TaggedHead(head),
      }
    }
  }

  pub fn pop(&self) -> Option<NonNull<u8>> {
    let mut old = TaggedHead(self.head.load(Ordering::Acquire));

    loop {
      let ptr = old.ptr();
      if ptr.is_null() {
        return None;
      }

      // Chunks never return to the kernel while in circulation, so the
      // observed head stays mapped even if another thread pops it first.
      let next = link_of(ptr).load(Ordering::Relaxed) as *mut u8;
      let new = TaggedHead::new(next, old.tag().wrapping_add(1));

      match self.head.compare_exchange_weak(
        old.0,
        new.0,
        Ordering::Acquire,
        Ordering::Relaxed,
      ) {
        Ok(_) => return NonNull::new(ptr),
        Err(head) => old = TaggedHead(head),
      }
    }
  }

  pub fn is_empty(&self) -> bool {
    TaggedHead(self.head.load(Ordering::Relaxed)).ptr().is_null()
  }

  /// Racy bounded walk; informational only.
  pub fn approximate_len(&self) -> usize {
    const LIMIT: usize = 1_000_000;

    let mut count = 0;
    let mut current = TaggedHead(self.head.load(Ordering::Relaxed)).ptr();
    while !current.is_null() && count < LIMIT {
      count += 1;
      current = link_of(current).load(Ordering::Relaxed) as *mut u8;
    }
    count
  }
}

impl Default for ChunkStack {
  fn default() -> Self {
    Self::new()
  }
}
