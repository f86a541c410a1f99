use core::ptr::NonNull;

use getset::{
  Getters,
  MutGetters,
};
use slabcache_bitmap::{
  Bitmap,
  BitmapError,
  BitmapWord,
};
use slabcache_fixed::{
  Bump,
  BumpError,
};
use slabcache_list::{
  HasLink,
  Link,
};
use slabcache_sys::{
  chunk::CHUNK_SIZE,
  prim::prefetch_read,
};

use crate::classes::ClassIndex;

#[derive(Debug)]
pub enum SlabError {
  BumpError(BumpError),
  BitmapError(BitmapError),
  InvalidClass(usize),
}

impl From<BumpError> for SlabError {
  fn from(err: BumpError) -> Self {
    SlabError::BumpError(err)
  }
}

impl From<BitmapError> for SlabError {
  fn from(err: BitmapError) -> Self {
    SlabError::BitmapError(err)
  }
}

pub type SlabResult<T> = Result<T, SlabError>;

/// One chunk carved into equal blocks of a single size class. Free blocks
/// thread an intrusive list through their first word; the occupancy bitmap
/// carries one bit per block for invariant checks.
///
/// The block size is a const parameter so each class gets monomorphic
/// allocate/deallocate code with no runtime size arithmetic.
pub struct Slab<const BLOCK_SIZE: usize> {
  base: NonNull<u8>,
  free_head: *mut u8,
  allocated: usize,
  occupancy: Bitmap,
}

impl<const BLOCK_SIZE: usize> Slab<BLOCK_SIZE> {
  pub const BLOCKS: usize = CHUNK_SIZE / BLOCK_SIZE;

  /// Builds the slab metadata in `bump` and threads every block of `chunk`
  /// into the free list in ascending address order.
  pub fn new(bump: &mut Bump, chunk: NonNull<u8>) -> SlabResult<NonNull<Self>> {
    let slab = bump.create::<Self>()?;

    let words = Bitmap::words(Self::BLOCKS);
    let store = bump.create_array::<BitmapWord>(words)?;
    let store = unsafe { core::slice::from_raw_parts_mut(store.as_ptr(), words) };
    let occupancy = Bitmap::zero(store, Self::BLOCKS)?;

    let base = chunk.as_ptr();
    let mut offset = 0;
    while offset + BLOCK_SIZE < CHUNK_SIZE {
      unsafe {
        (base.add(offset) as *mut *mut u8).write(base.add(offset + BLOCK_SIZE));
      }
      offset += BLOCK_SIZE;
    }
    unsafe { (base.add(offset) as *mut *mut u8).write(core::ptr::null_mut()) };

    unsafe {
      slab.as_ptr().write(Self {
        base: chunk,
        free_head: base,
        allocated: 0,
        occupancy,
      });
    }

    Ok(slab)
  }

  #[inline(always)]
  fn block_index(&self, ptr: NonNull<u8>) -> usize {
    (ptr.as_ptr() as usize - self.base.as_ptr() as usize) / BLOCK_SIZE
  }

  #[inline(always)]
  pub fn allocate(&mut self) -> Option<NonNull<u8>> {
    let block = self.free_head;
    if block.is_null() {
      return None;
    }

    let next = unsafe { (block as *mut *mut u8).read() };
    if !next.is_null() {
      prefetch_read(next);
    }
    self.free_head = next;
    self.allocated += 1;

    let block = unsafe { NonNull::new_unchecked(block) };
    self.occupancy.set(self.block_index(block)).ok();
    Some(block)
  }

  /// Caller guarantees `contains(ptr)`; the bin verifies by base mask.
  #[inline(always)]
  pub fn deallocate(&mut self, ptr: NonNull<u8>) {
    debug_assert!(self.contains(ptr));
    debug_assert_eq!((ptr.as_ptr() as usize - self.base.as_ptr() as usize) % BLOCK_SIZE, 0);

    self.occupancy.clear(self.block_index(ptr)).ok();
    unsafe { (ptr.as_ptr() as *mut *mut u8).write(self.free_head) };
    self.free_head = ptr.as_ptr();
    self.allocated -= 1;
  }

  #[inline(always)]
  pub fn is_empty(&self) -> bool {
    self.allocated == 0
  }

  #[inline(always)]
  pub fn is_full(&self) -> bool {
    self.free_head.is_null()
  }

  #[inline(always)]
  pub fn contains(&self, ptr: NonNull<u8>) -> bool {
    let addr = ptr.as_ptr() as usize;
    let base = self.base.as_ptr() as usize;
    addr >= base && addr < base + CHUNK_SIZE
  }

  #[inline(always)]
  pub fn base(&self) -> NonNull<u8> {
    self.base
  }

  pub fn used_blocks(&self) -> usize {
    self.allocated
  }

  pub fn free_blocks(&self) -> usize {
    Self::BLOCKS - self.allocated
  }

  pub fn occupancy(&self) -> &Bitmap {
    &self.occupancy
  }
}

macro_rules! define_slab_slot {
  ($(($variant:ident, $id:literal, $size:literal)),+ $(,)?) => {
    /// Class-indexed handle over the monomorphic slab variants. Matching on
    /// the discriminant is the dispatch table; every arm inlines the
    /// class-specialized slab code.
    pub enum SlabSlot {
      $($variant(NonNull<Slab<$size>>),)+
    }

    impl SlabSlot {
      pub fn new(bump: &mut Bump, class: ClassIndex, chunk: NonNull<u8>) -> SlabResult<Self> {
        match class.0 {
          $($id => Ok(SlabSlot::$variant(Slab::<$size>::new(bump, chunk)?)),)+
          other => Err(SlabError::InvalidClass(other)),
        }
      }

      #[inline(always)]
      pub fn class(&self) -> ClassIndex {
        match self {
          $(SlabSlot::$variant(_) => ClassIndex($id),)+
        }
      }

      #[inline(always)]
      pub fn allocate(&mut self) -> Option<NonNull<u8>> {
        match self {
          $(SlabSlot::$variant(slab) => unsafe { slab.as_mut() }.allocate(),)+
        }
      }

      #[inline(always)]
      pub fn deallocate(&mut self, ptr: NonNull<u8>) {
        match self {
          $(SlabSlot::$variant(slab) => unsafe { slab.as_mut() }.deallocate(ptr),)+
        }
      }

      #[inline(always)]
      pub fn base(&self) -> NonNull<u8> {
        match self {
          $(SlabSlot::$variant(slab) => unsafe { slab.as_ref() }.base(),)+
        }
      }

      pub fn is_empty(&self) -> bool {
        match self {
          $(SlabSlot::$variant(slab) => unsafe { slab.as_ref() }.is_empty(),)+
        }
      }

      pub fn is_full(&self) -> bool {
        match self {
          $(SlabSlot::$variant(slab) => unsafe { slab.as_ref() }.is_full(),)+
        }
      }

      pub fn contains(&self, ptr: NonNull<u8>) -> bool {
        match self {
          $(SlabSlot::$variant(slab) => unsafe { slab.as_ref() }.contains(ptr),)+
        }
      }

      pub fn used_blocks(&self) -> usize {
        match self {
          $(SlabSlot::$variant(slab) => unsafe { slab.as_ref() }.used_blocks(),)+
        }
      }

      pub fn free_blocks(&self) -> usize {
        match self {
          $(SlabSlot::$variant(slab) => unsafe { slab.as_ref() }.free_blocks(),)+
        }
      }

      pub fn blocks(&self) -> usize {
        match self {
          $(SlabSlot::$variant(_) => Slab::<$size>::BLOCKS,)+
        }
      }
    }
  };
}

define_slab_slot! {
  (C0, 0, 16),
  (C1, 1, 32),
  (C2, 2, 48),
  (C3, 3, 64),
  (C4, 4, 80),
  (C5, 5, 96),
  (C6, 6, 112),
  (C7, 7, 128),
  (C8, 8, 144),
  (C9, 9, 160),
  (C10, 10, 176),
  (C11, 11, 192),
  (C12, 12, 208),
  (C13, 13, 224),
  (C14, 14, 240),
  (C15, 15, 256),
  (C16, 16, 512),
  (C17, 17, 1024),
  (C18, 18, 2048),
  (C19, 19, 4096),
  (C20, 20, 8192),
  (C21, 21, 16384),
  (C22, 22, 32768),
  (C23, 23, 65536),
}

/// Couples a slab with its intrusive list membership. Nodes are created once
/// per slab and never move, so migrating a slab between bin lists is pointer
/// surgery only.
#[derive(Getters, MutGetters)]
pub struct SlabNode {
  link: Link<SlabNode>,
  #[getset(get = "pub", get_mut = "pub")]
  slot: SlabSlot,
}

impl SlabNode {
  pub fn new(
    bump: &mut Bump,
    class: ClassIndex,
    chunk: NonNull<u8>,
  ) -> SlabResult<NonNull<SlabNode>> {
    let slot = SlabSlot::new(bump, class, chunk)?;
    let node = bump.create::<SlabNode>()?;
    unsafe {
      node.as_ptr().write(SlabNode {
        link: Link::default(),
        slot,
      });
    }
    Ok(node)
  }
}

impl HasLink for SlabNode {
  fn link(&self) -> &Link<Self> {
    &self.link
  }

  fn link_mut(&mut self) -> &mut Link<Self> {
    &mut self.link
  }
}

#[cfg(test)]
mod tests {
  use slabcache_sys::chunk::{
    acquire,
    release,
  };

  use super::*;

  fn with_slab<const BLOCK_SIZE: usize>(f: impl FnOnce(&mut Slab<BLOCK_SIZE>)) {
    let mut bump = Bump::new(64 * 1024);
    let chunk = acquire().expect("chunk acquisition failed");
    let mut slab = Slab::<BLOCK_SIZE>::new(&mut bump, chunk).unwrap();
    f(unsafe { slab.as_mut() });
    unsafe { release(chunk) };
  }

  #[test]
  fn first_allocations_walk_ascending() {
    with_slab::<65536>(|slab| {
      let first = slab.allocate().unwrap();
      let second = slab.allocate().unwrap();
      let third = slab.allocate().unwrap();

      assert_eq!(first, slab.base());
      assert_eq!(
        second.as_ptr() as usize,
        first.as_ptr() as usize + 65536
      );
      assert_eq!(
        third.as_ptr() as usize,
        second.as_ptr() as usize + 65536
      );
    });
  }

  #[test]
  fn free_then_allocate_is_lifo() {
    with_slab::<64>(|slab| {
      let a = slab.allocate().unwrap();
      let b = slab.allocate().unwrap();

      slab.deallocate(b);
      slab.deallocate(a);

      assert_eq!(slab.allocate().unwrap(), a);
      assert_eq!(slab.allocate().unwrap(), b);
    });
  }

  #[test]
  fn fills_to_exact_capacity() {
    with_slab::<65536>(|slab| {
      let blocks = Slab::<65536>::BLOCKS;
      assert_eq!(blocks, 32);

      let mut ptrs = Vec::new();
      for _ in 0..blocks {
        ptrs.push(slab.allocate().unwrap());
      }

      assert!(slab.is_full());
      assert!(slab.allocate().is_none());
      assert_eq!(slab.used_blocks(), blocks);
      assert_eq!(slab.free_blocks(), 0);

      ptrs.sort();
      ptrs.dedup();
      assert_eq!(ptrs.len(), blocks);
    });
  }

  #[test]
  fn bitmap_tracks_allocated_count() {
    with_slab::<4096>(|slab| {
      let mut held = Vec::new();
      for _ in 0..10 {
        held.push(slab.allocate().unwrap());
      }
      assert_eq!(slab.occupancy().count(), slab.used_blocks());

      for ptr in held.drain(..5) {
        slab.deallocate(ptr);
      }
      assert_eq!(slab.occupancy().count(), 5);
      assert_eq!(slab.used_blocks(), 5);
    });
  }

  #[test]
  fn empty_and_full_transitions() {
    with_slab::<65536>(|slab| {
      assert!(slab.is_empty());
      assert!(!slab.is_full());

      let ptr = slab.allocate().unwrap();
      assert!(!slab.is_empty());

      slab.deallocate(ptr);
      assert!(slab.is_empty());
    });
  }

  #[test]
  fn contains_is_a_range_check() {
    with_slab::<256>(|slab| {
      let inside = slab.allocate().unwrap();
      assert!(slab.contains(inside));
      assert!(slab.contains(slab.base()));

      let past_end = unsafe { slab.base().add(CHUNK_SIZE) };
      assert!(!slab.contains(past_end));
    });
  }

  #[test]
  fn smallest_class_has_full_block_count() {
    assert_eq!(Slab::<16>::BLOCKS, 131072);
    with_slab::<16>(|slab| {
      let a = slab.allocate().unwrap();
      let b = slab.allocate().unwrap();
      assert_eq!(b.as_ptr() as usize - a.as_ptr() as usize, 16);
      assert_eq!(slab.occupancy().count(), 2);
    });
  }

  #[test]
  fn slot_dispatches_by_class() {
    let mut bump = Bump::new(64 * 1024);
    let chunk = acquire().unwrap();

    let mut slot = SlabSlot::new(&mut bump, ClassIndex(17), chunk).unwrap();
    assert_eq!(slot.class(), ClassIndex(17));
    assert_eq!(slot.blocks(), CHUNK_SIZE / 1024);
    assert_eq!(slot.base(), chunk);

    let ptr = slot.allocate().unwrap();
    assert!(slot.contains(ptr));
    assert_eq!(slot.used_blocks(), 1);
    slot.deallocate(ptr);
    assert!(slot.is_empty());

    unsafe { release(chunk) };
  }

  #[test]
  fn slot_rejects_unknown_class() {
    let mut bump = Bump::new(64 * 1024);
    let chunk = acquire().unwrap();
    let result = SlabSlot::new(&mut bump, ClassIndex(24), chunk);
    assert!(matches!(result, Err(SlabError::InvalidClass(24))));
    unsafe { release(chunk) };
  }
}
