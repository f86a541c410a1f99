use core::ptr::NonNull;

use slabcache_fixed::Bump;
use slabcache_list::{
  HasLink,
  List,
  ListIter,
};
use slabcache_sys::{
  chunk::chunk_base,
  prim::CACHE_LINE,
};

use crate::{
  classes::ClassIndex,
  slab::{
    SlabError,
    SlabNode,
  },
  static_::{
    request_chunk,
    return_chunk,
  },
};

#[derive(Debug)]
pub enum BinError {
  SlabError(SlabError),
  OutOfMemory,
}

impl From<SlabError> for BinError {
  fn from(err: SlabError) -> Self {
    BinError::SlabError(err)
  }
}

pub type BinResult<T> = Result<T, BinError>;

/// Intrusive list of slab nodes. Popped from the back, so the most recently
/// parked chunk comes back first while its lines are still warm.
struct SlabList {
  head: Option<NonNull<SlabNode>>,
  tail: Option<NonNull<SlabNode>>,
}

impl SlabList {
  const fn new() -> Self {
    Self {
      head: None,
      tail: None,
    }
  }

  fn is_empty(&self) -> bool {
    self.head.is_none()
  }

  fn push_back(&mut self, mut node: NonNull<SlabNode>) {
    if let Some(mut tail) = self.tail {
      unsafe { List::insert_after(node.as_mut(), tail.as_mut()) };
    } else {
      self.head = Some(node);
    }
    self.tail = Some(node);
  }

  fn pop_back(&mut self) -> Option<NonNull<SlabNode>> {
    let mut node = self.tail.take()?;

    let node_ref = unsafe { node.as_mut() };
    self.tail = node_ref.link().prev();
    if self.tail.is_none() {
      self.head = None;
    }
    List::remove(node_ref);

    Some(node)
  }

  fn remove(&mut self, mut node: NonNull<SlabNode>) {
    let node_ref = unsafe { node.as_mut() };

    if self.head == Some(node) {
      self.head = node_ref.link().next();
    }
    if self.tail == Some(node) {
      self.tail = node_ref.link().prev();
    }
    List::remove(node_ref);
  }

  fn iter(&self) -> ListIter<'_, SlabNode> {
    ListIter::new(self.head)
  }

  #[cfg(test)]
  fn len(&self) -> usize {
    self.iter().count()
  }
}

/// One arena's state for one size class: the active slab plus the partial
/// and full side lists. Aligned so neighbouring classes do not share lines.
#[repr(align(64))]
pub struct Bin {
  class: ClassIndex,
  active: Option<NonNull<SlabNode>>,
  partial: SlabList,
  full: SlabList,
}

const _: () = assert!(core::mem::align_of::<Bin>() == CACHE_LINE);

impl Bin {
  pub const fn new(class: ClassIndex) -> Self {
    Self {
      class,
      active: None,
      partial: SlabList::new(),
      full: SlabList::new(),
    }
  }

  pub fn class(&self) -> ClassIndex {
    self.class
  }

  #[inline(always)]
  pub fn allocate(&mut self, bump: &mut Bump) -> BinResult<NonNull<u8>> {
    if let Some(mut active) = self.active {
      if let Some(ptr) = unsafe { active.as_mut() }.slot_mut().allocate() {
        return Ok(ptr);
      }
    }

    self.allocate_slow(bump)
  }

  #[cold]
  #[inline(never)]
  fn allocate_slow(&mut self, bump: &mut Bump) -> BinResult<NonNull<u8>> {
    // The active slab just came up empty-handed, so it is full by now.
    if let Some(active) = self.active.take() {
      self.full.push_back(active);
    }

    if let Some(mut node) = self.partial.pop_back() {
      self.active = Some(node);
      // Partial-list invariant: at least one block is free.
      return unsafe { node.as_mut() }
        .slot_mut()
        .allocate()
        .ok_or(BinError::OutOfMemory);
    }

    let chunk = request_chunk().ok_or(BinError::OutOfMemory)?;
    let mut node = match SlabNode::new(bump, self.class, chunk) {
      Ok(node) => node,
      Err(err) => {
        return_chunk(chunk);
        return Err(err.into());
      }
    };

    self.active = Some(node);
    unsafe { node.as_mut() }
      .slot_mut()
      .allocate()
      .ok_or(BinError::OutOfMemory)
  }

  #[inline(always)]
  pub fn deallocate(&mut self, ptr: NonNull<u8>) {
    let base = chunk_base(ptr.as_ptr() as usize);

    if let Some(mut active) = self.active {
      let node = unsafe { active.as_mut() };
      if node.slot().base().as_ptr() as usize == base {
        node.slot_mut().deallocate(ptr);
        return;
      }
    }

    self.deallocate_slow(ptr, base);
  }

  #[cold]
  #[inline(never)]
  fn deallocate_slow(&mut self, ptr: NonNull<u8>, base: usize) {
    for node in self.partial.iter() {
      if node.slot().base().as_ptr() as usize == base {
        node.slot_mut().deallocate(ptr);
        return;
      }
    }

    let mut owner = None;
    for node in self.full.iter() {
      if node.slot().base().as_ptr() as usize == base {
        owner = Some(NonNull::from(node));
        break;
      }
    }

    if let Some(mut node) = owner {
      unsafe { node.as_mut() }.slot_mut().deallocate(ptr);
      // It has a free block again; the full list must not keep it.
      self.full.remove(node);
      self.partial.push_back(node);
      return;
    }

    // Not ours: foreign-thread or stale pointer, dropped silently.
  }
}

impl Drop for Bin {
  fn drop(&mut self) {
    if let Some(active) = self.active.take() {
      return_chunk(unsafe { active.as_ref() }.slot().base());
    }
    while let Some(node) = self.partial.pop_back() {
      return_chunk(unsafe { node.as_ref() }.slot().base());
    }
    while let Some(node) = self.full.pop_back() {
      return_chunk(unsafe { node.as_ref() }.slot().base());
    }
  }
}

#[cfg(test)]
mod tests {
  use slabcache_sys::chunk::CHUNK_SIZE;

  use super::*;
  use crate::classes::{
    block_size_of,
    class_for,
  };

  // Bump first: locals drop in reverse order, and the bin's teardown walks
  // metadata that lives in the bump.
  fn bin_for(size: usize) -> (Bump, Bin) {
    let class = class_for(size).unwrap();
    (Bump::new(64 * 1024), Bin::new(class))
  }

  #[test]
  fn allocates_distinct_blocks() {
    let _lock = crate::TEST_LOCK.read().unwrap();
    let (mut bump, mut bin) = bin_for(64);

    let a = bin.allocate(&mut bump).unwrap();
    let b = bin.allocate(&mut bump).unwrap();
    assert_ne!(a, b);
    assert_eq!(a.as_ptr() as usize % 16, 0);
    assert_eq!(b.as_ptr() as usize % 16, 0);

    bin.deallocate(a);
    bin.deallocate(b);
  }

  #[test]
  fn free_then_allocate_reuses_block() {
    let _lock = crate::TEST_LOCK.read().unwrap();
    let (mut bump, mut bin) = bin_for(128);

    let a = bin.allocate(&mut bump).unwrap();
    bin.deallocate(a);
    let b = bin.allocate(&mut bump).unwrap();
    assert_eq!(a, b);
  }

  #[test]
  fn overflow_provisions_second_slab_and_full_list_recovers() {
    let _lock = crate::TEST_LOCK.read().unwrap();
    let size = 65536;
    let (mut bump, mut bin) = bin_for(size);
    let blocks = CHUNK_SIZE / block_size_of(class_for(size).unwrap());

    let mut first_slab = Vec::new();
    for _ in 0..blocks {
      first_slab.push(bin.allocate(&mut bump).unwrap());
    }
    let first_base = chunk_base(first_slab[0].as_ptr() as usize);

    // One more than capacity: the first slab moves to the full list and a
    // fresh chunk becomes active.
    let overflow = bin.allocate(&mut bump).unwrap();
    assert_ne!(chunk_base(overflow.as_ptr() as usize), first_base);
    assert_eq!(bin.full.len(), 1);
    assert!(bin.partial.is_empty());

    // Freeing into the full slab migrates it to the partial list.
    bin.deallocate(first_slab.pop().unwrap());
    assert_eq!(bin.full.len(), 0);
    assert_eq!(bin.partial.len(), 1);

    // Fill the active slab; the next allocation must pull the partial slab
    // back instead of provisioning a third chunk.
    let mut second_slab = vec![overflow];
    for _ in 0..blocks - 1 {
      second_slab.push(bin.allocate(&mut bump).unwrap());
    }
    let reclaimed = bin.allocate(&mut bump).unwrap();
    assert_eq!(chunk_base(reclaimed.as_ptr() as usize), first_base);
  }

  #[test]
  fn deallocate_into_partial_slab() {
    let _lock = crate::TEST_LOCK.read().unwrap();
    let size = 65536;
    let (mut bump, mut bin) = bin_for(size);
    let blocks = CHUNK_SIZE / block_size_of(class_for(size).unwrap());

    let mut held = Vec::new();
    for _ in 0..blocks + 1 {
      held.push(bin.allocate(&mut bump).unwrap());
    }

    // First slab is full-listed; free two of its blocks. The second free
    // must find the slab on the partial list.
    let x = held[0];
    let y = held[1];
    bin.deallocate(x);
    bin.deallocate(y);
    assert_eq!(bin.partial.len(), 1);

    // Exhaust the active slab, then the partial slab hands both blocks back.
    let mut refill = Vec::new();
    for _ in 0..blocks + 1 {
      refill.push(bin.allocate(&mut bump).unwrap());
    }
    assert!(refill.contains(&x));
    assert!(refill.contains(&y));
  }

  #[test]
  fn unknown_pointer_is_ignored() {
    let _lock = crate::TEST_LOCK.read().unwrap();
    let (mut bump, mut bin) = bin_for(32);
    let a = bin.allocate(&mut bump).unwrap();

    let foreign = NonNull::new(0x1000 as *mut u8).unwrap();
    bin.deallocate(foreign);

    // Bin state is untouched; the live block still round-trips.
    bin.deallocate(a);
    assert_eq!(bin.allocate(&mut bump).unwrap(), a);
  }

  #[test]
  fn active_slab_never_rests_exhausted() {
    let _lock = crate::TEST_LOCK.read().unwrap();
    let size = 65536;
    let (mut bump, mut bin) = bin_for(size);
    let blocks = CHUNK_SIZE / block_size_of(class_for(size).unwrap());

    for _ in 0..blocks * 2 {
      bin.allocate(&mut bump).unwrap();
    }

    let active = bin.active.unwrap();
    assert!(unsafe { active.as_ref() }.slot().is_full());

    // The exhausted slab is parked on the next allocation, not before.
    bin.allocate(&mut bump).unwrap();
    let active = bin.active.unwrap();
    assert!(!unsafe { active.as_ref() }.slot().is_full());
    assert_eq!(bin.full.len(), 2);
  }
}
