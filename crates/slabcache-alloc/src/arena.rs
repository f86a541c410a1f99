use core::ptr::NonNull;

use slabcache_fixed::{
  Bump,
  BumpError,
};

use crate::{
  bin::{
    Bin,
    BinError,
  },
  classes::{
    ClassIndex,
    NUM_CLASSES,
    class_for,
  },
  large,
};

#[derive(Debug)]
pub enum ArenaError {
  BumpError(BumpError),
  BinError(BinError),
  OutOfMemory,
}

impl From<BumpError> for ArenaError {
  fn from(err: BumpError) -> Self {
    ArenaError::BumpError(err)
  }
}

impl From<BinError> for ArenaError {
  fn from(err: BinError) -> Self {
    ArenaError::BinError(err)
  }
}

pub type ArenaResult<T> = Result<T, ArenaError>;

// Granularity of the metadata mappings. The largest single object is the
// 16 KiB bitmap of a 16-byte-class slab.
const METADATA_REGION: usize = 64 * 1024;

/// Per-thread allocation state: one bin per size class plus the bump that
/// homes all metadata. An arena is only ever entered by its owning thread;
/// nothing in here is synchronized.
pub struct Arena {
  bins: [Bin; NUM_CLASSES],
  bump: Bump,
}

impl Arena {
  /// The arena hosts itself inside its own metadata bump, so tearing one
  /// down is dropping the bump after the bins have returned their chunks.
  pub fn new() -> ArenaResult<NonNull<Self>> {
    let mut bump = Bump::new(METADATA_REGION);
    let this = bump.create::<Self>()?;

    unsafe {
      let raw = this.as_ptr();
      core::ptr::addr_of_mut!((*raw).bins)
        .write(core::array::from_fn(|i| Bin::new(ClassIndex(i))));
      core::ptr::addr_of_mut!((*raw).bump).write(bump);
    }

    Ok(this)
  }

  /// 16-byte-aligned storage of at least `size` bytes. Size 0 is served from
  /// the smallest class, so the result is a live block distinct from null.
  #[inline(always)]
  pub fn allocate(&mut self, size: usize) -> ArenaResult<NonNull<u8>> {
    match class_for(size) {
      Some(class) => self.bins[class.0]
        .allocate(&mut self.bump)
        .map_err(ArenaError::BinError),
      None => large::allocate(size).ok_or(ArenaError::OutOfMemory),
    }
  }

  /// Returns a block to its slab, or unmaps a large allocation.
  ///
  /// # Safety
  ///
  /// `ptr` must come from `allocate` on **this** arena with a size mapping
  /// to the same class. A pointer allocated by another thread's arena is
  /// silently discarded; a mismatched size is undefined.
  #[inline(always)]
  pub unsafe fn deallocate(&mut self, ptr: NonNull<u8>, size: usize) {
    match class_for(size) {
      Some(class) => self.bins[class.0].deallocate(ptr),
      None => unsafe { large::deallocate(ptr, size) },
    }
  }
}
