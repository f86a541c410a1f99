use core::ptr::NonNull;

use slabcache_sys::{
  GLOBAL_SYSTEM,
  prim::page_align,
};

/// Requests above the largest size class get a dedicated private anonymous
/// mapping. No arena or slab state is touched on this path.
pub fn allocate(size: usize) -> Option<NonNull<u8>> {
  let size = page_align(size).ok()?;
  let slice = unsafe { GLOBAL_SYSTEM.alloc(size) }.ok()?;
  NonNull::new(slice.as_mut_ptr())
}

/// Releases a mapping obtained from `allocate`.
///
/// # Safety
///
/// `ptr` must come from `allocate` called with the same `size`, and must not
/// be used afterwards.
pub unsafe fn deallocate(ptr: NonNull<u8>, size: usize) {
  let Ok(size) = page_align(size) else {
    return;
  };

  let slice = unsafe { core::slice::from_raw_parts(ptr.as_ptr(), size) };
  let _ = unsafe { GLOBAL_SYSTEM.dealloc(slice) };
}
