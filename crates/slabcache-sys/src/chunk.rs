use core::{
  ptr::NonNull,
  sync::atomic::{
    AtomicBool,
    Ordering,
  },
};

use crate::math::align_up;

pub const CHUNK_SHIFT: usize = 21;
/// 2 MiB, one typical large page. Every slab is backed by exactly one chunk.
pub const CHUNK_SIZE: usize = 1 << CHUNK_SHIFT;
/// Clearing the low `CHUNK_SHIFT` bits of any interior pointer recovers the
/// chunk base. Only valid because `acquire` returns chunk-aligned memory.
pub const CHUNK_MASK: usize = !(CHUNK_SIZE - 1);

static MEMORY_LOCKED: AtomicBool = AtomicBool::new(false);

#[inline(always)]
pub const fn chunk_base(addr: usize) -> usize {
  addr & CHUNK_MASK
}

/// Maps one chunk, aligned to `CHUNK_SIZE`. With the `hugepages` feature the
/// mapping is first attempted with large-page backing and falls back to
/// ordinary pages. Returns `None` when the kernel refuses both.
pub fn acquire() -> Option<NonNull<u8>> {
  #[cfg(all(feature = "hugepages", target_os = "linux"))]
  if let Some(chunk) = acquire_huge() {
    return Some(chunk);
  }

  acquire_aligned()
}

#[cfg(all(feature = "hugepages", target_os = "linux"))]
fn acquire_huge() -> Option<NonNull<u8>> {
  let ptr = unsafe {
    libc::mmap(
      core::ptr::null_mut(),
      CHUNK_SIZE,
      libc::PROT_READ | libc::PROT_WRITE,
      libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_HUGETLB | libc::MAP_POPULATE,
      -1,
      0,
    )
  };
  if ptr == libc::MAP_FAILED {
    return None;
  }

  NonNull::new(ptr as *mut u8)
}

#[cfg(any(target_os = "linux", target_os = "macos"))]
fn acquire_aligned() -> Option<NonNull<u8>> {
  // Hugetlb mappings are naturally chunk-aligned; ordinary ones are only
  // page-aligned, so over-map one extra chunk and trim both ends.
  let span = CHUNK_SIZE * 2;
  let raw = unsafe {
    libc::mmap(
      core::ptr::null_mut(),
      span,
      libc::PROT_READ | libc::PROT_WRITE,
      libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
      -1,
      0,
    )
  };
  if raw == libc::MAP_FAILED {
    return None;
  }

  let addr = raw as usize;
  let base = align_up(addr, CHUNK_SIZE)?;
  let lead = base - addr;
  let tail = span - lead - CHUNK_SIZE;

  unsafe {
    if lead > 0 {
      libc::munmap(raw, lead);
    }
    if tail > 0 {
      libc::munmap((base + CHUNK_SIZE) as *mut libc::c_void, tail);
    }
    libc::madvise(base as *mut libc::c_void, CHUNK_SIZE, libc::MADV_WILLNEED);
  }

  NonNull::new(base as *mut u8)
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
fn acquire_aligned() -> Option<NonNull<u8>> {
  None
}

/// Unmaps one chunk previously returned by `acquire`.
///
/// # Safety
///
/// `chunk` must come from `acquire` and must not be referenced afterwards.
pub unsafe fn release(chunk: NonNull<u8>) {
  #[cfg(any(target_os = "linux", target_os = "macos"))]
  unsafe {
    libc::munmap(chunk.as_ptr() as *mut libc::c_void, CHUNK_SIZE);
  }
  #[cfg(not(any(target_os = "linux", target_os = "macos")))]
  {
    let _ = chunk;
  }
}

/// Pins current and future pages in RAM to suppress major faults.
/// Idempotent; success is recorded process-wide.
pub fn lock_memory() -> bool {
  if MEMORY_LOCKED.load(Ordering::Relaxed) {
    return true;
  }

  #[cfg(target_os = "linux")]
  {
    let result = unsafe { libc::mlockall(libc::MCL_CURRENT | libc::MCL_FUTURE) };
    if result == 0 {
      MEMORY_LOCKED.store(true, Ordering::Relaxed);
      return true;
    }
  }

  false
}

pub fn is_memory_locked() -> bool {
  MEMORY_LOCKED.load(Ordering::Relaxed)
}
