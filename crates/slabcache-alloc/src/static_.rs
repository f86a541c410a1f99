use core::{
  ptr::NonNull,
  sync::atomic::{
    AtomicPtr,
    Ordering,
  },
};

use slabcache_sync::local::ThreadLocal;
use slabcache_sys::chunk;

use crate::{
  arena::Arena,
  stack::ChunkStack,
};

// Every free chunk in the process. Statics never drop, so the stack outlives
// each thread arena whose destructor feeds it.
static CHUNK_STACK: ChunkStack = ChunkStack::new();

pub fn chunk_stack() -> &'static ChunkStack {
  &CHUNK_STACK
}

/// Cached chunk if one is available, otherwise a fresh one from the kernel.
pub fn request_chunk() -> Option<NonNull<u8>> {
  CHUNK_STACK.pop().or_else(chunk::acquire)
}

/// Chunks go back on the stack, never to the kernel. Hot chunks stay
/// resident across thread lifetimes instead of churning through mmap.
pub fn return_chunk(chunk: NonNull<u8>) {
  CHUNK_STACK.push(chunk);
}

struct ThreadArena {
  arena: AtomicPtr<Arena>,
}

impl Drop for ThreadArena {
  fn drop(&mut self) {
    let ptr = self.arena.load(Ordering::Acquire);
    if ptr.is_null() {
      return;
    }

    unsafe { core::ptr::drop_in_place(ptr) };
    self.arena.store(core::ptr::null_mut(), Ordering::Release);
  }
}

// Arena construction can fail under memory pressure; the slot then stays
// null and every request on this thread reports OOM.
static THREAD_ARENA: ThreadLocal<ThreadArena> = ThreadLocal::new(|| ThreadArena {
  arena: AtomicPtr::new(
    Arena::new()
      .map(|arena| arena.as_ptr())
      .unwrap_or(core::ptr::null_mut()),
  ),
});

/// The calling thread's arena, lazily built on first touch and torn down at
/// thread exit (its chunks are pushed to the global stack, not unmapped).
pub fn acquire_this_arena() -> Option<NonNull<Arena>> {
  THREAD_ARENA.with(|slot| NonNull::new(slot.arena.load(Ordering::Acquire)))
}
