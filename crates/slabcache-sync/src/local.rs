use core::marker::PhantomData;

use slabcache_fixed::Bump;
use spin::Mutex;

use crate::lazy::LazyLock;

// Per-thread slots are carved from this shared bump; they are reclaimed only
// at process exit. One slot per (key, thread) pair, so growth is bounded by
// thread churn.
static TLS_BUMP: Mutex<Bump> = Mutex::new(Bump::new(16 * 1024));

/// Thread-local slot with an at-thread-exit destructor, built on pthread
/// keys. `std::thread_local!` registers destructors through the host runtime
/// which may itself allocate; this one stays inside the crate's own arena.
pub struct ThreadLocal<T, F = fn() -> T> {
  key: LazyLock<libc::pthread_key_t>,
  init: F,
  _marker: PhantomData<T>,
}

unsafe extern "C" fn tls_dtor<T>(ptr: *mut libc::c_void) {
  if ptr.is_null() {
    return;
  }

  unsafe { core::ptr::drop_in_place(ptr as *mut T) };
}

fn obtain_key<T>() -> libc::pthread_key_t {
  let mut key: libc::pthread_key_t = 0;
  let ret = unsafe { libc::pthread_key_create(&mut key, Some(tls_dtor::<T>)) };
  if ret != 0 {
    panic!("failed to create pthread key: {}", ret);
  }
  key
}

impl<T, F> ThreadLocal<T, F>
where
  F: Fn() -> T,
{
  pub const fn new(init: F) -> Self {
    Self {
      key: LazyLock::new(|| obtain_key::<T>()),
      init,
      _marker: PhantomData,
    }
  }

  fn get_or_init(&self) -> *mut T {
    let key = *self.key;
    let ptr = unsafe { libc::pthread_getspecific(key) } as *mut T;
    if !ptr.is_null() {
      return ptr;
    }

    let slot = TLS_BUMP
      .lock()
      .create::<T>()
      .unwrap_or_else(|_| panic!("thread-local slot allocation failed"))
      .as_ptr();

    unsafe { slot.write((self.init)()) };
    let ret = unsafe { libc::pthread_setspecific(key, slot.cast()) };
    if ret != 0 {
      panic!("pthread_setspecific failed: {}", ret);
    }
    slot
  }

  pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
    let ptr = self.get_or_init();
    f(unsafe { &mut *ptr })
  }
}

impl<T, F> Drop for ThreadLocal<T, F> {
  fn drop(&mut self) {
    let _ = unsafe { libc::pthread_key_delete(*self.key) };
  }
}

unsafe impl<T, F> Send for ThreadLocal<T, F> {}
unsafe impl<T, F> Sync for ThreadLocal<T, F> {}
