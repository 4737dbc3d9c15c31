use core::{
    cell::UnsafeCell,
    mem::MaybeUninit,
    sync::atomic::{AtomicU8, Ordering},
};

const EMPTY: u8 = 0;
const WRITING: u8 = 1;
const READY: u8 = 2;

/// A cell initialized exactly once, during boot, and immutable after.
///
/// Unlike a lazy once-cell there is no `get_or_init`: the boot sequencer
/// calls [`init`](Self::init) at a known point, and every later reader
/// either gets the value or has caught a boot-ordering bug. Double
/// initialization panics for the same reason.
pub struct BootCell<T> {
    state: AtomicU8,
    value: UnsafeCell<MaybeUninit<T>>,
}

// Safety: the value is written once before READY is published, then only
// shared references are handed out.
unsafe impl<T: Sync> Sync for BootCell<T> {}
unsafe impl<T: Send> Send for BootCell<T> {}

impl<T> BootCell<T> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(EMPTY),
            value: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }

    /// Store the value. Panics if called twice.
    pub fn init(&self, value: T) {
        if self
            .state
            .compare_exchange(EMPTY, WRITING, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            panic!("BootCell initialized twice");
        }
        unsafe {
            (*self.value.get()).write(value);
        }
        // Publish the write before marking READY.
        self.state.store(READY, Ordering::Release);
    }

    /// `Some(&T)` once initialized, `None` before.
    #[inline]
    pub fn get(&self) -> Option<&T> {
        if self.state.load(Ordering::Acquire) == READY {
            // Safety: READY guarantees the write completed.
            Some(unsafe { (*self.value.get()).assume_init_ref() })
        } else {
            None
        }
    }

    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.state.load(Ordering::Acquire) == READY
    }
}

impl<T> Default for BootCell<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for BootCell<T> {
    fn drop(&mut self) {
        if *self.state.get_mut() == READY {
            // Safety: READY means the value was written and never taken out.
            unsafe { self.value.get_mut().assume_init_drop() };
        }
    }
}
