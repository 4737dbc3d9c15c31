//! The TLB flush-class decision.
//!
//! A pure function of (old entry, new entry). The trigger set is the
//! minimum correct one: a flush is needed exactly when something a CPU may
//! have cached could now be wrong, because the old translation pointed
//! elsewhere, was more permissive, or had a different global marking. Widening
//! permissions never needs a flush; the CPU refetches on the fault it would
//! otherwise take.

use crate::L2e;

/// Required flush scope for one leaf-entry change.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FlushClass {
    /// Nothing cached can be stale.
    None,
    /// The issuing CPU must invalidate its own TLB.
    Local,
    /// Every CPU on which the address space is resident must invalidate,
    /// including global entries.
    Global,
}

/// Decide the flush scope for replacing `old` with `new`.
#[must_use]
pub fn flush_class(old: L2e, new: L2e) -> FlushClass {
    if !old.present() {
        // Nothing was translatable, so nothing is cached.
        return FlushClass::None;
    }

    let stale = !new.present()
        || new.leaf_base() != old.leaf_base()
        || (old.writable() && !new.writable())
        || (old.user() && !new.user())
        || (!old.no_execute() && new.no_execute())
        || old.global() != new.global();

    if !stale {
        FlushClass::None
    } else if old.global() || new.global() {
        FlushClass::Global
    } else {
        FlushClass::Local
    }
}
