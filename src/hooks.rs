//! Host hook registration seam
//!
//! The engine does not trace anything itself; it subscribes to the host
//! runtime's event hooks and is driven through [`Capture::dispatch`].
//! Subscriptions are split into three sets because the switch hook stays
//! installed for the whole running span while call/return and GC hooks
//! are only installed while an interval is being captured, and some
//! hosts refuse to register internal (GC-phase) hooks in the same
//! subscription as user-space call hooks.
//!
//! [`Capture::dispatch`]: crate::capture::Capture::dispatch

/// One hook subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookSet {
    /// Task-switch events. Installed on `start`, removed on `stop`.
    Switch,
    /// Call, return, block and line events. Installed while capturing.
    Calls,
    /// GC-phase events. Installed while capturing, as its own
    /// subscription.
    Gc,
}

/// Adapter to the host runtime's hook registry for the current OS
/// thread. Install and uninstall must tolerate being called redundantly;
/// the engine tracks its own state and will not nest installs of the
/// same set.
pub trait HostHooks {
    fn install(&mut self, set: HookSet);
    fn uninstall(&mut self, set: HookSet);
}

/// No-op hooks for hosts that deliver events directly to the engine
/// without a registration step, and for tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullHooks;

impl HostHooks for NullHooks {
    fn install(&mut self, _set: HookSet) {}

    fn uninstall(&mut self, _set: HookSet) {}
}
