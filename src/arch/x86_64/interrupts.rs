/*
 * Interrupt Masking Primitive
 *
 * The kernel is uniprocessor and non-reentrant: masking interrupts is its
 * only mutual-exclusion mechanism. Every state-mutating primitive runs
 * between a disable()/restore() pair, normally through the IrqGuard RAII
 * wrapper so the prior state is restored on every exit path.
 *
 * Calls nest: disable() hands back the previous mask state as an opaque
 * token and restore() reinstates exactly that state, so an inner critical
 * section never unmasks an outer one.
 *
 * On bare-metal builds (target_os = "none") the mask is the real RFLAGS
 * interrupt bit, driven through the x86_64 crate. On hosted builds the
 * mask is a simulated flag with identical token semantics; the tick source
 * is then a test harness calling in synchronously, so nothing can actually
 * interrupt, but the state machine sees the same protocol.
 */

/// Opaque prior-mask token returned by `disable`.
#[derive(Debug, Clone, Copy)]
pub struct IntrMask {
    enabled: bool,
}

#[cfg(target_os = "none")]
mod flag {
    use x86_64::instructions::interrupts;

    pub fn read() -> bool {
        interrupts::are_enabled()
    }

    pub fn write(enabled: bool) {
        if enabled {
            interrupts::enable();
        } else {
            interrupts::disable();
        }
    }
}

#[cfg(not(target_os = "none"))]
mod flag {
    use core::sync::atomic::{AtomicBool, Ordering};

    static ENABLED: AtomicBool = AtomicBool::new(true);

    pub fn read() -> bool {
        ENABLED.load(Ordering::SeqCst)
    }

    pub fn write(enabled: bool) {
        ENABLED.store(enabled, Ordering::SeqCst);
    }
}

/// Mask interrupts and return the prior state for a later `restore`.
pub fn disable() -> IntrMask {
    let enabled = flag::read();
    flag::write(false);
    IntrMask { enabled }
}

/// Reinstate the mask state captured by a matching `disable`.
pub fn restore(mask: IntrMask) {
    flag::write(mask.enabled);
}

/// Unconditionally unmask interrupts. Used once per process, when its
/// first activation leaves the launch trampoline.
pub fn enable() {
    flag::write(true);
}

/// Check whether interrupts are currently unmasked.
pub fn are_enabled() -> bool {
    flag::read()
}

/// RAII guard that masks interrupts for its lifetime.
///
/// The prior state is captured at construction and reinstated on drop,
/// so early returns and error paths cannot leak a masked CPU.
pub struct IrqGuard {
    prior: IntrMask,
}

impl IrqGuard {
    pub fn new() -> Self {
        Self { prior: disable() }
    }
}

impl Default for IrqGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for IrqGuard {
    fn drop(&mut self) {
        restore(self.prior);
    }
}
