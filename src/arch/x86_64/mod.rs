/*
 * x86_64 Architecture Support Module
 *
 * All architecture-specific code for the CORTEN core lives here. The
 * surface is deliberately small: the interrupt-mask primitive that forms
 * the kernel's only critical-section mechanism, and the register-image
 * context switch that hands the CPU between processes.
 *
 * Submodules:
 * - interrupts: mask/restore primitive and the RAII guard built on it
 * - context: ctxsw, the first-activation trampoline, initial stack frames
 */

pub mod context;
pub mod interrupts;
