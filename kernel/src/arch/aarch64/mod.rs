/// aarch64 architecture support.
///
/// Barrier and wait intrinsics used by the boot page-table code. On
/// other targets (host-side unit tests) these compile to no-ops: the
/// tests exercise the table-construction logic, and there is no
/// translation walker to order against.

/// Data synchronization barrier, inner-shareable, stores only.
///
/// Paired with `isb` after every translation-table entry write.
#[inline(always)]
pub fn dsb_ishst() {
    #[cfg(target_arch = "aarch64")]
    unsafe {
        core::arch::asm!("dsb ishst", options(nostack, preserves_flags));
    }
}

/// Instruction synchronization barrier.
#[inline(always)]
pub fn isb() {
    #[cfg(target_arch = "aarch64")]
    unsafe {
        core::arch::asm!("isb", options(nostack, preserves_flags));
    }
}

/// Wait for an event.
#[inline(always)]
pub fn wfe() {
    #[cfg(target_arch = "aarch64")]
    unsafe {
        core::arch::asm!("wfe", options(nostack, preserves_flags));
    }
}

/// Park the CPU. No interrupts are ever enabled, so nothing wakes us
/// for long; this is the terminal idle and the panic fallout.
pub fn halt() -> ! {
    loop {
        wfe();
    }
}
