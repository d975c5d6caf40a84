//! Start-of-day for a Xen guest on aarch64.
//!
//! Xen enters `_start` with the physical address of the flattened device
//! tree in `x0` and the MMU off. This crate:
//! 1. records the physical/virtual offset (where we run vs. where we were
//!    linked),
//! 2. zeroes `.bss`,
//! 3. links the pre-reserved second-level table under the image's 1 GiB
//!    stride and block-maps enough of the image to run,
//! 4. programs MAIR/TCR/TTBR0 and turns the MMU on,
//! 5. sets the boot stack and tails into the kernel's `arch_init`.
//!
//! It also owns the link-time storage the kernel declares `extern "C"`:
//! the three boot page tables, the identity-map table used across the
//! MMU switch, the shared-info page, and the boot stack.
#![no_std]

#[cfg(target_arch = "aarch64")]
mod start {
    /// One level of LPAE translation table: 512 eight-byte descriptors.
    #[repr(C, align(4096))]
    pub struct PageTableStorage(pub [u64; 512]);

    /// Boot stack: 16 pages, grows down from `boot_stack + STACK_SIZE`.
    pub const STACK_SIZE: usize = 16 * 4096;

    // Storage reservations. All live in .bss; the entry code zeroes .bss
    // before any of them is read, so every descriptor starts invalid.
    #[no_mangle]
    #[allow(non_upper_case_globals)]
    pub static mut boot_l1_pgtable: PageTableStorage = PageTableStorage([0; 512]);

    #[no_mangle]
    #[allow(non_upper_case_globals)]
    pub static mut boot_l2_pgtable: PageTableStorage = PageTableStorage([0; 512]);

    #[no_mangle]
    #[allow(non_upper_case_globals)]
    pub static mut fixmap_pgtable: PageTableStorage = PageTableStorage([0; 512]);

    /// Identity map of the stride the entry code executes from, live only
    /// across the MMU switch when the load address differs from the link
    /// address.
    #[no_mangle]
    #[allow(non_upper_case_globals)]
    pub static mut idmap_pgtable: PageTableStorage = PageTableStorage([0; 512]);

    /// Shared page for communicating with the hypervisor; registered via
    /// XENMEM_add_to_physmap during the handshake.
    #[no_mangle]
    #[allow(non_upper_case_globals)]
    pub static mut shared_info_page: [u8; 4096] = [0; 4096];

    #[no_mangle]
    #[allow(non_upper_case_globals)]
    pub static mut boot_stack: [u8; STACK_SIZE] = [0; STACK_SIZE];

    // 0x705: valid block, AttrIndx=1 (normal write-back), inner-shareable,
    // access flag set. Must match BLOCK_NORMAL_ATTRS in the kernel's lpae
    // module.
    core::arch::global_asm!(
        r#"
        .section ".text.boot", "ax"
        .globl _start
        .type _start, @function
_start:
        mov     x21, x0                 // DTB physical address (Xen boot protocol)

        adrp    x0, _start
        ldr     x1, =_start
        sub     x22, x0, x1             // physical/virtual offset

        // Zero .bss. The page tables live there and every descriptor must
        // read as invalid before the first entry is written.
        ldr     x0, =__bss_start
        add     x0, x0, x22
        ldr     x1, =_end
        add     x1, x1, x22
0:      cmp     x0, x1
        b.hs    1f
        str     xzr, [x0], #8
        b       0b
1:
        // Link the pre-reserved RAM second-level table under the image's
        // 1 GiB stride. build_pagetable requires this link to exist.
        ldr     x0, =boot_l1_pgtable
        add     x0, x0, x22
        ldr     x1, =boot_l2_pgtable
        add     x1, x1, x22
        ldr     x2, =_start
        lsr     x3, x2, #30
        and     x3, x3, #0x1ff
        orr     x4, x1, #0x3            // table descriptor
        str     x4, [x0, x3, lsl #3]

        // Block-map 64 MiB from the image base so the kernel can run
        // until build_pagetable covers the whole bank.
        add     x5, x2, x22
        and     x5, x5, #0xffffffffffe00000
        lsr     x6, x2, #21
        and     x6, x6, #0x1ff
        mov     x7, #32
        ldr     x8, =0x705
2:      orr     x9, x5, x8
        str     x9, [x1, x6, lsl #3]
        add     x5, x5, #(1 << 21)
        add     x6, x6, #1
        subs    x7, x7, #1
        b.ne    2b

        // Identity-map the stride we execute from, for the instruction
        // fetches between turning the MMU on and reaching the link-time
        // address. Unnecessary when loaded at the link address.
        cbz     x22, 3f
        adrp    x0, _start
        ldr     x1, =boot_l1_pgtable
        add     x1, x1, x22
        ldr     x2, =idmap_pgtable
        add     x2, x2, x22
        lsr     x3, x0, #30
        and     x3, x3, #0x1ff
        orr     x4, x2, #0x3
        str     x4, [x1, x3, lsl #3]
        lsr     x5, x0, #21
        and     x5, x5, #0x1ff
        and     x6, x0, #0xffffffffffe00000
        ldr     x8, =0x705
        orr     x6, x6, x8
        str     x6, [x2, x5, lsl #3]
3:
        // MAIR: idx0 = device-nGnRnE (0x00), idx1 = normal write-back (0xff).
        mov     x0, #0xff00
        msr     mair_el1, x0
        // TCR: T0SZ=25 (39-bit VA, walks start at level 1), 4K granule,
        // write-back write-allocate, inner-shareable, TTBR1 walks off,
        // 40-bit IPA.
        ldr     x0, =0x200803519
        msr     tcr_el1, x0
        ldr     x0, =boot_l1_pgtable
        add     x0, x0, x22
        msr     ttbr0_el1, x0

        dsb     ish
        isb
        tlbi    vmalle1
        dsb     ish
        isb

        mrs     x0, sctlr_el1
        orr     x0, x0, #(1 << 0)       // M: MMU on
        orr     x0, x0, #(1 << 2)       // C: data cache
        orr     x0, x0, #(1 << 12)      // I: instruction cache
        msr     sctlr_el1, x0
        isb

        // Continue at the link-time address.
        ldr     x0, =4f
        br      x0
4:
        ldr     x0, =boot_stack
        add     x0, x0, {stack_size}
        mov     sp, x0

        mov     x0, x21                 // DTB physical address
        mov     x1, x22                 // physical/virtual offset
        bl      arch_init

        // arch_init hands off to start_kernel and never returns.
5:      wfe
        b       5b
        .size _start, . - _start
        "#,
        stack_size = const STACK_SIZE,
    );
}
