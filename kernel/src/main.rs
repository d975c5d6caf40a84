//! Nimbus kernel — generic entry point.
//!
//! The boot crate's assembly entry and `arch_init` have run by the time
//! control arrives here: the MMU is on, RAM is mapped, the shared info
//! page is registered, and the console and store channels are recorded
//! in the context. This end of the handoff prints the summary, places
//! the grant table frames, and idles.
#![cfg_attr(target_arch = "aarch64", no_std)]
#![cfg_attr(target_arch = "aarch64", no_main)]

use nimbus_boot as _;

#[cfg(target_arch = "aarch64")]
use core::panic::PanicInfo;

#[cfg(target_arch = "aarch64")]
use nimbus_kernel::arch::aarch64;
#[cfg(target_arch = "aarch64")]
use nimbus_kernel::boot::BootContext;
#[cfg(target_arch = "aarch64")]
use nimbus_kernel::console_println;
#[cfg(target_arch = "aarch64")]
use nimbus_kernel::fdt::DeviceTree;
#[cfg(target_arch = "aarch64")]
use nimbus_kernel::xen::{self, hypercall::XenCall};

/// Generic kernel entry — called by `arch_init` once bring-up holds.
/// Receives the free-frame range the page-frame allocator will consume
/// and the populated channel parameters.
#[cfg(target_arch = "aarch64")]
#[no_mangle]
pub extern "C" fn start_kernel(ctx: &mut BootContext) -> ! {
    console_println!("Nimbus v0.1.0 — up");
    console_println!(
        "[boot] free frames {:#x}..{:#x}",
        ctx.free_start_pfn,
        ctx.free_end_pfn
    );
    console_println!(
        "[boot] console port {} ring {:#x}",
        ctx.console.evtchn,
        ctx.console.ring
    );
    console_println!(
        "[boot] store port {} page {:#x}",
        ctx.store.evtchn,
        ctx.store.pfn
    );

    // Grant table placement rides on the relocated (or original) blob,
    // so it runs on this side of the handoff.
    let dt = match unsafe { DeviceTree::from_raw(ctx.device_tree) } {
        Ok(dt) => dt,
        Err(e) => panic!("device tree invalid after handoff: {}", e),
    };
    let mut hv = XenCall;
    match xen::handshake::setup_grant_frames(&mut hv, &dt, ctx.phys_offset, xen::NR_GRANT_FRAMES) {
        Ok(va) => console_println!("[xen] grant table at {:#x}", va.as_u64()),
        Err(e) => panic!("grant table setup failed: {}", e),
    }

    console_println!("Nimbus boot complete.");
    aarch64::halt();
}

#[cfg(target_arch = "aarch64")]
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    console_println!("!!! KERNEL PANIC !!!");
    console_println!("{}", info);
    aarch64::halt();
}

/// The kernel only runs on the aarch64 guest target; host builds stop
/// at the library and its unit tests.
#[cfg(not(target_arch = "aarch64"))]
fn main() {}
