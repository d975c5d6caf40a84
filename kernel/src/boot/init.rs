/// Hardware prologue and handoff.
///
/// `arch_init` is the first Rust code to run: the assembly entry calls
/// it with the MMU on, a stack set, and the device tree's physical
/// address and the physical/virtual offset in the argument registers.
/// It performs the irreversible opening steps, runs `prepare_boot`, and
/// transfers control to `start_kernel`. It never returns; any failure
/// panics with the diagnostic and the panic handler halts the guest.
use core::ptr::{addr_of, addr_of_mut};

use crate::console_println;
use crate::fdt::DeviceTree;
use crate::mem::paging::{BootPageTables, FixedWindow};
use crate::mem::{PageTable, PhysAddr, VirtAddr, BLOCK_NORMAL_ATTRS};
use crate::xen::hypercall::XenCall;

use super::{prepare_boot, BootContext, BootPolicy, ImageLayout};

extern "C" {
    // Link-time reservations, owned by the boot crate.
    static mut boot_l1_pgtable: PageTable;
    static mut fixmap_pgtable: PageTable;
    static mut shared_info_page: [u8; 4096];

    // Section symbols from the linker script.
    static _text: u8;
    static _etext: u8;
    static _erodata: u8;
    static _edata: u8;
    static _end: u8;

    // The generic kernel entry point. Does not return.
    fn start_kernel(ctx: &mut BootContext) -> !;
}

/// Initial Rust entry point, called once from the assembly entry.
#[no_mangle]
pub extern "C" fn arch_init(dtb_phys: *const u8, phys_offset: u64) -> ! {
    // Clear the reservations this sequence populates. The entry code
    // zeroed .bss before linking the image mapping, so the live RAM
    // tables must not be touched here; the fixmap table and the shared
    // info page hold nothing yet.
    unsafe {
        addr_of_mut!(fixmap_pgtable).write_bytes(0, 1);
        addr_of_mut!(shared_info_page).write_bytes(0, 1);
    }

    let mut ctx = BootContext::empty();
    ctx.phys_offset = phys_offset;

    let (l1, fixmap) = unsafe {
        (
            &mut *addr_of_mut!(boot_l1_pgtable),
            &mut *addr_of_mut!(fixmap_pgtable),
        )
    };
    let mut tables = BootPageTables::new(l1, fixmap, phys_offset);

    // The blob can sit anywhere in the bank, including below the image
    // mapping the entry code built; reach it through its fixed window.
    let dtb = tables.map_fixed_window(
        FixedWindow::DeviceTree,
        PhysAddr::new(dtb_phys as u64),
        BLOCK_NORMAL_ATTRS,
    );
    console_println!("Nimbus booting, checking device tree at {:#x}...", dtb.as_u64());
    let dt = match unsafe { DeviceTree::from_raw(dtb.as_u64() as *const u8) } {
        Ok(dt) => dt,
        Err(e) => panic!("invalid device tree from hypervisor: {}", e),
    };
    ctx.device_tree = dt.as_ptr();
    ctx.shared_info = unsafe { addr_of_mut!(shared_info_page) } as *mut u8;

    let image = ImageLayout {
        text: image_symbol(unsafe { addr_of!(_text) }),
        etext: image_symbol(unsafe { addr_of!(_etext) }),
        erodata: image_symbol(unsafe { addr_of!(_erodata) }),
        edata: image_symbol(unsafe { addr_of!(_edata) }),
        end: image_symbol(unsafe { addr_of!(_end) }),
    };

    let mut xen = XenCall;
    if let Err(e) = prepare_boot(&mut ctx, &mut tables, &mut xen, &image, &BootPolicy::native()) {
        panic!("boot sequence failed: {}", e);
    }

    unsafe { start_kernel(&mut ctx) }
}

fn image_symbol(sym: *const u8) -> VirtAddr {
    VirtAddr::new(sym as u64)
}
