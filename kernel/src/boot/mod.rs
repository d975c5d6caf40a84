/// The boot sequencer.
///
/// One linear pass, no branching back: discover memory from the device
/// tree, cover it with page tables, validate the image placement,
/// compute the free-frame range, then run the hypervisor handshake.
/// Everything the rest of the kernel needs from bring-up lands in one
/// `BootContext` threaded by reference; the only process-wide state left
/// is the link-time storage in the boot crate.
///
/// `prepare_boot` is the testable core of the sequence. The hardware
/// prologue around it (zeroing reservations, recording the offset,
/// mapping the blob, the final handoff) lives in `init`.
use core::fmt;

use crate::console_println;
use crate::fdt::{self, DeviceTree, FdtError};
use crate::mem::paging::{BootPageTables, MapError};
use crate::mem::{
    pfn_down, pfn_to_phys, pfn_up, phys_to_pfn, PhysAddr, VirtAddr, PAGE_MASK, PAGE_SHIFT,
};
use crate::xen::handshake::{self, ConsoleChannel, HandshakeError, StoreChannel};
use crate::xen::hypercall::Hypervisor;

#[cfg(target_arch = "aarch64")]
pub mod init;

#[cfg(test)]
mod tests;

/// Everything bring-up establishes, handed to the generic kernel entry.
#[repr(C)]
pub struct BootContext {
    /// physical = virtual + phys_offset, recorded once and never
    /// changed.
    pub phys_offset: u64,
    /// The live device tree pointer; moves if the blob is relocated.
    pub device_tree: *const u8,
    /// The registered shared info page.
    pub shared_info: *mut u8,
    pub console: ConsoleChannel,
    pub store: StoreChannel,
    /// First frame available to the page-frame allocator.
    pub free_start_pfn: u64,
    /// One past the last available frame.
    pub free_end_pfn: u64,
}

impl BootContext {
    pub const fn empty() -> Self {
        Self {
            phys_offset: 0,
            device_tree: core::ptr::null(),
            shared_info: core::ptr::null_mut(),
            console: ConsoleChannel { evtchn: 0, ring: 0 },
            store: StoreChannel { evtchn: 0, pfn: 0 },
            free_start_pfn: 0,
            free_end_pfn: 0,
        }
    }
}

/// Behaviors that differ between the 64-bit and 32-bit guest ABIs,
/// selected once so both paths stay testable on the host.
#[derive(Debug, Clone, Copy)]
pub struct BootPolicy {
    /// The hypervisor hands the console ring as a raw physical frame
    /// that must be mapped through the fixed window.
    pub map_console_window: bool,
    /// The device tree sits in memory about to become allocator
    /// territory and must be moved to the top of RAM.
    pub relocate_device_tree: bool,
}

impl BootPolicy {
    pub const fn native() -> Self {
        if cfg!(target_arch = "arm") {
            Self {
                map_console_window: false,
                relocate_device_tree: true,
            }
        } else {
            Self {
                map_console_window: true,
                relocate_device_tree: false,
            }
        }
    }
}

/// Link-time section addresses of the kernel image.
#[derive(Debug, Clone, Copy)]
pub struct ImageLayout {
    pub text: VirtAddr,
    pub etext: VirtAddr,
    pub erodata: VirtAddr,
    pub edata: VirtAddr,
    pub end: VirtAddr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootError {
    /// The device tree failed validation.
    Blob(FdtError),
    /// No node with device_type = "memory".
    NoMemoryNode,
    /// The memory node's `reg` is missing or shorter than one
    /// (address, size) pair.
    BadRegProperty { len: usize },
    /// Page-table capacity exceeded.
    Map(MapError),
    /// The kernel image lies outside the discovered memory bank.
    ImageOutsideBank { image_start: u64, image_end: u64 },
    Handshake(HandshakeError),
}

impl fmt::Display for BootError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BootError::Blob(e) => write!(f, "invalid device tree: {}", e),
            BootError::NoMemoryNode => write!(f, "no memory node in device tree"),
            BootError::BadRegProperty { len } => {
                write!(f, "bad 'reg' property: len {}", len)
            }
            BootError::Map(e) => write!(f, "page table construction failed: {}", e),
            BootError::ImageOutsideBank {
                image_start,
                image_end,
            } => write!(
                f,
                "kernel image {:#x}..{:#x} outside memory bank",
                image_start, image_end
            ),
            BootError::Handshake(e) => write!(f, "hypervisor handshake failed: {}", e),
        }
    }
}

impl From<FdtError> for BootError {
    fn from(e: FdtError) -> Self {
        BootError::Blob(e)
    }
}

impl From<MapError> for BootError {
    fn from(e: MapError) -> Self {
        BootError::Map(e)
    }
}

impl From<HandshakeError> for BootError {
    fn from(e: HandshakeError) -> Self {
        BootError::Handshake(e)
    }
}

/// Discover memory, build the page tables, compute the free-frame
/// range, and run the handshake. On success the context holds
/// everything the generic kernel needs; on error the caller halts the
/// guest — later subsystems depend on these invariants holding exactly,
/// so there is nothing to recover to.
///
/// Expects `ctx.phys_offset`, `ctx.device_tree` (validated), and
/// `ctx.shared_info` to be set by the prologue.
pub fn prepare_boot(
    ctx: &mut BootContext,
    tables: &mut BootPageTables<'_>,
    xen: &mut dyn Hypervisor,
    image: &ImageLayout,
    policy: &BootPolicy,
) -> Result<(), BootError> {
    // The blob was validated when it was mapped; re-derive the view from
    // the live pointer so discovery and the relocation below agree on
    // it.
    let dt = unsafe { DeviceTree::from_raw(ctx.device_tree) }?;

    console_println!("    _text: {:#x}(VA)", image.text.as_u64());
    console_println!("    _etext: {:#x}(VA)", image.etext.as_u64());
    console_println!("    _erodata: {:#x}(VA)", image.erodata.as_u64());
    console_println!("    _edata: {:#x}(VA)", image.edata.as_u64());
    console_println!("    _end: {:#x}(VA)", image.end.as_u64());

    // Regions beyond the first bank are ignored, not honored; say so and
    // continue.
    if dt.num_reserved_regions() != 0 {
        console_println!("[mem] WARNING: reserved memory not supported");
    }

    // The hypervisor always provides at least one bank; only the first
    // is used.
    let memory = dt
        .node_by_prop_value("device_type", b"memory\0")
        .ok_or(BootError::NoMemoryNode)?;
    let reg = dt
        .property(memory, "reg")
        .ok_or(BootError::BadRegProperty { len: 0 })?;
    let (mem_base, mem_size) =
        fdt::reg_pair(reg).ok_or(BootError::BadRegProperty { len: reg.len() })?;
    console_println!("[mem] found memory at {:#x} (len {:#x})", mem_base, mem_size);

    tables.build_pagetable(phys_to_pfn(PhysAddr::new(mem_base)), pfn_down(mem_size))?;

    let bank_start = PhysAddr::new(mem_base).to_virt(ctx.phys_offset);
    let bank_end = PhysAddr::new(mem_base + mem_size).to_virt(ctx.phys_offset);
    if image.text < bank_start || image.end > bank_end {
        return Err(BootError::ImageOutsideBank {
            image_start: image.text.as_u64(),
            image_end: image.end.as_u64(),
        });
    }

    let first = pfn_up(image.end.to_phys(ctx.phys_offset).as_u64());
    let heap_len = mem_size - (pfn_to_phys(first).as_u64() - mem_base);
    let mut last = first + pfn_down(heap_len);

    if policy.relocate_device_tree {
        // The blob sits in memory about to be handed to the page-frame
        // allocator; move it to the top of RAM and keep that span out of
        // the reported range.
        let total = dt.total_size() as u64;
        let dest_phys = ((last << PAGE_SHIFT) - total) & PAGE_MASK;
        let dest = PhysAddr::new(dest_phys).to_virt(ctx.phys_offset).as_u64() as *mut u8;
        if dest as *const u8 != ctx.device_tree {
            unsafe { core::ptr::copy(ctx.device_tree, dest, total as usize) };
        }
        let moved = unsafe { DeviceTree::from_raw(dest) }?;
        ctx.device_tree = moved.as_ptr();
        last = phys_to_pfn(PhysAddr::new(dest_phys));
    }

    ctx.free_start_pfn = first;
    ctx.free_end_pfn = last;
    console_println!("[mem] using pages {} to {} as free space", first, last);

    let shared_gpfn = phys_to_pfn(VirtAddr::new(ctx.shared_info as u64).to_phys(ctx.phys_offset));
    handshake::register_shared_info(xen, shared_gpfn)?;

    ctx.console = handshake::acquire_console(xen, tables, policy.map_console_window)?;
    ctx.store = handshake::acquire_store(xen)?;

    Ok(())
}
