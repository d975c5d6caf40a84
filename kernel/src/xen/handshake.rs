/// The fixed hypervisor handshake.
///
/// Four acquisitions, in the order the boot sequencer runs them:
/// register the shared info page, read the console parameters, read the
/// xenstore parameters, and (after handoff) place the grant table
/// frames. Every operation either succeeds or the guest cannot safely
/// continue; errors carry the failing status for the halt diagnostic
/// and are never retried.
use core::fmt;

use crate::console_println;
use crate::fdt::{self, DeviceTree};
use crate::mem::paging::{BootPageTables, FixedWindow};
use crate::mem::{pfn_to_phys, phys_to_pfn, PhysAddr, VirtAddr, BLOCK_DEVICE_ATTRS};

use super::abi::{
    self, AddToPhysmap, GnttabSetupTable, HvmParam, DOMID_SELF, GNTTABOP_SETUP_TABLE,
    HVMOP_GET_PARAM, XENMAPSPACE_GRANT_TABLE, XENMAPSPACE_SHARED_INFO, XENMEM_ADD_TO_PHYSMAP,
};
use super::hypercall::Hypervisor;

/// Grant frames registered at boot.
pub const NR_GRANT_FRAMES: u32 = 4;

/// Upper bound on the frame list placed on the stack for
/// GNTTABOP_setup_table.
const MAX_GRANT_FRAMES: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeError {
    /// HVMOP_get_param returned a negative status.
    ParameterFailed { index: u32, status: i64 },
    /// XENMEM_add_to_physmap returned a nonzero status.
    PhysmapFailed { space: u32, idx: u64, status: i64 },
    /// GNTTABOP_setup_table failed, via return value or status field.
    GrantSetupFailed { status: i64 },
    /// No node compatible with "xen,xen" in the device tree.
    NoHypervisorNode,
    /// The hypervisor node's `reg` is missing or shorter than one
    /// (address, size) pair.
    BadGrantProperty { len: usize },
    /// More frames requested than the boot-time list holds.
    TooManyGrantFrames { requested: u32 },
}

impl fmt::Display for HandshakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandshakeError::ParameterFailed { index, status } => {
                write!(f, "hvm parameter {} failed with {}", index, status)
            }
            HandshakeError::PhysmapFailed { space, idx, status } => {
                write!(
                    f,
                    "add_to_physmap space {} idx {} failed with {}",
                    space, idx, status
                )
            }
            HandshakeError::GrantSetupFailed { status } => {
                write!(f, "grant table setup failed with {}", status)
            }
            HandshakeError::NoHypervisorNode => {
                write!(f, "no xen,xen node in device tree")
            }
            HandshakeError::BadGrantProperty { len } => {
                write!(f, "bad grant table 'reg' property: len {}", len)
            }
            HandshakeError::TooManyGrantFrames { requested } => {
                write!(
                    f,
                    "{} grant frames requested, {} supported",
                    requested, MAX_GRANT_FRAMES
                )
            }
        }
    }
}

/// Console ring channel as handed to the generic kernel: event channel
/// plus the ring location (a mapped virtual address when the fixed
/// window is in use, otherwise the raw frame number).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleChannel {
    pub evtchn: u32,
    pub ring: u64,
}

/// Xenstore channel: event channel plus the store page frame.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct StoreChannel {
    pub evtchn: u32,
    pub pfn: u64,
}

/// Read one boot parameter. A negative status is fatal to the caller;
/// there is no retry, since a failed handshake means the guest cannot
/// safely proceed.
pub fn get_boot_parameter(xen: &mut dyn Hypervisor, index: u32) -> Result<u64, HandshakeError> {
    let mut req = HvmParam {
        domid: DOMID_SELF,
        _pad: 0,
        index,
        value: 0,
    };
    let status = xen.hvm_op(HVMOP_GET_PARAM, &mut req);
    if status < 0 {
        return Err(HandshakeError::ParameterFailed { index, status });
    }
    Ok(req.value)
}

/// Place the statically-reserved shared info page at the hypervisor's
/// slot for it.
pub fn register_shared_info(xen: &mut dyn Hypervisor, gpfn: u64) -> Result<(), HandshakeError> {
    let mut req = AddToPhysmap {
        domid: DOMID_SELF,
        size: 0,
        space: XENMAPSPACE_SHARED_INFO,
        idx: 0,
        gpfn,
    };
    let status = xen.memory_op(XENMEM_ADD_TO_PHYSMAP, &mut req);
    if status != 0 {
        return Err(HandshakeError::PhysmapFailed {
            space: XENMAPSPACE_SHARED_INFO,
            idx: 0,
            status,
        });
    }
    Ok(())
}

/// Retrieve the console event channel and ring location. With
/// `map_window` set the hypervisor hands a raw physical frame and the
/// ring is mapped through the console fixed window before the address
/// is recorded.
pub fn acquire_console(
    xen: &mut dyn Hypervisor,
    tables: &mut BootPageTables<'_>,
    map_window: bool,
) -> Result<ConsoleChannel, HandshakeError> {
    let evtchn = get_boot_parameter(xen, abi::hvm_param::CONSOLE_EVTCHN)? as u32;
    let mfn = get_boot_parameter(xen, abi::hvm_param::CONSOLE_PFN)?;

    let ring = if map_window {
        let phys = pfn_to_phys(mfn);
        console_println!("[xen] mapping console ring, phys = {:#x}", phys.as_u64());
        tables
            .map_fixed_window(FixedWindow::Console, phys, BLOCK_DEVICE_ATTRS)
            .as_u64()
    } else {
        mfn
    };

    console_println!("[xen] console is on port {}", evtchn);
    console_println!("[xen] console ring at {:#x}", ring);
    Ok(ConsoleChannel { evtchn, ring })
}

/// Retrieve the xenstore event channel and page frame.
pub fn acquire_store(xen: &mut dyn Hypervisor) -> Result<StoreChannel, HandshakeError> {
    let evtchn = get_boot_parameter(xen, abi::hvm_param::STORE_EVTCHN)? as u32;
    let pfn = get_boot_parameter(xen, abi::hvm_param::STORE_PFN)?;
    Ok(StoreChannel { evtchn, pfn })
}

/// Place the grant table at the physical base the hypervisor advertises
/// in its device-tree node, one frame at a time, then register the
/// frame list. Returns the table's virtual address under the fixed
/// offset.
pub fn setup_grant_frames(
    xen: &mut dyn Hypervisor,
    dt: &DeviceTree<'_>,
    phys_offset: u64,
    nr_frames: u32,
) -> Result<VirtAddr, HandshakeError> {
    if nr_frames as usize > MAX_GRANT_FRAMES {
        return Err(HandshakeError::TooManyGrantFrames {
            requested: nr_frames,
        });
    }

    let node = dt
        .node_by_compatible("xen,xen")
        .ok_or(HandshakeError::NoHypervisorNode)?;
    let reg = dt
        .property(node, "reg")
        .ok_or(HandshakeError::BadGrantProperty { len: 0 })?;
    let (gnttab_base, _) =
        fdt::reg_pair(reg).ok_or(HandshakeError::BadGrantProperty { len: reg.len() })?;

    console_println!("[xen] suggested grant table base {:#x}", gnttab_base);

    let base_pfn = phys_to_pfn(PhysAddr::new(gnttab_base));
    for i in 0..nr_frames as u64 {
        let mut req = AddToPhysmap {
            domid: DOMID_SELF,
            size: 0,
            space: XENMAPSPACE_GRANT_TABLE,
            idx: i,
            gpfn: base_pfn + i,
        };
        let status = xen.memory_op(XENMEM_ADD_TO_PHYSMAP, &mut req);
        if status != 0 {
            return Err(HandshakeError::PhysmapFailed {
                space: XENMAPSPACE_GRANT_TABLE,
                idx: i,
                status,
            });
        }
    }

    // The hypervisor fills the list with machine frame numbers.
    let mut frames = [0u64; MAX_GRANT_FRAMES];
    let mut setup = GnttabSetupTable {
        dom: DOMID_SELF,
        _pad0: 0,
        nr_frames,
        status: 0,
        _pad1: [0; 3],
        frame_list: frames.as_mut_ptr() as u64,
    };
    let status = xen.grant_table_op(GNTTABOP_SETUP_TABLE, &mut setup, 1);
    if status < 0 {
        return Err(HandshakeError::GrantSetupFailed { status });
    }
    if setup.status != 0 {
        return Err(HandshakeError::GrantSetupFailed {
            status: setup.status as i64,
        });
    }

    Ok(PhysAddr::new(gnttab_base).to_virt(phys_offset))
}
