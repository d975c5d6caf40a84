/// Xen hypercall ABI: call numbers, operation codes, request layouts.
///
/// Fixed by the hypervisor; nothing here is negotiable. Request structs
/// are `#[repr(C)]` with the padding spelled out, and their sizes are
/// pinned so a layout drift fails the build instead of the handshake.
use static_assertions::const_assert_eq;

/// Hypercall numbers (x16 on aarch64).
pub mod call {
    pub const MEMORY_OP: u64 = 12;
    pub const CONSOLE_IO: u64 = 18;
    pub const GRANT_TABLE_OP: u64 = 20;
    pub const HVM_OP: u64 = 34;
}

/// HVM boot parameter indices for HVMOP_get_param.
pub mod hvm_param {
    pub const STORE_PFN: u32 = 1;
    pub const STORE_EVTCHN: u32 = 2;
    pub const CONSOLE_EVTCHN: u32 = 16;
    pub const CONSOLE_PFN: u32 = 17;
}

/// CONSOLE_IO sub-operation: write a byte string to the debug console.
pub const CONSOLEIO_WRITE: u32 = 0;

/// MEMORY_OP sub-operation: place a guest frame in a hypervisor-managed
/// physical address space.
pub const XENMEM_ADD_TO_PHYSMAP: u32 = 7;
pub const XENMAPSPACE_SHARED_INFO: u32 = 0;
pub const XENMAPSPACE_GRANT_TABLE: u32 = 1;

/// HVM_OP sub-operation: read one boot parameter.
pub const HVMOP_GET_PARAM: u32 = 1;

/// GRANT_TABLE_OP sub-operation: register the grant frame list.
pub const GNTTABOP_SETUP_TABLE: u32 = 2;

/// Pseudo-domain id meaning "the calling guest".
pub const DOMID_SELF: u16 = 0x7ff0;

/// XENMEM_add_to_physmap request.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct AddToPhysmap {
    pub domid: u16,
    /// Batch size; unused by the single-frame form.
    pub size: u16,
    /// One of the XENMAPSPACE_* spaces.
    pub space: u32,
    /// Index within the space (grant frame number, 0 for shared info).
    pub idx: u64,
    /// Guest frame to place there.
    pub gpfn: u64,
}

/// HVMOP_get_param request/response.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct HvmParam {
    pub domid: u16,
    pub _pad: u16,
    pub index: u32,
    /// Filled in by the hypervisor on success.
    pub value: u64,
}

/// GNTTABOP_setup_table request/response.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct GnttabSetupTable {
    pub dom: u16,
    pub _pad0: u16,
    pub nr_frames: u32,
    /// Zero on success; checked in addition to the hypercall return.
    pub status: i16,
    pub _pad1: [u16; 3],
    /// Guest handle: virtual address of a `[u64; nr_frames]` the
    /// hypervisor fills with machine frame numbers.
    pub frame_list: u64,
}

const_assert_eq!(core::mem::size_of::<AddToPhysmap>(), 24);
const_assert_eq!(core::mem::size_of::<HvmParam>(), 16);
const_assert_eq!(core::mem::size_of::<GnttabSetupTable>(), 24);
