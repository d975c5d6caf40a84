pub mod lpae;
pub mod paging;

pub use lpae::{BlockAttrs, LpaeEntry, PageTable, BLOCK_DEVICE_ATTRS, BLOCK_NORMAL_ATTRS};
pub use paging::{BootPageTables, FixedWindow, MapError};


use core::fmt;

pub const PAGE_SHIFT: u64 = 12;
pub const PAGE_SIZE: u64 = 1 << PAGE_SHIFT;
pub const PAGE_MASK: u64 = !(PAGE_SIZE - 1);

/// A physical address. Transparent wrapper for clarity.
///
/// Physical and virtual addresses are related by a single process-wide
/// offset recorded once at bring-up: phys = virt + offset. The offset is
/// a field of `BootContext`, not a global, and is passed explicitly.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(transparent)]
pub struct PhysAddr(pub u64);

impl PhysAddr {
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Virtual address of this physical address under the given offset.
    pub const fn to_virt(self, phys_offset: u64) -> VirtAddr {
        VirtAddr(self.0.wrapping_sub(phys_offset))
    }
}

impl fmt::Debug for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhysAddr({:#x})", self.0)
    }
}

/// A virtual address in the guest's single address space.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(transparent)]
pub struct VirtAddr(pub u64);

impl VirtAddr {
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }

    pub const fn to_phys(self, phys_offset: u64) -> PhysAddr {
        PhysAddr(self.0.wrapping_add(phys_offset))
    }
}

impl fmt::Debug for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VirtAddr({:#x})", self.0)
    }
}

/// First frame at or above `addr`.
pub const fn pfn_up(addr: u64) -> u64 {
    (addr + PAGE_SIZE - 1) >> PAGE_SHIFT
}

/// Number of whole frames in `len` bytes.
pub const fn pfn_down(len: u64) -> u64 {
    len >> PAGE_SHIFT
}

pub const fn pfn_to_phys(pfn: u64) -> PhysAddr {
    PhysAddr(pfn << PAGE_SHIFT)
}

pub const fn phys_to_pfn(addr: PhysAddr) -> u64 {
    addr.0 >> PAGE_SHIFT
}
