/// Boot page-table construction.
///
/// Two jobs, both one-shot: cover the discovered memory bank with 2 MiB
/// normal-memory blocks, and populate the two fixed windows (console
/// ring, relocated device tree) under the fixmap table.
///
/// Every descriptor store goes through `set_entry`: volatile write, then
/// `dsb ishst`, then `isb`. The store must be visible to the translation
/// walker before the next entry is written or the mapping is relied on —
/// on every entry, not just the last of a batch.
use crate::arch::aarch64::{dsb_ishst, isb};

use super::lpae::{
    l1_index, l2_index, BlockAttrs, LpaeEntry, PageTable, BLOCK_NORMAL_ATTRS, L1_SIZE, L2_OFFSET,
    L2_SIZE,
};
use super::{pfn_to_phys, PhysAddr, VirtAddr};

use core::fmt;

/// Base of the fixmap stride: one 1 GiB top-level slot, distinct from
/// the strides RAM maps into, backed by the statically-reserved fixmap
/// second-level table.
pub const FIXMAP_VIRT_BASE: u64 = 0xC000_0000;

/// A reserved virtual window, known at build time, backing exactly one
/// purpose for the guest's lifetime.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum FixedWindow {
    /// The hypervisor console ring.
    Console,
    /// The relocated hardware-description blob.
    DeviceTree,
}

impl FixedWindow {
    /// Each window owns one 2 MiB block slot in the fixmap table.
    pub const fn virt_base(self) -> VirtAddr {
        match self {
            FixedWindow::Console => VirtAddr(FIXMAP_VIRT_BASE),
            FixedWindow::DeviceTree => VirtAddr(FIXMAP_VIRT_BASE + L2_SIZE),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapError {
    /// A top-level entry has no second-level table behind it: the range
    /// extends past what the single pre-reserved second level covers.
    /// This is the stated capacity limit of the boot tables, checked
    /// rather than silently truncated.
    CapacityExceeded { vaddr: u64 },
}

impl fmt::Display for MapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MapError::CapacityExceeded { vaddr } => {
                write!(
                    f,
                    "no second-level table for {:#x}: supported memory exceeded",
                    vaddr
                )
            }
        }
    }
}

/// The boot translation tables, borrowed from their link-time storage
/// (or from test-owned tables on the host target).
pub struct BootPageTables<'a> {
    l1: &'a mut PageTable,
    fixmap: &'a mut PageTable,
    phys_offset: u64,
}

impl<'a> BootPageTables<'a> {
    /// `phys_offset` is the process-wide physical-minus-virtual offset.
    /// The boot entry must already have linked the RAM second-level
    /// table into `l1` before handing the tables over.
    pub fn new(l1: &'a mut PageTable, fixmap: &'a mut PageTable, phys_offset: u64) -> Self {
        Self {
            l1,
            fixmap,
            phys_offset,
        }
    }

    pub fn phys_offset(&self) -> u64 {
        self.phys_offset
    }

    /// Write one descriptor and order it against the walker: store, data
    /// barrier, instruction barrier — before anything else may touch or
    /// trust the entry.
    fn set_entry(slot: &mut LpaeEntry, value: LpaeEntry) {
        unsafe { core::ptr::write_volatile(slot, value) };
        dsb_ishst();
        isb();
    }

    /// Cover `nr_pfns` frames starting at `start_pfn` with 2 MiB
    /// normal-memory blocks, virtual and physical advancing in lockstep
    /// under the fixed offset.
    ///
    /// Each 1 GiB stride's top-level entry must already reference a
    /// second-level table; a missing one is a capacity violation, not a
    /// request to allocate. The final block may extend past the region
    /// end to the 2 MiB boundary.
    pub fn build_pagetable(&mut self, start_pfn: u64, nr_pfns: u64) -> Result<(), MapError> {
        let start_paddr = pfn_to_phys(start_pfn);
        let end_paddr = pfn_to_phys(start_pfn + nr_pfns);

        let start_vaddr = start_paddr.to_virt(self.phys_offset).0;
        let end_vaddr = end_paddr.to_virt(self.phys_offset).0;

        let mut vaddr = start_vaddr;
        let mut paddr = start_paddr.0;
        while vaddr < end_vaddr {
            let stride_end = core::cmp::min(vaddr + L1_SIZE, end_vaddr);

            let top = self.l1.entries[l1_index(vaddr)];
            if !top.is_table() {
                return Err(MapError::CapacityExceeded { vaddr });
            }

            // The second level is reachable through the current mapping:
            // it is link-time storage inside the image.
            let table = PhysAddr(top.table_addr()).to_virt(self.phys_offset).0 as *mut PageTable;

            let mut idx = l2_index(vaddr);
            loop {
                let entry = LpaeEntry::block(paddr, BLOCK_NORMAL_ATTRS);
                Self::set_entry(unsafe { &mut (*table).entries[idx] }, entry);
                vaddr += L2_SIZE;
                paddr += L2_SIZE;
                idx += 1;
                if vaddr >= stride_end {
                    break;
                }
            }
        }

        Ok(())
    }

    /// Map a fixed window at `phys`, returning the virtual address with
    /// the sub-block offset preserved.
    ///
    /// On first use the fixmap second level is linked into the top
    /// level; each window owns a single slot, so mapping the same
    /// purpose again overwrites it (last write wins).
    pub fn map_fixed_window(
        &mut self,
        window: FixedWindow,
        phys: PhysAddr,
        attrs: BlockAttrs,
    ) -> VirtAddr {
        let base = window.virt_base().0;

        let top_slot = l1_index(base);
        if !self.l1.entries[top_slot].is_table() {
            let fixmap_ptr: *mut PageTable = self.fixmap;
            let fixmap_phys = VirtAddr(fixmap_ptr as u64).to_phys(self.phys_offset);
            Self::set_entry(
                &mut self.l1.entries[top_slot],
                LpaeEntry::table(fixmap_phys.0),
            );
        }

        Self::set_entry(
            &mut self.fixmap.entries[l2_index(base)],
            LpaeEntry::block(phys.0, attrs),
        );

        VirtAddr(base | (phys.0 & L2_OFFSET))
    }

    /// Resolve a virtual address through the built tables. Diagnostic
    /// aid; `None` if either level is unmapped.
    pub fn translate(&self, vaddr: VirtAddr) -> Option<PhysAddr> {
        let top = self.l1.entries[l1_index(vaddr.0)];
        if !top.is_table() {
            return None;
        }
        let table = PhysAddr(top.table_addr()).to_virt(self.phys_offset).0 as *const PageTable;
        let entry = unsafe { (*table).entries[l2_index(vaddr.0)] };
        if !entry.is_valid() {
            return None;
        }
        Some(PhysAddr(entry.block_addr() | (vaddr.0 & L2_OFFSET)))
    }
}
