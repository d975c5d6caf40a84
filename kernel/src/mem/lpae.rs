/// LPAE translation-table descriptors.
///
/// The boot tables are two levels of the 4 KiB-granule format: a top
/// level whose entries each cover a 1 GiB stride and reference a second
/// level, and a second level whose entries each map one 2 MiB block.
/// Both levels are reserved at link time in the boot crate; no level is
/// ever allocated.
use core::fmt;

use bitflags::bitflags;
use static_assertions::const_assert_eq;

pub const ENTRIES_PER_TABLE: usize = 512;

/// Top level: 1 GiB per entry.
pub const L1_SHIFT: u64 = 30;
pub const L1_SIZE: u64 = 1 << L1_SHIFT;

/// Second level: 2 MiB block per entry.
pub const L2_SHIFT: u64 = 21;
pub const L2_SIZE: u64 = 1 << L2_SHIFT;
/// Offset of an address within its 2 MiB block.
pub const L2_OFFSET: u64 = L2_SIZE - 1;

/// Output address bits of a table descriptor (bits 47:12).
const TABLE_ADDR_MASK: u64 = 0x0000_FFFF_FFFF_F000;
/// Output address bits of a second-level block descriptor (bits 47:21).
const BLOCK_ADDR_MASK: u64 = 0x0000_FFFF_FFE0_0000;

const DESC_VALID: u64 = 1 << 0;
/// At the top level: set = table reference, clear = block.
const DESC_TABLE: u64 = 1 << 1;

bitflags! {
    /// Block-descriptor attributes. The attribute index selects an entry
    /// of MAIR_EL1 as programmed by the boot entry: index 0 is
    /// device-nGnRnE, index 1 is normal write-back.
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    pub struct BlockAttrs: u64 {
        const ATTR_IDX_NORMAL = 1 << 2;
        const SH_INNER = 0b11 << 8;
        const ACCESS = 1 << 10;
        const PXN = 1 << 53;
        const UXN = 1 << 54;
    }
}

/// Normal cached memory — RAM blocks. The raw value (with the valid bit)
/// is 0x705, which the boot entry assembly must agree on.
pub const BLOCK_NORMAL_ATTRS: BlockAttrs = BlockAttrs::ATTR_IDX_NORMAL
    .union(BlockAttrs::SH_INNER)
    .union(BlockAttrs::ACCESS);

/// Uncached device memory — the console ring window. Attribute index 0,
/// no shareability, never executable.
pub const BLOCK_DEVICE_ATTRS: BlockAttrs = BlockAttrs::ACCESS
    .union(BlockAttrs::PXN)
    .union(BlockAttrs::UXN);

/// One eight-byte translation-table descriptor.
#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct LpaeEntry(u64);

impl LpaeEntry {
    pub const INVALID: LpaeEntry = LpaeEntry(0);

    /// Reference to a next-level table.
    pub const fn table(table_phys: u64) -> Self {
        Self((table_phys & TABLE_ADDR_MASK) | DESC_TABLE | DESC_VALID)
    }

    /// Map one 2 MiB block of physical memory.
    pub const fn block(phys: u64, attrs: BlockAttrs) -> Self {
        Self((phys & BLOCK_ADDR_MASK) | attrs.bits() | DESC_VALID)
    }

    pub const fn is_valid(self) -> bool {
        self.0 & DESC_VALID != 0
    }

    pub const fn is_table(self) -> bool {
        self.0 & (DESC_VALID | DESC_TABLE) == (DESC_VALID | DESC_TABLE)
    }

    /// Physical address of the referenced next-level table.
    pub const fn table_addr(self) -> u64 {
        self.0 & TABLE_ADDR_MASK
    }

    /// Physical base of the mapped block.
    pub const fn block_addr(self) -> u64 {
        self.0 & BLOCK_ADDR_MASK
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for LpaeEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LpaeEntry({:#x})", self.0)
    }
}

/// One level of translation table: 512 descriptors, page-aligned.
#[repr(C, align(4096))]
pub struct PageTable {
    pub entries: [LpaeEntry; ENTRIES_PER_TABLE],
}

impl PageTable {
    pub const fn empty() -> Self {
        Self {
            entries: [LpaeEntry::INVALID; ENTRIES_PER_TABLE],
        }
    }
}

/// Index of a virtual address in the top-level table.
pub fn l1_index(vaddr: u64) -> usize {
    ((vaddr >> L1_SHIFT) & 0x1FF) as usize
}

/// Index of a virtual address in a second-level table.
pub fn l2_index(vaddr: u64) -> usize {
    ((vaddr >> L2_SHIFT) & 0x1FF) as usize
}

const_assert_eq!(core::mem::size_of::<LpaeEntry>(), 8);
const_assert_eq!(core::mem::size_of::<PageTable>(), 4096);
