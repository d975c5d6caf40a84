/// Unit tests for the boot sequence — memory discovery, free-range
/// arithmetic, halt-before-handoff on every fatal path, and the blob
/// relocation policy, all over the scripted hypervisor.
/// Run with: cargo test --lib
use super::*;
use crate::fdt::testblob::{boot_blob, FdtBuilder};
use crate::mem::lpae::l1_index;
use crate::mem::{LpaeEntry, PageTable};
use crate::xen::abi::{hvm_param, XENMAPSPACE_SHARED_INFO};
use crate::xen::mock::MockXen;

use std::boxed::Box;
use std::vec;
use std::vec::Vec;

#[repr(C, align(4096))]
struct PageBuf([u8; 4096]);

fn shared_page() -> Box<PageBuf> {
    Box::new(PageBuf([0; 4096]))
}

fn scripted_xen() -> MockXen {
    let mut xen = MockXen::new();
    xen.set_param(hvm_param::CONSOLE_EVTCHN, 3);
    xen.set_param(hvm_param::CONSOLE_PFN, 0x38000);
    xen.set_param(hvm_param::STORE_EVTCHN, 5);
    xen.set_param(hvm_param::STORE_PFN, 0x39000);
    xen
}

/// Identity-offset context over a heap-held blob.
fn identity_ctx(blob: &[u8], shared: &mut PageBuf) -> BootContext {
    let mut ctx = BootContext::empty();
    ctx.phys_offset = 0;
    ctx.device_tree = blob.as_ptr();
    ctx.shared_info = shared.0.as_mut_ptr();
    ctx
}

const NATIVE_64: BootPolicy = BootPolicy {
    map_console_window: true,
    relocate_device_tree: false,
};

// ---- the golden path ----

#[test]
fn free_range_for_256mib_bank() {
    let blob = boot_blob(0x4000_0000, 0x1000_0000, None);
    let mut shared = shared_page();
    let mut ctx = identity_ctx(&blob, &mut shared);

    let mut l1 = Box::new(PageTable::empty());
    let l2 = Box::new(PageTable::empty());
    let mut fixmap = Box::new(PageTable::empty());
    l1.entries[l1_index(0x4000_0000)] = LpaeEntry::table(&*l2 as *const PageTable as u64);
    let mut tables = BootPageTables::new(&mut l1, &mut fixmap, 0);

    let image = ImageLayout {
        text: VirtAddr::new(0x4000_0000),
        etext: VirtAddr::new(0x4008_0000),
        erodata: VirtAddr::new(0x4010_0000),
        edata: VirtAddr::new(0x4018_0000),
        end: VirtAddr::new(0x4020_0000),
    };

    let mut xen = scripted_xen();
    prepare_boot(&mut ctx, &mut tables, &mut xen, &image, &NATIVE_64).unwrap();

    // First free frame is the page-aligned frame at the image end; the
    // end covers the rest of the bank.
    assert_eq!(ctx.free_start_pfn, 0x40200);
    assert_eq!(ctx.free_end_pfn, 0x50000);

    // RAM is mapped: the image runs out of the bank it validated.
    assert_eq!(
        tables.translate(VirtAddr::new(0x4FFF_F000)),
        Some(PhysAddr::new(0x4FFF_F000))
    );

    // Handshake results recorded in the context.
    assert_eq!(ctx.console.evtchn, 3);
    assert_eq!(ctx.console.ring, 0xC000_0000);
    assert_eq!(ctx.store.evtchn, 5);
    assert_eq!(ctx.store.pfn, 0x39000);

    // The shared info page went to the hypervisor under its own frame.
    let placements = xen.placements();
    assert_eq!(placements[0].space, XENMAPSPACE_SHARED_INFO);
    assert_eq!(placements[0].gpfn, shared.0.as_ptr() as u64 >> 12);

    drop(tables);
    drop(l2);
}

// ---- fatal paths halt before handoff ----

#[test]
fn image_outside_bank_is_fatal() {
    let blob = boot_blob(0x4000_0000, 0x1000_0000, None);
    let mut shared = shared_page();
    let mut ctx = identity_ctx(&blob, &mut shared);

    let mut l1 = Box::new(PageTable::empty());
    let l2 = Box::new(PageTable::empty());
    let mut fixmap = Box::new(PageTable::empty());
    l1.entries[l1_index(0x4000_0000)] = LpaeEntry::table(&*l2 as *const PageTable as u64);
    let mut tables = BootPageTables::new(&mut l1, &mut fixmap, 0);

    let image = ImageLayout {
        text: VirtAddr::new(0x3000_0000),
        etext: VirtAddr::new(0x3008_0000),
        erodata: VirtAddr::new(0x3010_0000),
        edata: VirtAddr::new(0x3018_0000),
        end: VirtAddr::new(0x3020_0000),
    };

    let mut xen = scripted_xen();
    let err = prepare_boot(&mut ctx, &mut tables, &mut xen, &image, &NATIVE_64).unwrap_err();
    assert_eq!(
        err,
        BootError::ImageOutsideBank {
            image_start: 0x3000_0000,
            image_end: 0x3020_0000,
        }
    );
    // Nothing was registered with the hypervisor.
    assert!(xen.placements().is_empty());

    drop(tables);
    drop(l2);
}

#[test]
fn handshake_failure_is_fatal() {
    let blob = boot_blob(0x4000_0000, 0x1000_0000, None);
    let mut shared = shared_page();
    let mut ctx = identity_ctx(&blob, &mut shared);

    let mut l1 = Box::new(PageTable::empty());
    let l2 = Box::new(PageTable::empty());
    let mut fixmap = Box::new(PageTable::empty());
    l1.entries[l1_index(0x4000_0000)] = LpaeEntry::table(&*l2 as *const PageTable as u64);
    let mut tables = BootPageTables::new(&mut l1, &mut fixmap, 0);

    let image = ImageLayout {
        text: VirtAddr::new(0x4000_0000),
        etext: VirtAddr::new(0x4008_0000),
        erodata: VirtAddr::new(0x4010_0000),
        edata: VirtAddr::new(0x4018_0000),
        end: VirtAddr::new(0x4020_0000),
    };

    let mut xen = scripted_xen();
    xen.fail_param(hvm_param::CONSOLE_PFN);

    let err = prepare_boot(&mut ctx, &mut tables, &mut xen, &image, &NATIVE_64).unwrap_err();
    assert!(matches!(
        err,
        BootError::Handshake(HandshakeError::ParameterFailed {
            index: hvm_param::CONSOLE_PFN,
            ..
        })
    ));
    // The shared info page had already been registered; the sequence
    // stopped at the console step.
    assert_eq!(xen.placements().len(), 1);

    drop(tables);
    drop(l2);
}

#[test]
fn missing_memory_node_is_fatal() {
    let mut b = FdtBuilder::new();
    b.begin_node("");
    b.prop_str("model", "empty");
    b.end_node();
    let blob = b.finish();

    let mut shared = shared_page();
    let mut ctx = identity_ctx(&blob, &mut shared);
    let mut l1 = Box::new(PageTable::empty());
    let mut fixmap = Box::new(PageTable::empty());
    let mut tables = BootPageTables::new(&mut l1, &mut fixmap, 0);

    let image = ImageLayout {
        text: VirtAddr::new(0x4000_0000),
        etext: VirtAddr::new(0x4008_0000),
        erodata: VirtAddr::new(0x4010_0000),
        edata: VirtAddr::new(0x4018_0000),
        end: VirtAddr::new(0x4020_0000),
    };
    let mut xen = scripted_xen();
    assert_eq!(
        prepare_boot(&mut ctx, &mut tables, &mut xen, &image, &NATIVE_64),
        Err(BootError::NoMemoryNode)
    );
}

#[test]
fn short_reg_property_is_fatal() {
    let mut b = FdtBuilder::new();
    b.begin_node("");
    b.begin_node("memory");
    b.prop_str("device_type", "memory");
    b.prop("reg", &0x4000_0000u64.to_be_bytes()); // address, no size
    b.end_node();
    b.end_node();
    let blob = b.finish();

    let mut shared = shared_page();
    let mut ctx = identity_ctx(&blob, &mut shared);
    let mut l1 = Box::new(PageTable::empty());
    let mut fixmap = Box::new(PageTable::empty());
    let mut tables = BootPageTables::new(&mut l1, &mut fixmap, 0);

    let image = ImageLayout {
        text: VirtAddr::new(0x4000_0000),
        etext: VirtAddr::new(0x4008_0000),
        erodata: VirtAddr::new(0x4010_0000),
        edata: VirtAddr::new(0x4018_0000),
        end: VirtAddr::new(0x4020_0000),
    };
    let mut xen = scripted_xen();
    assert_eq!(
        prepare_boot(&mut ctx, &mut tables, &mut xen, &image, &NATIVE_64),
        Err(BootError::BadRegProperty { len: 8 })
    );
}

#[test]
fn reserved_regions_are_ignored() {
    let mut b = FdtBuilder::new();
    b.reserve(0x4800_0000, 0x1000);
    b.begin_node("");
    b.begin_node("memory");
    b.prop_str("device_type", "memory");
    b.prop_reg64(0x4000_0000, 0x1000_0000);
    b.end_node();
    b.end_node();
    let blob = b.finish();

    let mut shared = shared_page();
    let mut ctx = identity_ctx(&blob, &mut shared);
    let mut l1 = Box::new(PageTable::empty());
    let l2 = Box::new(PageTable::empty());
    let mut fixmap = Box::new(PageTable::empty());
    l1.entries[l1_index(0x4000_0000)] = LpaeEntry::table(&*l2 as *const PageTable as u64);
    let mut tables = BootPageTables::new(&mut l1, &mut fixmap, 0);

    let image = ImageLayout {
        text: VirtAddr::new(0x4000_0000),
        etext: VirtAddr::new(0x4008_0000),
        erodata: VirtAddr::new(0x4010_0000),
        edata: VirtAddr::new(0x4018_0000),
        end: VirtAddr::new(0x4020_0000),
    };
    let mut xen = scripted_xen();
    // The extra region is logged and skipped; bring-up continues on the
    // first bank.
    prepare_boot(&mut ctx, &mut tables, &mut xen, &image, &NATIVE_64).unwrap();
    assert_eq!(ctx.free_start_pfn, 0x40200);

    drop(tables);
    drop(l2);
}

// ---- blob relocation on the 32-bit policy ----

#[test]
fn relocation_moves_blob_to_top_of_ram() {
    const BANK_BASE: u64 = 0x4000_0000;
    const BANK_SIZE: usize = 4 << 20;
    const ALIGN: usize = 4 << 20;
    const BLOB_AT: usize = 0x1_0000;

    // A real buffer stands in for the bank so the copy lands somewhere.
    // Aligned to the bank's own granularity so block indices and the
    // page-aligned offset work out.
    let mut backing: Vec<u8> = vec![0u8; BANK_SIZE + ALIGN];
    let base = backing.as_mut_ptr() as usize;
    let ram_off = (ALIGN - base % ALIGN) % ALIGN;
    let ram_va = (base + ram_off) as u64;
    let phys_offset = BANK_BASE.wrapping_sub(ram_va);

    let blob = boot_blob(BANK_BASE, BANK_SIZE as u64, None);
    assert!(blob.len() <= 4096);
    backing[ram_off + BLOB_AT..ram_off + BLOB_AT + blob.len()].copy_from_slice(&blob);

    let mut shared = shared_page();
    let mut ctx = BootContext::empty();
    ctx.phys_offset = phys_offset;
    ctx.device_tree = (ram_va + BLOB_AT as u64) as *const u8;
    ctx.shared_info = shared.0.as_mut_ptr();

    // The bank's second-level table lives inside the bank itself, as
    // the link-time storage does on hardware.
    let mut l1 = Box::new(PageTable::empty());
    let mut fixmap = Box::new(PageTable::empty());
    l1.entries[l1_index(ram_va)] = LpaeEntry::table(BANK_BASE);
    let mut tables = BootPageTables::new(&mut l1, &mut fixmap, phys_offset);

    let image = ImageLayout {
        text: VirtAddr::new(ram_va + 0x1000),
        etext: VirtAddr::new(ram_va + 0x1400),
        erodata: VirtAddr::new(ram_va + 0x1800),
        edata: VirtAddr::new(ram_va + 0x1C00),
        end: VirtAddr::new(ram_va + 0x2000),
    };

    let native_32 = BootPolicy {
        map_console_window: false,
        relocate_device_tree: true,
    };
    let mut xen = scripted_xen();
    prepare_boot(&mut ctx, &mut tables, &mut xen, &image, &native_32).unwrap();

    // Without relocation the range would end at the bank top; the blob
    // now owns the page-aligned tail.
    assert_eq!(ctx.free_start_pfn, 0x40002);
    let expected_dest = ((0x4040_0000u64 - blob.len() as u64) & PAGE_MASK) as u64;
    assert_eq!(expected_dest, 0x403F_F000);
    assert_eq!(ctx.free_end_pfn, expected_dest >> PAGE_SHIFT);
    assert_eq!(ctx.device_tree as u64, ram_va + 0x3F_F000);

    // Raw console frame under this policy.
    assert_eq!(ctx.console.ring, 0x38000);

    drop(tables);

    // The moved blob revalidates in place.
    let moved = &backing[ram_off + 0x3F_F000..ram_off + 0x3F_F000 + blob.len()];
    let dt = crate::fdt::DeviceTree::new(moved).unwrap();
    assert_eq!(dt.total_size() as usize, blob.len());
}
