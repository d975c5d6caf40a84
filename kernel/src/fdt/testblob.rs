/// Flattened device-tree blobs assembled in memory for tests.
///
/// Writes the format directly: header, memory reservation map,
/// structure block, strings block. Only what the reader consumes is
/// supported; no multi-cell addressing, no nested reservation games.
use std::vec::Vec;

const FDT_MAGIC: u32 = 0xd00d_feed;
const FDT_BEGIN_NODE: u32 = 1;
const FDT_END_NODE: u32 = 2;
const FDT_PROP: u32 = 3;
const FDT_END: u32 = 9;

const HEADER_SIZE: usize = 40;

pub struct FdtBuilder {
    structure: Vec<u8>,
    strings: Vec<u8>,
    reserved: Vec<(u64, u64)>,
    magic: u32,
    version: u32,
    last_comp: u32,
}

impl FdtBuilder {
    pub fn new() -> Self {
        Self {
            structure: Vec::new(),
            strings: Vec::new(),
            reserved: Vec::new(),
            magic: FDT_MAGIC,
            version: 17,
            last_comp: 16,
        }
    }

    pub fn with_magic(mut self, magic: u32) -> Self {
        self.magic = magic;
        self
    }

    pub fn with_version(mut self, version: u32, last_comp: u32) -> Self {
        self.version = version;
        self.last_comp = last_comp;
        self
    }

    /// Add a memory reservation map entry.
    pub fn reserve(&mut self, addr: u64, size: u64) {
        self.reserved.push((addr, size));
    }

    pub fn begin_node(&mut self, name: &str) {
        push_u32(&mut self.structure, FDT_BEGIN_NODE);
        self.structure.extend_from_slice(name.as_bytes());
        self.structure.push(0);
        pad4(&mut self.structure);
    }

    pub fn end_node(&mut self) {
        push_u32(&mut self.structure, FDT_END_NODE);
    }

    pub fn prop(&mut self, name: &str, value: &[u8]) {
        let name_off = self.string_off(name);
        push_u32(&mut self.structure, FDT_PROP);
        push_u32(&mut self.structure, value.len() as u32);
        push_u32(&mut self.structure, name_off);
        self.structure.extend_from_slice(value);
        pad4(&mut self.structure);
    }

    /// A string property, trailing NUL included.
    pub fn prop_str(&mut self, name: &str, value: &str) {
        let mut bytes = Vec::from(value.as_bytes());
        bytes.push(0);
        self.prop(name, &bytes);
    }

    /// A `reg` property: one big-endian (address, size) pair.
    pub fn prop_reg64(&mut self, base: u64, size: u64) {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&base.to_be_bytes());
        bytes.extend_from_slice(&size.to_be_bytes());
        self.prop("reg", &bytes);
    }

    pub fn finish(mut self) -> Vec<u8> {
        push_u32(&mut self.structure, FDT_END);

        let rsv_off = HEADER_SIZE;
        let rsv_len = (self.reserved.len() + 1) * 16;
        let struct_off = rsv_off + rsv_len;
        let strings_off = struct_off + self.structure.len();
        let total = strings_off + self.strings.len();

        let mut out = Vec::with_capacity(total);
        push_u32(&mut out, self.magic);
        push_u32(&mut out, total as u32);
        push_u32(&mut out, struct_off as u32);
        push_u32(&mut out, strings_off as u32);
        push_u32(&mut out, rsv_off as u32);
        push_u32(&mut out, self.version);
        push_u32(&mut out, self.last_comp);
        push_u32(&mut out, 0); // boot_cpuid_phys
        push_u32(&mut out, self.strings.len() as u32);
        push_u32(&mut out, self.structure.len() as u32);

        for (addr, size) in &self.reserved {
            out.extend_from_slice(&addr.to_be_bytes());
            out.extend_from_slice(&size.to_be_bytes());
        }
        out.extend_from_slice(&[0; 16]); // terminator pair

        out.extend_from_slice(&self.structure);
        out.extend_from_slice(&self.strings);
        out
    }

    fn string_off(&mut self, name: &str) -> u32 {
        let off = self.strings.len() as u32;
        self.strings.extend_from_slice(name.as_bytes());
        self.strings.push(0);
        off
    }
}

fn push_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_be_bytes());
}

fn pad4(out: &mut Vec<u8>) {
    while out.len() % 4 != 0 {
        out.push(0);
    }
}

/// The tree Xen hands a guest, reduced to what bring-up reads: one
/// memory bank and, optionally, the hypervisor node advertising the
/// grant table base.
pub fn boot_blob(mem_base: u64, mem_size: u64, gnttab_base: Option<u64>) -> Vec<u8> {
    let mut b = FdtBuilder::new();
    b.begin_node("");
    b.prop_str("model", "xen-guest");
    b.begin_node("memory");
    b.prop_str("device_type", "memory");
    b.prop_reg64(mem_base, mem_size);
    b.end_node();
    if let Some(base) = gnttab_base {
        b.begin_node("hypervisor");
        b.prop("compatible", b"xen,xen-4.17\0xen,xen\0");
        b.prop_reg64(base, 0x20000);
        b.end_node();
    }
    b.end_node();
    b.finish()
}
