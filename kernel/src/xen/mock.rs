/// Scripted hypervisor for testing.
///
/// Simulates the handshake side of Xen entirely in memory: boot
/// parameters come from a table, physmap placements are recorded for
/// inspection, and any operation can be scripted to fail. Used with the
/// `test-mock-xen` feature for unit testing the handshake and the boot
/// sequence without a hypervisor.
use super::abi::{
    AddToPhysmap, GnttabSetupTable, HvmParam, GNTTABOP_SETUP_TABLE, HVMOP_GET_PARAM,
    XENMEM_ADD_TO_PHYSMAP,
};
use super::hypercall::Hypervisor;

const ENOSYS: i64 = -38;
const EINVAL: i64 = -22;

/// One recorded XENMEM_add_to_physmap placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub space: u32,
    pub idx: u64,
    pub gpfn: u64,
}

pub struct MockXen {
    /// Boot parameter values, indexed by HVM parameter number.
    params: [u64; 64],
    /// Parameter index scripted to fail.
    fail_param: Option<u32>,
    /// Physmap space scripted to fail, with its status.
    fail_physmap: Option<(u32, i64)>,
    /// Status written into GNTTABOP_setup_table responses.
    grant_status: i16,
    placements: [Placement; 16],
    nplacements: usize,
    grant_setup_calls: usize,
    last_grant_nr_frames: u32,
}

impl MockXen {
    pub fn new() -> Self {
        Self {
            params: [0; 64],
            fail_param: None,
            fail_physmap: None,
            grant_status: 0,
            placements: [Placement {
                space: 0,
                idx: 0,
                gpfn: 0,
            }; 16],
            nplacements: 0,
            grant_setup_calls: 0,
            last_grant_nr_frames: 0,
        }
    }

    pub fn set_param(&mut self, index: u32, value: u64) {
        self.params[index as usize] = value;
    }

    /// Make HVMOP_get_param on `index` return an error.
    pub fn fail_param(&mut self, index: u32) {
        self.fail_param = Some(index);
    }

    /// Make XENMEM_add_to_physmap into `space` return `status`.
    pub fn fail_physmap(&mut self, space: u32, status: i64) {
        self.fail_physmap = Some((space, status));
    }

    /// Make GNTTABOP_setup_table report `status`.
    pub fn fail_grant_setup(&mut self, status: i16) {
        self.grant_status = status;
    }

    /// Every successful physmap placement, in call order.
    pub fn placements(&self) -> &[Placement] {
        &self.placements[..self.nplacements]
    }

    pub fn grant_setup_calls(&self) -> usize {
        self.grant_setup_calls
    }

    pub fn last_grant_nr_frames(&self) -> u32 {
        self.last_grant_nr_frames
    }
}

impl Hypervisor for MockXen {
    fn memory_op(&mut self, cmd: u32, req: &mut AddToPhysmap) -> i64 {
        if cmd != XENMEM_ADD_TO_PHYSMAP {
            return ENOSYS;
        }
        if let Some((space, status)) = self.fail_physmap {
            if space == req.space {
                return status;
            }
        }
        if self.nplacements < self.placements.len() {
            self.placements[self.nplacements] = Placement {
                space: req.space,
                idx: req.idx,
                gpfn: req.gpfn,
            };
            self.nplacements += 1;
        }
        0
    }

    fn hvm_op(&mut self, cmd: u32, req: &mut HvmParam) -> i64 {
        if cmd != HVMOP_GET_PARAM {
            return ENOSYS;
        }
        if self.fail_param == Some(req.index) {
            return EINVAL;
        }
        match self.params.get(req.index as usize) {
            Some(&value) => {
                req.value = value;
                0
            }
            None => EINVAL,
        }
    }

    fn grant_table_op(&mut self, cmd: u32, req: &mut GnttabSetupTable, _count: u32) -> i64 {
        if cmd != GNTTABOP_SETUP_TABLE {
            return ENOSYS;
        }
        self.grant_setup_calls += 1;
        self.last_grant_nr_frames = req.nr_frames;
        req.status = self.grant_status;
        0
    }
}
