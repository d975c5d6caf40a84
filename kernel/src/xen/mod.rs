//! Xen hypervisor interface: the hypercall ABI, the call seam, and the
//! boot-time handshake operations.
pub mod abi;
pub mod handshake;
pub mod hypercall;

#[cfg(any(test, feature = "test-mock-xen"))]
pub mod mock;


pub use handshake::{ConsoleChannel, HandshakeError, StoreChannel, NR_GRANT_FRAMES};
pub use hypercall::Hypervisor;
