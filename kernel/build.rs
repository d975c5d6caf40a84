/// Nimbus kernel build script.
///
/// Passes the bare-metal linker script for the aarch64 guest target.
fn main() {
    // Skip the linker script when building for the host target (unit
    // tests). The unit tests only exercise pure logic — the device-tree
    // parser, descriptor encoding, the boot sequence over the mock
    // hypervisor — and link as an ordinary host binary.
    let target = std::env::var("TARGET").unwrap_or_default();
    if !target.starts_with("aarch64") {
        return;
    }

    let manifest_dir = std::env::var("CARGO_MANIFEST_DIR").unwrap();
    println!("cargo:rustc-link-arg=-T{manifest_dir}/linker.ld");
    println!("cargo:rerun-if-changed=linker.ld");
}
