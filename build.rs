//! # Build Script
//!
//! Embeds `resources/bat2exe.rc` into the Windows executable. The resource
//! script pulls in `bat2exe.manifest`, which declares:
//! - DPI Awareness.
//! - `asInvoker` execution level (the converter itself never needs Admin).
//! - Windows 10/11 compatibility.

fn main() {
    println!("cargo:rerun-if-changed=resources/bat2exe.rc");
    println!("cargo:rerun-if-changed=resources/bat2exe.manifest");

    // Non-Windows targets report NotWindows here; the tool still builds, just without resources.
    let _ = embed_resource::compile("resources/bat2exe.rc", embed_resource::NONE);
}
