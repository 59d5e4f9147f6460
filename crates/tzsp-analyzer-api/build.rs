//! Build script recording the compiler version.
//!
//! Analyzer trait objects cross the plugin boundary with the Rust ABI, which
//! is only stable within one compiler build. The version string becomes part
//! of the API identity the host compares.

use std::env;
use std::process::Command;

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-env-changed=RUSTC");

    let rustc = env::var("RUSTC").unwrap_or_else(|_| "rustc".to_string());
    let version = Command::new(rustc)
        .arg("--version")
        .output()
        .ok()
        .filter(|output| output.status.success())
        .map(|output| String::from_utf8_lossy(&output.stdout).trim().to_string())
        .filter(|version| !version.is_empty())
        .unwrap_or_else(|| "rustc unknown".to_string());

    println!("cargo:rustc-env=TZSP_RUSTC_VERSION={version}");
}
