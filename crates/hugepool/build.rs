fn main() {
    let target_os = std::env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
    let manifest_dir = std::env::var("CARGO_MANIFEST_DIR").unwrap();
    let interpose = std::env::var_os("CARGO_FEATURE_INTERPOSE").is_some();

    match target_os.as_str() {
        "linux" => {
            // Only the interposing build exports the malloc family; the plain
            // cdylib exposes the hugepool_* entry points alone.
            let script = if interpose {
                "interpose.lds"
            } else {
                "explicit.lds"
            };
            println!(
                "cargo:rustc-cdylib-link-arg=-Wl,--version-script={}/linker/{}",
                manifest_dir, script
            );
            println!("cargo:rerun-if-changed=linker/interpose.lds");
            println!("cargo:rerun-if-changed=linker/explicit.lds");
        }
        "macos" => {
            // All #[no_mangle] symbols are exported by default on macOS.
        }
        _ => {}
    }
}
