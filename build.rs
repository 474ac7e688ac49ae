use std::env;

fn main() {
    println!("cargo:rerun-if-env-changed=CARGO_FEATURE_DEFMT");

    // Host builds (simulator tests, docs) link with the system linker
    if env::var("CARGO_CFG_TARGET_OS").as_deref() != Ok("none") {
        return;
    }

    // Check if the `defmt` feature is enabled, and if so link its linker script
    if env::var("CARGO_FEATURE_DEFMT").is_ok() {
        println!("cargo:rustc-link-arg=-Tdefmt.x");
    }
}
