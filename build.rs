fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=Cargo.toml");

    // Package name, version and build time for the health endpoints
    built::write_built_file().expect("Failed to acquire build-time information");
}
