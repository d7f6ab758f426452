fn main() {
    // Stamp the binary so `--version` output identifies the build that migrated a database
    let timestamp = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
    println!("cargo:rustc-env=BUILD_TIMESTAMP={}", timestamp);
    println!("cargo:rerun-if-changed=build.rs");

    // Enables static linking of the vcruntime library on Windows builds
    static_vcruntime::metabuild();
}
