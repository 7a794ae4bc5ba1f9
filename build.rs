use std::env;

fn main() {
    // Version string shown by the CLI; overridable for packaged builds
    let version = env::var("TERRACOST_VERSION_OVERRIDE")
        .unwrap_or_else(|_| env::var("CARGO_PKG_VERSION").unwrap_or_default());
    println!("cargo:rustc-env=TERRACOST_VERSION={}", version);

    println!("cargo:rerun-if-env-changed=TERRACOST_VERSION_OVERRIDE");
    println!("cargo:rerun-if-changed=src/");
    println!("cargo:rerun-if-changed=Cargo.toml");
}
