fn main() {
    println!("cargo:rerun-if-changed=src/ffi.rs");
    println!("cargo:rerun-if-changed=src/transport.rs");
    println!("cargo:rerun-if-changed=cbindgen.toml");

    let Ok(crate_dir) = std::env::var("CARGO_MANIFEST_DIR") else {
        return;
    };
    let header_dir = std::path::Path::new(&crate_dir).join("include");
    let config = cbindgen::Config::from_file("cbindgen.toml").unwrap_or_default();

    // Header generation is best effort; the library builds without it.
    match cbindgen::Builder::new()
        .with_crate(&crate_dir)
        .with_config(config)
        .generate()
    {
        Ok(bindings) => {
            if std::fs::create_dir_all(&header_dir).is_ok() {
                bindings.write_to_file(header_dir.join("capistrano.h"));
            }
        }
        Err(e) => println!("cargo:warning=capistrano.h not generated: {}", e),
    }
}
