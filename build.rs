//! Build script for nfs-crawler
//!
//! With the `libnfs` feature, generates Rust bindings for libnfs using
//! bindgen. Requires libnfs-dev to be installed on the system. Without the
//! feature there is nothing to do.

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    #[cfg(feature = "libnfs")]
    libnfs::generate();
}

#[cfg(feature = "libnfs")]
mod libnfs {
    use std::env;
    use std::path::PathBuf;

    pub fn generate() {
        // Rerun if wrapper header changes
        println!("cargo:rerun-if-changed=src/nfs/wrapper.h");

        // Find libnfs using pkg-config
        let nfs_lib = match pkg_config::Config::new()
            .atleast_version("4.0.0")
            .probe("libnfs")
        {
            Ok(lib) => lib,
            Err(e) => {
                eprintln!("Error: Could not find libnfs via pkg-config: {}", e);
                eprintln!();
                eprintln!("To install libnfs on Ubuntu/Debian:");
                eprintln!("  sudo apt install libnfs-dev");
                eprintln!();
                eprintln!("Or build without the libnfs feature to use the library alone.");
                std::process::exit(1);
            }
        };

        let mut builder = bindgen::Builder::default()
            .header("src/nfs/wrapper.h")
            // Only generate bindings for nfs functions
            .allowlist_function("nfs_.*")
            .allowlist_type("nfs_.*")
            .allowlist_type("nfsdir")
            .allowlist_type("nfsdirent")
            .allowlist_type("nfs_url")
            .allowlist_type("nfs_context")
            .derive_debug(true)
            .derive_default(true)
            .use_core()
            // Treat as opaque types we don't need to inspect
            .opaque_type("nfs_context")
            .opaque_type("nfsdir")
            .opaque_type("nfsfh")
            .layout_tests(false)
            .generate_comments(true);

        // Add include paths from pkg-config
        for path in &nfs_lib.include_paths {
            builder = builder.clang_arg(format!("-I{}", path.display()));
        }

        let bindings = builder
            .generate()
            .expect("Unable to generate libnfs bindings");

        let out_path = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR is set by cargo"));
        bindings
            .write_to_file(out_path.join("nfs_bindings.rs"))
            .expect("Couldn't write bindings!");

        // pkg-config already emitted link directives during probe
    }
}
