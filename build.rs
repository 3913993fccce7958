#[cfg(feature = "uhd")]
use std::env;
#[cfg(feature = "uhd")]
use std::path::PathBuf;

#[cfg(not(feature = "uhd"))]
fn main() {}

#[cfg(feature = "uhd")]
fn main() {
    let bindings = bindgen::Builder::default()
        // The input header we would like to generate
        // bindings for.
        .header("wrapper.hpp")
        // The C shim is plain C in the header, but it is compiled as C++
        .clang_arg("-xc++")
        .clang_arg("-std=c++14")
        .clang_arg("-I/usr/local/include/")
        .clang_arg("-I/opt/local/include/")
        .allowlist_function("usrp_.*")
        .allowlist_function("tx_stream_.*")
        .allowlist_function("rx_stream_.*")
        .opaque_type("UsrpHandle")
        .opaque_type("TxStreamHandle")
        .opaque_type("RxStreamHandle")
        .parse_callbacks(Box::new(bindgen::CargoCallbacks::new()))
        .generate()
        .expect("Unable to generate bindings");

    // Write the bindings to the $OUT_DIR/bindings.rs file.
    let out_path = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR is set by cargo"));
    bindings
        .write_to_file(out_path.join("bindings.rs"))
        .expect("Couldn't write bindings!");

    // Compile the UHD shim
    cc::Build::new()
        .file("wrapper.cpp")
        .cpp(true)
        .flag("-pthread")
        .flag("-fPIC")
        .flag("-std=c++14")
        .include("/usr/local/include")
        .include("/opt/local/include")
        .shared_flag(false)
        .compile("wrapper");

    println!("cargo:rerun-if-changed=wrapper.cpp");
    println!("cargo:rerun-if-changed=wrapper.hpp");

    println!("cargo:rustc-link-lib=uhd");
    println!("cargo:rustc-link-lib=boost_system");
    println!("cargo:rustc-link-search=native=/usr/local/lib/");
    println!("cargo:rustc-link-search=native=/opt/local/lib/");

    // OS specific libraries
    #[cfg(target_os = "linux")]
    println!("cargo:rustc-link-lib=boost_thread");

    #[cfg(target_os = "macos")]
    println!("cargo:rustc-link-lib=boost_thread-mt");
    #[cfg(target_os = "macos")]
    println!("cargo:rustc-flags=-l dylib=c++");
}
