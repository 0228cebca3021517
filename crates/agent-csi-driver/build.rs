//! Compiles the CSI protocol definitions into the Identity and Node
//! service stubs included by `src/lib.rs`.

fn main() -> Result<(), Box<dyn std::error::Error>> {
    std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);

    tonic_build::configure()
        .build_server(true)
        .build_client(false)
        .compile_protos(&["proto/csi.proto"], &["proto"])?;

    println!("cargo:rerun-if-changed=proto/csi.proto");

    Ok(())
}
