//! Compiles the interception Protocol Buffer contract.
//!
//! Generated code lands in OUT_DIR and is pulled in through
//! `tonic::include_proto!` in the crate root.

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed=proto/faultline.proto");

    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile(&["proto/faultline.proto"], &["proto/"])?;

    Ok(())
}
