//! Build script to compile the chaincode protocol definitions.

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // fall back to a bundled protoc when none is configured
    if std::env::var_os("PROTOC").is_none() {
        let protoc = protoc_bin_vendored::protoc_bin_path().map_err(|e| e.to_string())?;
        std::env::set_var("PROTOC", protoc);
    }

    tonic_build::configure()
        .build_server(false)
        .build_client(false)
        .compile_protos(&["proto/ccsupport/v1/chaincode.proto"], &["proto"])?;

    println!("cargo:rerun-if-changed=proto/");
    Ok(())
}
