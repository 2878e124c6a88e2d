use std::path::Path;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);
    let well_known = protoc_bin_vendored::include_path()?;
    println!("cargo:rerun-if-changed=proto/sessions.proto");
    tonic_build::configure().compile_protos(&["proto/sessions.proto"], &[Path::new("proto"), well_known.as_path()])?;
    Ok(())
}
