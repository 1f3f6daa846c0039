// The wire schema is shared by every binary in the workspace, so it is
// compiled once here and re-exported from `common::rpc`.
fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Use the vendored protoc unless the environment already provides one.
    if std::env::var_os("PROTOC").is_none() {
        std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);
    }

    println!("cargo:rerun-if-changed=../protos");
    tonic_build::compile_protos("../protos/master.proto")?;
    tonic_build::compile_protos("../protos/worker.proto")?;
    Ok(())
}
