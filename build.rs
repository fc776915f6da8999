//! Build script for Caxton.
//!
//! Compiles the distributed runtime's wire protocol from `proto/` via
//! `tonic-build`, and reruns whenever the `.proto` source changes.

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tonic_build::compile_protos("proto/agent_service.proto")?;
    println!("cargo:rerun-if-changed=proto/agent_service.proto");
    Ok(())
}
