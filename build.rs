fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed=proto/sake.proto");

    prost_build::Config::new().compile_protos(&["proto/sake.proto"], &["proto"])?;

    Ok(())
}
