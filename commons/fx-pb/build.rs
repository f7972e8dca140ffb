use std::env;
use std::path::PathBuf;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let out_dir = PathBuf::from(env::var("OUT_DIR")?);
    tonic_build::configure()
        .build_client(true)
        .build_server(true)
        .file_descriptor_set_path(out_dir.join("fx_descriptor.bin"))
        .type_attribute(
            ".",
            concat!(
                "#[cfg_attr(feature = \"serde\", ",
                "derive(serde::Serialize, serde::Deserialize))]"
            ),
        )
        .type_attribute(".", "#[cfg_attr(feature = \"serde\", serde(default))]")
        .compile_protos(
            &["proto/gateway.proto", "proto/fxwatcher.proto"],
            &["proto/"],
        )?;
    Ok(())
}
