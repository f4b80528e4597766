fn main() -> Result<(), Box<dyn std::error::Error>> {
    if std::env::var_os("PROTOC").is_none() {
        std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);
    }
    tonic_prost_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(
            &[
                "proto/common.proto",
                "proto/master.proto",
                "proto/region.proto",
                "proto/group.proto",
                "proto/bulk.proto",
            ],
            &["proto"],
        )?;
    Ok(())
}
