use std::process::Command;

fn main() {
    if std::env::var_os("PROTOC").is_none() {
        std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path().expect("vendored protoc binary"));
    }

    tonic_build::configure()
        .build_server(false)
        .compile(&["proto/csi.proto"], &["proto"])
        .expect("failed to compile csi.proto");

    let git_sha = Command::new("git")
        .args(["rev-parse", "HEAD"])
        .output()
        .ok()
        .and_then(|output| String::from_utf8(output.stdout).ok())
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    println!("cargo:rustc-env=GIT_SHA={}", git_sha);
    println!("cargo:rerun-if-changed=proto/csi.proto");
}
