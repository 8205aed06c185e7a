fn main() {
    built::write_built_file().expect("Failed to acquire build-time information");

    // Release builds outside a git checkout pass the commit in explicitly.
    println!("cargo:rerun-if-env-changed=ORGBOT_GIT_HASH");
    if let Ok(hash) = std::env::var("ORGBOT_GIT_HASH") {
        println!("cargo:rustc-env=ORGBOT_GIT_HASH={}", hash);
    }
}
