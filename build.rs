use std::env;
use std::fs;
use std::path::Path;

fn main() {
    // Create config template if it doesn't exist
    let out_dir = env::var("OUT_DIR").unwrap_or_else(|_| "./".to_string());
    let template_path = Path::new(&out_dir).join("../../../tsdemux.template.toml");

    let template = r#"# tsdemux configuration template
# Copy this file to 'tsdemux.toml' and adjust the values you need

cache_packets = 188
unbounded_initial_capacity = 131072
seek_tolerance = 0.5
seek_max_iterations = 10
probe_limit = 16777216
verify_crc = false
log_target = "tsdemux"
"#;

    let _ = fs::write(template_path, template);
    println!("cargo:rerun-if-changed=build.rs");
}
