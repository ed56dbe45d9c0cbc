/// Version recorded in output @PG lines and `--version` output.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
