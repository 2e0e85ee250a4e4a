pub mod client;
pub mod config;
pub mod error;
pub mod event_loop;
pub mod protocol;
pub mod report;

use crate::config::Config;
use tracing_subscriber::EnvFilter;

fn main() {
    // 日志写到 stderr，stdout 只留给布局名
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load();
    if let Err(e) = client::driver::run(config) {
        eprintln!("die: {}", e);
        std::process::exit(1);
    }
}
