//! Windowed viewer for the ember renderer.

mod config;
mod input;
mod present;
mod runtime;

use ember_engine::logging::{LoggingConfig, init_logging};

use crate::config::ViewerConfig;
use crate::runtime::Runtime;

fn main() -> anyhow::Result<()> {
    init_logging(LoggingConfig::default());
    Runtime::run(ViewerConfig::default())
}
