// Logging System for the URL Dispatcher
//
// This module provides a unified logging interface for the dispatcher
// pool. It's built on top of the `tracing` ecosystem, which offers
// structured logging with per-target filtering.
//
// # Usage Examples
//
// ## Basic Initialization
// In a main.rs file run an initialization function
//
// ```rust
// use url_dispatcher::logging;
//
// // Initialize with default settings (INFO level, console output)
// logging::init_default();
//
// // Or initialize with custom settings
// let config = logging::LogConfig {
//     level: tracing::Level::DEBUG,
//     json_format: false,
//     ..Default::default()
// };
// logging::init(config);
// ```
//
// ## Using Log Macros
//
// ```rust
// use url_dispatcher::logging;
//
// logging::init_default();
// logging::info!("dispatcher started");
// ```

use std::sync::Once;

use tracing::{Level, Subscriber};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

// Re-export the tracing macros for callers that log through this module
pub use tracing::{debug, error, info, trace, warn};

/// Configuration for the dispatcher logging system
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum log level to display
    pub level: Level,
    /// Whether to use JSON format for logs
    pub json_format: bool,
    /// Whether to include file and line information
    pub show_file_line: bool,
    /// Whether to include thread name/id
    pub show_thread_info: bool,
    /// Target filter expressions (format: "target=level,target2=level2,...")
    pub target_filters: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            json_format: false,
            show_file_line: true,
            show_thread_info: true,
            target_filters: None,
        }
    }
}

// Initialization guard to ensure we only initialize once
static INIT: Once = Once::new();

/// Initialize the logging system with the given configuration
///
/// Sets up the global tracing subscriber. Safe to call multiple times;
/// only the first call takes effect.
pub fn init(config: LogConfig) {
    INIT.call_once(|| {
        let mut env_filter = EnvFilter::from_default_env().add_directive(config.level.into());

        // Add any target-specific filters if provided
        if let Some(filters) = config.target_filters {
            for filter in filters.split(',') {
                if let Ok(directive) = filter.parse() {
                    env_filter = env_filter.add_directive(directive);
                }
            }
        }

        let fmt_layer = fmt::layer()
            .with_ansi(atty::is(atty::Stream::Stdout))
            .with_file(config.show_file_line)
            .with_line_number(config.show_file_line)
            .with_thread_names(config.show_thread_info)
            .with_thread_ids(config.show_thread_info);

        let registry = tracing_subscriber::registry().with(env_filter);

        let subscriber: Box<dyn Subscriber + Send + Sync> = if config.json_format {
            Box::new(registry.with(fmt::layer().json().flatten_event(true)))
        } else {
            Box::new(registry.with(fmt_layer))
        };

        set_global_subscriber(subscriber);
    });
}

/// Initialize with default settings (INFO level, console output)
pub fn init_default() {
    init(LogConfig::default());
}

/// Initialize with development-friendly settings
/// (DEBUG level, file/line and thread info)
pub fn init_development() {
    init(LogConfig {
        level: Level::DEBUG,
        ..Default::default()
    });
}

/// Initialize with production-optimized settings
/// (INFO level, JSON format, no file/line info)
pub fn init_production() {
    init(LogConfig {
        level: Level::INFO,
        json_format: true,
        show_file_line: false,
        ..Default::default()
    });
}

// Helper function to set the global subscriber
fn set_global_subscriber<S>(subscriber: S)
where
    S: Subscriber + Send + Sync + 'static,
{
    if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Error setting global tracing subscriber: {}", err);
    }
}
