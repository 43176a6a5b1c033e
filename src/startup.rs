// Startup module - displays banner and configuration summary
//
// Shows version info, config file status, the configured key slots
// (fingerprinted, never the raw keys), and the listen address.

use crate::config::{key_fingerprint, Config, VERSION};

/// ANSI color codes for terminal output
mod colors {
    pub const RESET: &str = "\x1b[0m";
    pub const BOLD: &str = "\x1b[1m";
    pub const DIM: &str = "\x1b[2m";
    pub const CYAN: &str = "\x1b[36m";
    pub const GREEN: &str = "\x1b[32m";
    pub const YELLOW: &str = "\x1b[33m";
    pub const MAGENTA: &str = "\x1b[35m";
}

/// Print the startup banner and configuration summary
pub fn print_startup(config: &Config) {
    use colors::*;

    // Banner
    println!();
    println!("  {BOLD}{CYAN}keywheel{RESET} {DIM}v{VERSION}{RESET}");
    println!("  {DIM}API key failover proxy for Gemini{RESET}");
    println!();

    // Config file status
    if let Some(path) = Config::config_path() {
        if path.exists() {
            println!("  {DIM}Config:{RESET} {GREEN}\u{2713}{RESET} {}", path.display());
        } else {
            println!("  {DIM}Config:{RESET} {DIM}(using defaults){RESET}");
        }
    }
    println!();

    // Key slots - fingerprints only
    if config.api_keys.is_empty() {
        println!("  {YELLOW}\u{25b8}{RESET} {YELLOW}No API keys configured{RESET} {DIM}(set GEMINI_API_KEY_1 ..){RESET}");
    } else {
        println!("  {DIM}Key slots:{RESET}");
        for (index, key) in config.api_keys.iter().enumerate() {
            println!(
                "    {GREEN}\u{2713}{RESET} slot {} {DIM}{}{RESET}",
                index + 1,
                key_fingerprint(key)
            );
        }
    }
    println!();

    println!("  {DIM}Model:{RESET} {}", config.model);
    println!("  {DIM}Upstream:{RESET} {}", config.api_url);
    println!();

    println!(
        "  {MAGENTA}\u{25b8}{RESET} Proxy listening on {BOLD}{}{RESET}",
        config.bind_addr
    );
    println!();
}

/// Log the same summary through tracing, for headless/file logs
pub fn log_startup(config: &Config) {
    tracing::info!("keywheel v{}", VERSION);
    tracing::info!(
        "{} key slot(s) configured, model {}",
        config.api_keys.len(),
        config.model
    );
    for (index, key) in config.api_keys.iter().enumerate() {
        tracing::info!("  slot {}: key {}", index + 1, key_fingerprint(key));
    }
    tracing::info!("Upstream: {}", config.api_url);
    tracing::info!("Listening on {}", config.bind_addr);
}
