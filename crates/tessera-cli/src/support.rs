use serde::Serialize;
use serde_json::Value;
use std::fmt::Display;
use tessera_kernel::RuntimeConfig;
use tessera_samples::{Assembly, assemble_default};
use tracing_subscriber::EnvFilter;

/// Environment variable overriding the configured log filter.
pub const LOG_ENV: &str = "TESSERA_LOG";

pub fn fail(message: impl Display) -> ! {
    eprintln!("error: {message}");
    std::process::exit(1);
}

pub fn load_config_or_exit(path: Option<&str>) -> RuntimeConfig {
    match path {
        Some(path) => RuntimeConfig::load(path).unwrap_or_else(|e| fail(e)),
        None => RuntimeConfig::default(),
    }
}

/// Logs go to stderr so `--json` output stays parseable.
pub fn init_tracing(config: &RuntimeConfig) {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(&config.log_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

pub fn assemble_or_exit(config: RuntimeConfig) -> Assembly {
    assemble_default(config).unwrap_or_else(|e| fail(format!("[{}] {e}", e.failure_class())))
}

/// Each raw argument as JSON, or as a plain string when it does not parse.
pub fn parse_arguments(raw: &[String]) -> Vec<Value> {
    raw.iter()
        .map(|arg| serde_json::from_str(arg).unwrap_or_else(|_| Value::String(arg.clone())))
        .collect()
}

pub fn print_json(payload: &impl Serialize) {
    match serde_json::to_string_pretty(payload) {
        Ok(rendered) => println!("{rendered}"),
        Err(e) => fail(format!("json serialization: {e}")),
    }
}

pub fn joined<I, T>(items: I) -> String
where
    I: IntoIterator<Item = T>,
    T: Display,
{
    items
        .into_iter()
        .map(|item| item.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
