use crate::support::{assemble_or_exit, fail, parse_arguments, print_json};
use serde_json::json;
use tessera_kernel::{RuntimeConfig, Uses};
use tracing::debug;

pub fn run(config: RuntimeConfig, capability: String, method: String, raw_args: Vec<String>, json_output: bool) {
    let assembly = assemble_or_exit(config);
    let composite = assembly
        .module
        .new_composite(capability.as_str(), Uses::new())
        .unwrap_or_else(|e| fail(format!("[{}] {e}", e.failure_class())));
    let args = parse_arguments(&raw_args);
    debug!(capability = %capability, method = %method, args = args.len(), "invoking");

    let result = composite.invoke(&method, &args);
    let audit = assembly.audit.entries();

    if json_output {
        let payload = match &result {
            Ok(value) => json!({
                "capability": capability,
                "method": method,
                "ok": true,
                "result": value,
                "audit": audit,
            }),
            Err(err) => json!({
                "capability": capability,
                "method": method,
                "ok": false,
                "failure_class": err.failure_class(),
                "message": err.to_string(),
                "violations": err.violation().map(|v| v.violations.clone()).unwrap_or_default(),
                "audit": audit,
            }),
        };
        print_json(&payload);
    } else {
        println!("tessera invoke {capability}.{method}");
        match &result {
            Ok(value) => println!("  Result: {value}"),
            Err(err) => println!("  Failed [{}]: {err}", err.failure_class()),
        }
        for entry in &audit {
            println!(
                "  Audit: {}.{} {}",
                entry.capability,
                entry.method,
                if entry.succeeded { "ok" } else { "failed" }
            );
        }
    }

    if result.is_err() {
        std::process::exit(1);
    }
}
