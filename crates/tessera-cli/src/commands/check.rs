use crate::support::{assemble_or_exit, print_json};
use serde::Serialize;
use tessera_kernel::RuntimeConfig;

#[derive(Debug, Serialize)]
struct CapabilityReport {
    capability: String,
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    methods: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    fragments: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    digest: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    failure_class: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

pub fn run(config: RuntimeConfig, json_output: bool) {
    let assembly = assemble_or_exit(config);
    let reports: Vec<CapabilityReport> = assembly
        .module
        .compile_all()
        .into_iter()
        .map(|(capability, result)| match result {
            Ok(model) => CapabilityReport {
                capability: capability.to_string(),
                ok: true,
                methods: Some(model.methods.len()),
                fragments: Some(model.fragments.len()),
                digest: Some(model.digest.clone()),
                failure_class: None,
                message: None,
            },
            Err(err) => CapabilityReport {
                capability: capability.to_string(),
                ok: false,
                methods: None,
                fragments: None,
                digest: None,
                failure_class: Some(err.failure_class()),
                message: Some(err.to_string()),
            },
        })
        .collect();
    let failed = reports.iter().filter(|report| !report.ok).count();

    if json_output {
        print_json(&serde_json::json!({
            "module": assembly.module.name(),
            "capability_count": reports.len(),
            "failed_count": failed,
            "capabilities": reports,
        }));
    } else {
        println!("tessera check");
        println!("  Module: {}", assembly.module.name());
        for report in &reports {
            match (&report.digest, &report.message) {
                (Some(digest), _) => println!(
                    "  {}: ok ({} methods, {} fragments, {digest})",
                    report.capability,
                    report.methods.unwrap_or_default(),
                    report.fragments.unwrap_or_default()
                ),
                (None, message) => println!(
                    "  {}: FAILED {}",
                    report.capability,
                    message.as_deref().unwrap_or_default()
                ),
            }
        }
    }

    if failed > 0 {
        std::process::exit(1);
    }
}
