use crate::support::{assemble_or_exit, fail, joined, print_json};
use tessera_kernel::{CapabilityId, RuntimeConfig};

pub fn run(config: RuntimeConfig, capability: String, json_output: bool) {
    let assembly = assemble_or_exit(config);
    let model = assembly
        .module
        .model(&CapabilityId::new(&capability))
        .unwrap_or_else(|e| fail(format!("[{}] {e}", e.failure_class())));

    if json_output {
        print_json(&model.projection());
        return;
    }

    let class_at = |index: &usize| {
        model
            .fragment(*index)
            .map(|plan| plan.class.to_string())
            .unwrap_or_default()
    };
    println!("tessera plan {capability}");
    println!("  Module: {}", assembly.module.name());
    println!("  Digest: {}", model.digest);
    println!("  Closure: {}", joined(&model.closure));
    println!("  Methods:");
    for plan in &model.methods {
        println!("    {} (declared on {})", plan.signature, plan.declared_on);
        println!("      implementation: {}", class_at(&plan.implementation));
        if !plan.wrappers.is_empty() {
            println!("      wrappers: {}", joined(plan.wrappers.iter().map(class_at)));
        }
        if !plan.post_calls.is_empty() {
            println!("      post-calls: {}", joined(plan.post_calls.iter().map(class_at)));
        }
    }
    println!("  Fragments: {}", model.fragments.len());
}
