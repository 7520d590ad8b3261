use std::collections::BTreeMap;

use armada_common::{DeploymentPlan, DeviceProfile, ServiceInstance, ServiceKind};
use armada_deploy::DeploySummary;
use armada_locator::{NodeRefresh, RefreshOutcome};
use armada_registry::KindSummary;

fn join<T: std::fmt::Display>(items: impl IntoIterator<Item = T>) -> String {
    let out: Vec<String> = items.into_iter().map(|i| i.to_string()).collect();
    if out.is_empty() {
        "-".to_string()
    } else {
        out.join(",")
    }
}

pub fn print_instances(title: &str, instances: &[ServiceInstance]) {
    println!("\n=== {title} ===\n");
    if instances.is_empty() {
        println!("No services found.");
        return;
    }
    println!(
        "{:<36} {:<11} {:<22} {:<10} {:>6} {:<8}",
        "Instance", "Service", "Endpoint", "Health", "Load", "Models"
    );
    println!("{:-<98}", "");
    for s in instances {
        println!(
            "{:<36} {:<11} {:<22} {:<10} {:>6.2} {:<8}",
            s.instance_id,
            s.service_type.as_str(),
            format!("{}:{}", s.host, s.port),
            s.health_status.as_str(),
            s.current_load,
            s.capabilities.model_count
        );
    }
    println!();
}

pub fn print_profiles(devices: &[DeviceProfile]) {
    println!("\n=== Device Profiles ===\n");
    println!(
        "{:<18} {:<16} {:<8} {:>5} {:>8} {:>8} {:>9} {:>6}",
        "Hostname", "Address", "OS", "Cores", "RAM GB", "VRAM GB", "Disk GB", "Score"
    );
    println!("{:-<86}", "");
    for d in devices {
        println!(
            "{:<18} {:<16} {:<8} {:>5} {:>8.1} {:>8.1} {:>9.0} {:>6.1}",
            d.hostname,
            d.address,
            format!("{:?}", d.os.os_type).to_lowercase(),
            d.cpu.cores,
            d.ram.total_gb,
            d.gpu.vram_total_gb,
            d.disk.total_gb,
            d.capability_score()
        );
    }
    println!();
}

pub fn print_plan(plan: &DeploymentPlan) {
    println!("\n=== Deployment Plan ===\n");
    if let Some(c) = plan.coordinator_node() {
        println!("  Coordinator: {} ({})", c.device.hostname, c.device.address);
    }
    println!("  Nodes:       {}\n", plan.nodes.len());
    println!("{:<18} {:<16} {:<30} {:<40}", "Hostname", "Address", "Roles", "Services");
    println!("{:-<104}", "");
    for n in &plan.nodes {
        println!(
            "{:<18} {:<16} {:<30} {:<40}",
            n.device.hostname,
            n.device.address,
            join(&n.roles),
            join(&n.services)
        );
    }
    println!();
}

pub fn print_deploy_summary(summary: &DeploySummary) {
    let title = if summary.dry_run { "Deployment (dry run)" } else { "Deployment Summary" };
    println!("\n=== {title} ===\n");
    println!("[Nodes]");
    println!("  {:<18} {:<16} {:<30} {:<8}", "Hostname", "Address", "Roles", "Storage");
    for n in &summary.nodes {
        println!(
            "  {:<18} {:<16} {:<30} {:<8}",
            n.hostname,
            n.address,
            join(&n.roles),
            n.storage.to_string()
        );
    }

    println!("\n[Services]");
    if summary.services.is_empty() {
        println!("  (none registered)");
    } else {
        println!("  {:<11} {:<30} {:<10} {:<8}", "Service", "Endpoint", "Health", "Origin");
        for s in &summary.services {
            println!(
                "  {:<11} {:<30} {:<10} {:<8}",
                s.service.as_str(),
                s.endpoint,
                s.health.as_str(),
                if s.newly_deployed { "new" } else { "existing" }
            );
        }
    }
    println!();
}

pub fn print_registry_summary(summary: &BTreeMap<ServiceKind, KindSummary>) {
    println!("[Summary]");
    for (kind, s) in summary {
        println!("  {:<11} {}/{} healthy", kind.as_str(), s.healthy, s.total);
    }
    println!();
}

pub fn print_health(results: &[(String, bool)]) {
    println!("\n=== Health Check ===\n");
    if results.is_empty() {
        println!("No services registered.");
        return;
    }
    for (id, ok) in results {
        println!("  {} {}", if *ok { "✓" } else { "✗" }, id);
    }
    println!();
}

pub fn print_refresh(report: &[NodeRefresh]) {
    println!("\n=== Fleet ===\n");
    println!("{:<18} {:<16} {:<30}", "Hostname", "Address", "Status");
    println!("{:-<64}", "");
    for r in report {
        let status = match &r.outcome {
            RefreshOutcome::Reachable => "reachable".to_string(),
            RefreshOutcome::PortClosed => "present, remote access closed".to_string(),
            RefreshOutcome::Relocated { new_address } => format!("moved to {new_address}"),
            RefreshOutcome::Lost => "NOT FOUND".to_string(),
        };
        println!("{:<18} {:<16} {:<30}", r.hostname, r.address, status);
    }
    println!();
}
