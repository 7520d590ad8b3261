use std::path::PathBuf;

use clap::{Parser, Subcommand};

use armada_common::ServiceKind;
use armada_registry::Strategy;

#[derive(Debug, Parser)]
#[command(name = "armada", version)]
#[command(about = "Deploy and operate an AI service stack across a pool of machines", long_about = None)]
pub struct Args {
    /// Deployment plan file
    #[arg(long, global = true, env = "ARMADA_PLAN", default_value = "armada-plan.json")]
    pub plan: PathBuf,

    /// Service registry file
    #[arg(long, global = true, env = "ARMADA_REGISTRY", default_value = "armada-registry.json")]
    pub registry: PathBuf,

    /// Per-address login credentials (kept at mode 0600)
    #[arg(long, global = true, env = "ARMADA_CREDENTIALS", default_value = "armada-credentials.json")]
    pub credentials: PathBuf,

    /// Print JSON instead of tables
    #[arg(long, global = true)]
    pub json: bool,

    /// Log format: text or json
    #[arg(long, global = true, env = "ARMADA_LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// OTLP/HTTP base URL for span export
    #[arg(long, global = true, env = "OTEL_EXPORTER_OTLP_ENDPOINT")]
    pub otlp_endpoint: Option<String>,

    /// Bearer token for the OTLP endpoint
    #[arg(long, global = true, env = "OTEL_EXPORTER_OTLP_TOKEN")]
    pub otlp_token: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Scan an address range for running services
    Discover {
        /// CIDR block, address range (10.0.0.10-20) or comma-separated hosts
        range: String,
        /// Only look for these kinds
        #[arg(long, value_delimiter = ',')]
        kinds: Vec<ServiceKind>,
        /// Probes in flight at once
        #[arg(long, default_value_t = 20)]
        concurrency: usize,
        /// Per-probe timeout in milliseconds
        #[arg(long, default_value_t = 2000)]
        timeout_ms: u64,
        /// Add what was found to the registry
        #[arg(long)]
        register: bool,
    },
    /// Collect hardware profiles from devices
    Profile {
        /// Addresses or hostnames
        #[arg(required = true)]
        hosts: Vec<String>,
        /// Per-command timeout in seconds
        #[arg(long, default_value_t = 15)]
        timeout_secs: u64,
    },
    /// Profile devices, assign roles and services, and save the plan
    Plan {
        #[arg(required = true)]
        hosts: Vec<String>,
        #[arg(long, default_value_t = 15)]
        timeout_secs: u64,
        /// Print the plan without saving it
        #[arg(long)]
        no_save: bool,
    },
    /// Bring the stack up on every plan node
    Deploy {
        /// Plan these hosts first instead of loading the saved plan
        hosts: Vec<String>,
        /// One sub-directory of step scripts per unit
        #[arg(long, env = "ARMADA_SCRIPTS_DIR", default_value = "scripts")]
        scripts_dir: PathBuf,
        /// Where scripts are copied to on each node
        #[arg(long, default_value = "/tmp/armada")]
        remote_dir: String,
        /// Install TLS termination on the coordinator
        #[arg(long)]
        tls: bool,
        /// Log every step without running anything
        #[arg(long)]
        dry_run: bool,
        /// Skip the NFS shared directory
        #[arg(long)]
        no_shared_storage: bool,
        /// Timeout for install, configure and start steps, in seconds
        #[arg(long, default_value_t = 900)]
        step_timeout_secs: u64,
    },
    /// Inspect and maintain the service registry
    Registry {
        #[command(subcommand)]
        subcommand: RegistryCommand,
    },
    /// Check every plan node and follow the ones whose address changed
    Relocate {
        /// Wall-clock limit for the ping sweep, in seconds
        #[arg(long, default_value_t = 30)]
        sweep_budget_secs: u64,
        /// Do not fall back to an nmap host scan
        #[arg(long)]
        no_network_map: bool,
    },
    /// Serve the registry over HTTP and poll instance health
    Serve {
        #[arg(long, env = "ARMADA_LISTEN_ADDR", default_value = "0.0.0.0:18090")]
        listen_addr: String,
        /// Strategy used when a select request names none
        #[arg(long, default_value = "least_loaded")]
        strategy: Strategy,
        /// Seconds between health sweeps; 0 disables polling
        #[arg(long, default_value_t = 30)]
        health_interval_secs: u64,
    },
}

#[derive(Debug, Subcommand)]
pub enum RegistryCommand {
    /// List registered instances
    List {
        #[arg(long)]
        kind: Option<ServiceKind>,
    },
    /// Pick one healthy instance of a kind
    Select {
        kind: ServiceKind,
        #[arg(long, default_value = "least_loaded")]
        strategy: Strategy,
        #[arg(long)]
        min_free_vram_mb: Option<u64>,
        /// Instance must already serve this model
        #[arg(long)]
        model: Option<String>,
        /// Upper bound on reported load (0-1)
        #[arg(long)]
        max_load: Option<f64>,
        #[arg(long)]
        host: Option<String>,
    },
    /// Re-probe every instance and record the result
    Health {
        #[arg(long, default_value_t = 2000)]
        timeout_ms: u64,
    },
    /// Drop an instance by id
    Remove { instance_id: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_select_parses_kind_and_strategy() {
        let args = Args::try_parse_from([
            "armada",
            "--registry",
            "/tmp/r.json",
            "registry",
            "select",
            "ollama",
            "--strategy",
            "round-robin",
            "--model",
            "llama3",
        ])
        .unwrap();
        assert_eq!(args.registry, PathBuf::from("/tmp/r.json"));
        match args.command {
            Command::Registry {
                subcommand: RegistryCommand::Select { kind, strategy, model, .. },
            } => {
                assert_eq!(kind, ServiceKind::Ollama);
                assert_eq!(strategy, Strategy::RoundRobin);
                assert_eq!(model.as_deref(), Some("llama3"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        assert!(Args::try_parse_from(["armada", "registry", "list", "--kind", "mysql"]).is_err());
    }

    #[test]
    fn test_discover_kinds_are_comma_separated() {
        let args = Args::try_parse_from(["armada", "discover", "10.0.0.0/24", "--kinds", "redis,postgres"]).unwrap();
        match args.command {
            Command::Discover { range, kinds, .. } => {
                assert_eq!(range, "10.0.0.0/24");
                assert_eq!(kinds, vec![ServiceKind::Redis, ServiceKind::Postgres]);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
