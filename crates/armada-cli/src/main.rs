mod args;
mod output;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use futures_util::future::join_all;
use serde::Serialize;

use armada_common::{DeviceProfile, PlanStore};
use armada_deploy::{DeployConfig, DeployContext, Orchestrator, StorageConfig};
use armada_discovery::{scan, AddressRange, PlatformProbe, ScanConfig, ServiceProber};
use armada_exec::{CredentialStore, DefaultExecutorFactory, ExecutorFactory};
use armada_locator::{refresh_fleet, DeviceLocator, LocatorConfig, SystemNetwork};
use armada_planner::{assign, validate};
use armada_registry::{ApiState, SelectionRequirements, ServiceRegistry};

use crate::args::{Args, Command, RegistryCommand};
use crate::output::{
    print_deploy_summary, print_health, print_instances, print_plan, print_profiles, print_refresh,
    print_registry_summary,
};

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn profile_hosts(hosts: &[String], factory: &dyn ExecutorFactory, timeout: Duration) -> Vec<DeviceProfile> {
    let probe = PlatformProbe::new(timeout);
    join_all(hosts.iter().map(|host| {
        let exec = factory.executor_for(&DeviceProfile::new(host.as_str(), host.as_str()));
        let probe = &probe;
        async move { probe.profile(exec.as_ref(), host).await }
    }))
    .await
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let otel = armada_common::telemetry::init_tracing(
        "armada",
        args.otlp_endpoint.as_deref(),
        args.otlp_token.as_deref(),
        &args.log_format,
    );

    let result = run(args).await;

    if let Some(provider) = otel {
        if let Err(e) = provider.shutdown() {
            eprintln!("failed to flush spans: {e}");
        }
    }
    result
}

async fn run(args: Args) -> Result<()> {
    let plan_store = PlanStore::new(&args.plan);

    match args.command {
        Command::Discover {
            range,
            kinds,
            concurrency,
            timeout_ms,
            register,
        } => {
            let range: AddressRange = range.parse().context("invalid address range")?;
            let config = ScanConfig {
                concurrency,
                probe_timeout: Duration::from_millis(timeout_ms),
                kinds,
                ..ScanConfig::default()
            };
            let found = scan(&range, &config).await;

            if register {
                let registry = ServiceRegistry::open(&args.registry)?;
                for inst in &found {
                    registry.register(inst.clone())?;
                }
            }
            if args.json {
                print_json(&found)?;
            } else {
                print_instances("Discovered Services", &found);
            }
        }
        Command::Profile { hosts, timeout_secs } => {
            let factory = DefaultExecutorFactory::new(CredentialStore::open(&args.credentials)?);
            let devices = profile_hosts(&hosts, &factory, Duration::from_secs(timeout_secs)).await;
            if args.json {
                print_json(&devices)?;
            } else {
                print_profiles(&devices);
            }
        }
        Command::Plan {
            hosts,
            timeout_secs,
            no_save,
        } => {
            let factory = DefaultExecutorFactory::new(CredentialStore::open(&args.credentials)?);
            let devices = profile_hosts(&hosts, &factory, Duration::from_secs(timeout_secs)).await;
            let plan = assign(devices);
            validate(&plan).context("generated plan is not deployable")?;

            if !no_save {
                plan_store.save(&plan)?;
                tracing::info!(path = %plan_store.path().display(), "plan saved");
            }
            if args.json {
                print_json(&plan.to_document())?;
            } else {
                print_plan(&plan);
            }
        }
        Command::Deploy {
            hosts,
            scripts_dir,
            remote_dir,
            tls,
            dry_run,
            no_shared_storage,
            step_timeout_secs,
        } => {
            let factory = Arc::new(DefaultExecutorFactory::new(CredentialStore::open(&args.credentials)?));
            let registry = Arc::new(ServiceRegistry::open(&args.registry)?);
            let config = DeployConfig {
                scripts_dir,
                remote_dir,
                tls_enabled: tls,
                dry_run,
                command_timeout: Duration::from_secs(step_timeout_secs),
                storage: StorageConfig {
                    enabled: !no_shared_storage,
                    ..StorageConfig::default()
                },
                ..DeployConfig::default()
            };
            let timeout = config.check_timeout;
            let orchestrator = Orchestrator::new(DeployContext::new(
                plan_store.clone(),
                registry,
                factory.clone(),
                config,
            ));

            let plan = if hosts.is_empty() {
                if !plan_store.exists() {
                    bail!(
                        "no plan at {}; run `armada plan <hosts>` or pass hosts to deploy",
                        plan_store.path().display()
                    );
                }
                orchestrator.load_plan()?
            } else {
                let devices = profile_hosts(&hosts, factory.as_ref(), timeout).await;
                orchestrator.plan_devices(devices)?
            };

            let summary = orchestrator.run(plan).await?;
            if args.json {
                print_json(&summary)?;
            } else {
                print_deploy_summary(&summary);
            }
        }
        Command::Registry { subcommand } => {
            let registry = ServiceRegistry::open(&args.registry)?;
            match subcommand {
                RegistryCommand::List { kind } => {
                    let instances = match kind {
                        Some(k) => registry.list_by_kind(k),
                        None => registry.list(),
                    };
                    if args.json {
                        print_json(&instances)?;
                    } else {
                        print_instances("Registered Services", &instances);
                        print_registry_summary(&registry.summary());
                    }
                }
                RegistryCommand::Select {
                    kind,
                    strategy,
                    min_free_vram_mb,
                    model,
                    max_load,
                    host,
                } => {
                    let req = SelectionRequirements {
                        min_free_vram_mb,
                        model,
                        max_load,
                        host,
                    };
                    match registry.select_instance(kind, &req, strategy) {
                        Some(inst) if args.json => print_json(&inst)?,
                        Some(inst) => println!("{} {}", inst.instance_id, inst.base_url()),
                        None => bail!("no healthy {kind} instance meets the requirements"),
                    }
                }
                RegistryCommand::Health { timeout_ms } => {
                    let prober = ServiceProber::new(Duration::from_millis(timeout_ms));
                    let mut results: Vec<(String, bool)> =
                        registry.health_check_all(&prober).await?.into_iter().collect();
                    results.sort();
                    if args.json {
                        print_json(&results)?;
                    } else {
                        print_health(&results);
                    }
                }
                RegistryCommand::Remove { instance_id } => {
                    if !registry.unregister(&instance_id)? {
                        bail!("no instance with id {instance_id}");
                    }
                    println!("✓ Removed {instance_id}");
                }
            }
        }
        Command::Relocate {
            sweep_budget_secs,
            no_network_map,
        } => {
            let config = LocatorConfig {
                sweep_budget: Duration::from_secs(sweep_budget_secs),
                use_network_map: !no_network_map,
                ..LocatorConfig::default()
            };
            let locator = DeviceLocator::new(SystemNetwork::default(), config);
            let mut credentials = CredentialStore::open(&args.credentials)?;
            let report = refresh_fleet(&locator, &plan_store, Some(&mut credentials)).await?;
            if args.json {
                print_json(&report)?;
            } else {
                print_refresh(&report);
            }
        }
        Command::Serve {
            listen_addr,
            strategy,
            health_interval_secs,
        } => {
            let registry = Arc::new(ServiceRegistry::open(&args.registry)?);

            if health_interval_secs > 0 {
                let registry = registry.clone();
                tokio::spawn(async move {
                    let prober = ServiceProber::default();
                    let mut tick = tokio::time::interval(Duration::from_secs(health_interval_secs));
                    loop {
                        tick.tick().await;
                        if let Err(e) = registry.health_check_all(&prober).await {
                            tracing::warn!(error = %e, "health sweep failed");
                        }
                    }
                });
            }

            let app = armada_registry::router(ApiState {
                registry,
                default_strategy: strategy,
            });
            let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
            tracing::info!(addr = %listen_addr, strategy = %strategy, "registry api listening");
            axum::serve(listener, app).await?;
        }
    }
    Ok(())
}
