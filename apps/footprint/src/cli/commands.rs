//! # CLI Command Implementations
//!
//! Each command opens the configured store, runs one engine operation and
//! prints the result, as text or as the HTTP API's JSON shapes.

use super::Backend;
use crate::api::{
    self,
    types::{
        AccrueResponse, ArchiveResponse, ChainResponse, CompleteResponse, InstanceJson,
        InstanceResponse, MemberJson, MemberResponse, SweepResponse,
    },
};
use crate::config::Config;
use crate::services::Services;
use footprint_core::{
    ChainId, FootprintError, InstanceId, InstanceView, NewChain, Outcome, Role, StorageBackend,
    UserId,
};
use serde::Serialize;
use std::path::PathBuf;

/// Global CLI options shared by every command.
#[derive(Debug, Clone)]
pub struct Context {
    pub database: PathBuf,
    pub backend: Backend,
    pub json_mode: bool,
}

impl Context {
    /// Open the configured store.
    pub fn open_store(&self) -> Result<StorageBackend, FootprintError> {
        match self.backend {
            Backend::Redb => StorageBackend::redb(&self.database),
            Backend::Memory => Ok(StorageBackend::default()),
        }
    }

    /// Open the store and wire the engine components to it.
    pub fn services(&self, config: &Config) -> Result<Services, FootprintError> {
        Ok(Services::new(self.open_store()?, config))
    }
}

fn print_json<T: Serialize>(value: &T) {
    println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
}

fn print_instance(view: &InstanceView) {
    let instance = &view.instance;
    println!("Instance {} ({})", instance.instance_id, instance.name);
    println!("==================");
    println!("Organization: {}", instance.organization);
    println!("Chain:        {}", instance.chain_id);
    println!("Stage:        {}", instance.stage);
    println!("Status:       {}", instance.status);
    println!(
        "Due:          {}",
        instance.timeline.stage_due.format("%Y-%m-%d %H:%M UTC")
    );
    println!("Session time: {} s", instance.session_duration);
    println!("Emissions:    {}", instance.carbon_emit);
    println!(
        "Progress:     {} / {} contributors",
        view.progress.completed, view.progress.total
    );
    if let Some(next) = instance.successor {
        println!("Successor:    {}", next);
    }
    println!();
    println!("Members:");
    for member in &view.members {
        let status = member
            .progress_status
            .map_or("-", |status| status.as_str());
        println!("  {:>8}  {:<7} {}", member.user_id, member.role, status);
    }
}

// =============================================================================
// SERVER COMMAND
// =============================================================================

/// Start the HTTP server.
pub async fn cmd_server(
    ctx: &Context,
    config: Config,
    host: Option<String>,
    port: Option<u16>,
) -> Result<(), FootprintError> {
    let services = ctx.services(&config)?;
    let host = host.unwrap_or_else(|| config.server.host.clone());
    let port = port.unwrap_or(config.server.port);

    println!("Footprint Server Starting...");
    println!();
    println!("Configuration:");
    println!("  Host:     {}", host);
    println!("  Port:     {}", port);
    println!("  Backend:  {}", ctx.backend.as_str());
    println!("  Database: {:?}", ctx.database);
    println!("  Sweep:    every {} s", config.server.sweep_interval_secs);
    println!();
    println!("Endpoints:");
    println!("  POST /chains                   - Create a chain");
    println!("  GET  /chains/{{id}}              - List a chain");
    println!("  GET  /instances/{{id}}           - Show an instance");
    println!("  POST /instances/{{id}}/members   - Add a member");
    println!("  POST /instances/{{id}}/complete  - Complete a stage");
    println!("  POST /instances/{{id}}/accrue    - Record a session");
    println!("  POST /instances/{{id}}/archive   - Archive an instance");
    println!("  POST /sweep                    - Run a completion sweep");
    println!("  GET  /health                   - Health check");
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let addr = format!("{}:{}", host, port);
    api::run_server(&addr, services, config.server.sweep_interval_secs).await
}

// =============================================================================
// INIT COMMAND
// =============================================================================

/// Initialize a new database.
pub fn cmd_init(ctx: &Context, force: bool) -> Result<(), FootprintError> {
    match ctx.backend {
        Backend::Memory => {
            println!("Memory backend needs no initialization");
            Ok(())
        }
        Backend::Redb => {
            if ctx.database.exists() {
                if !force {
                    return Err(FootprintError::InvalidInput(
                        "Database already exists. Use --force to overwrite.".to_string(),
                    ));
                }
                std::fs::remove_file(&ctx.database).map_err(|e| {
                    FootprintError::Io(format!("Cannot remove {:?}: {}", ctx.database, e))
                })?;
            }
            let _store = StorageBackend::redb(&ctx.database)?;
            println!("Initialized new redb database at {:?}", ctx.database);
            Ok(())
        }
    }
}

// =============================================================================
// CHAIN COMMANDS
// =============================================================================

/// Create a chain at its first stage.
pub fn cmd_create_chain(
    ctx: &Context,
    config: &Config,
    creator: u64,
    organization: String,
    name: String,
    description: String,
    members: Vec<(u64, Role)>,
) -> Result<(), FootprintError> {
    let services = ctx.services(config)?;
    let view = services.engine.create_chain(&NewChain {
        organization,
        name,
        description,
        creator: UserId(creator),
        members: members
            .into_iter()
            .map(|(user, role)| (UserId(user), role))
            .collect(),
    })?;

    if ctx.json_mode {
        print_json(&InstanceResponse::from(&view));
    } else {
        println!(
            "Created chain {} with instance {}",
            view.instance.chain_id, view.instance.instance_id
        );
        println!();
        print_instance(&view);
    }
    Ok(())
}

/// List every instance of a chain.
pub fn cmd_chain(ctx: &Context, config: &Config, chain: u64) -> Result<(), FootprintError> {
    let services = ctx.services(config)?;
    let instances = services.engine.chain(ChainId(chain))?;

    if ctx.json_mode {
        print_json(&ChainResponse::new(chain, &instances));
        return Ok(());
    }

    println!("Chain {}", chain);
    println!("==================");
    for instance in &instances {
        println!(
            "  {:>8}  {:<12} {:<12} {}",
            instance.instance_id, instance.stage, instance.status, instance.carbon_emit
        );
    }
    Ok(())
}

// =============================================================================
// INSTANCE COMMANDS
// =============================================================================

/// Show an instance with roster and progress.
pub fn cmd_show(ctx: &Context, config: &Config, instance: u64) -> Result<(), FootprintError> {
    let services = ctx.services(config)?;
    let view = services.engine.instance_view(InstanceId(instance))?;
    if ctx.json_mode {
        print_json(&InstanceResponse::from(&view));
    } else {
        print_instance(&view);
    }
    Ok(())
}

/// Add a member on the inviter's authority.
pub fn cmd_add_member(
    ctx: &Context,
    config: &Config,
    instance: u64,
    inviter: u64,
    user: u64,
    role: Role,
) -> Result<(), FootprintError> {
    let services = ctx.services(config)?;
    let member =
        services
            .engine
            .add_member(InstanceId(instance), UserId(inviter), UserId(user), role)?;

    if ctx.json_mode {
        print_json(&MemberResponse {
            success: true,
            member: MemberJson::from(&member),
        });
    } else {
        println!(
            "Added user {} as {} to instance {}",
            member.user_id, member.role, instance
        );
    }
    Ok(())
}

/// Complete a user's part of the current stage.
pub fn cmd_complete(
    ctx: &Context,
    config: &Config,
    instance: u64,
    user: u64,
) -> Result<(), FootprintError> {
    let services = ctx.services(config)?;
    let outcome = services
        .engine
        .complete_stage(InstanceId(instance), UserId(user))?;

    if ctx.json_mode {
        print_json(&CompleteResponse::from(outcome));
        return Ok(());
    }

    match outcome {
        Outcome::UserStageCompleted { instance, progress } => println!(
            "Stage part recorded on instance {} ({} / {} contributors done)",
            instance, progress.completed, progress.total
        ),
        Outcome::StageAdvanced {
            from,
            instance,
            stage,
        } => println!(
            "Stage advanced: instance {} -> instance {} ({})",
            from, instance, stage
        ),
        Outcome::ProjectCompleted { instance, chain } => println!(
            "Project completed: chain {} finished on instance {}",
            chain, instance
        ),
    }
    Ok(())
}

/// Apply a session-stop event.
pub fn cmd_accrue(
    ctx: &Context,
    config: &Config,
    instance: u64,
    user: u64,
    seconds: u64,
) -> Result<(), FootprintError> {
    let services = ctx.services(config)?;
    let accrual = services
        .estimator
        .accrue(InstanceId(instance), UserId(user), seconds)?;

    if ctx.json_mode {
        print_json(&AccrueResponse::from(&accrual));
        return Ok(());
    }

    println!(
        "Recorded {} s on {} ({}) for instance {}",
        accrual.elapsed_seconds,
        accrual.device,
        accrual.power.total(),
        instance
    );
    println!("  This session: {}", accrual.delta.carbon);
    println!("  Instance:     {}", accrual.instance.carbon_emit);
    Ok(())
}

/// Estimate emissions for a user's device without recording anything.
pub fn cmd_estimate(
    ctx: &Context,
    config: &Config,
    user: u64,
    seconds: u64,
) -> Result<(), FootprintError> {
    let services = ctx.services(config)?;
    let (class, power, emissions) = services.estimator.estimate_for(UserId(user), seconds)?;

    if ctx.json_mode {
        print_json(&serde_json::json!({
            "user_id": user,
            "device": class.as_str(),
            "power_mw": power.total().value(),
            "elapsed_seconds": seconds,
            "energy_mwh": emissions.energy.value(),
            "carbon_ug": emissions.carbon.micrograms(),
            "carbon_kg": emissions.carbon.kilograms(),
            "grams_per_kwh": services.estimator.factor().grams_per_kwh,
        }));
        return Ok(());
    }

    println!("Device:    {}", class);
    println!("  CPU:     {}", power.cpu);
    println!("  GPU:     {}", power.gpu);
    println!("  RAM:     {}", power.ram);
    if let Some(psu) = power.psu {
        println!("  PSU:     {}", psu);
    }
    println!("  Total:   {}", power.total());
    println!(
        "Energy:    {} Wh over {} s",
        emissions.energy.watt_hours(),
        seconds
    );
    println!("Emissions: {}", emissions.carbon);
    Ok(())
}

/// Archive an instance.
pub fn cmd_archive(
    ctx: &Context,
    config: &Config,
    instance: u64,
    user: u64,
) -> Result<(), FootprintError> {
    let services = ctx.services(config)?;
    let archived = services
        .engine
        .archive(InstanceId(instance), UserId(user))?;

    if ctx.json_mode {
        print_json(&ArchiveResponse {
            success: true,
            instance: InstanceJson::from(&archived),
        });
    } else {
        println!("Archived instance {}", archived.instance_id);
    }
    Ok(())
}

// =============================================================================
// SWEEP COMMAND
// =============================================================================

/// Finalize every instance whose contributors are all done.
pub fn cmd_sweep(ctx: &Context, config: &Config) -> Result<(), FootprintError> {
    let services = ctx.services(config)?;
    let report = services.engine.sweep()?;

    if ctx.json_mode {
        print_json(&SweepResponse::from(report));
    } else {
        println!(
            "Sweep: {} scanned, {} advanced, {} completed, {} failed",
            report.scanned, report.advanced, report.completed, report.failed
        );
    }
    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================
