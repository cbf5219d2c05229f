use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use tracing::warn;
use vmlight_hypervisor::{
    gather_request, DeployObserver, DeployRequest, DeployStep, HypervisorError, PartialRequest,
    RequestDefaults, StdinPrompt,
};

use super::Context;
use crate::cli::DeployArgs;
use crate::preflight::{require_binaries, require_root, DEPLOY_BINARIES};

/// Prints each step and stops before the next one once SIGINT arrived.
struct Progress {
    interrupted: Arc<AtomicBool>,
}

impl DeployObserver for Progress {
    fn on_step(&self, step: DeployStep) -> vmlight_hypervisor::Result<()> {
        if self.interrupted.load(Ordering::SeqCst) {
            return Err(HypervisorError::Interrupted(step.description()));
        }
        println!("{}", step.description());
        Ok(())
    }
}

pub async fn execute(args: DeployArgs, ctx: &Context) -> Result<()> {
    require_root()?;
    require_binaries(&DEPLOY_BINARIES)?;

    // Resolve the adapter before asking anything.
    let deployer = ctx.deployer()?;
    let request = build_request(args, ctx)?;

    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = interrupted.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current step");
            flag.store(true, Ordering::SeqCst);
        }
    });

    println!("Deploying instance '{}'", request.name);
    match deployer.deploy(&request, &Progress { interrupted }).await {
        Ok(instance) => {
            println!(
                "Deployment complete! Instance '{}' has ID {}",
                instance.full_name(),
                instance.id
            );
            Ok(())
        }
        Err(e) => {
            println!("An error occurred during deployment, changes were rolled back");
            Err(e.into())
        }
    }
}

fn build_request(args: DeployArgs, ctx: &Context) -> Result<DeployRequest> {
    let defaults = RequestDefaults {
        disk_size: ctx.config.deploy.disk_size.clone(),
        memory_mib: ctx.config.deploy.memory,
        vcpus: ctx.config.deploy.vcpus,
    };
    let partial = PartialRequest {
        name: args.name,
        image: args.image,
        ip: args.ip,
        disk_size: args.disk_size,
        memory_mib: args.memory,
        vcpus: args.vcpus,
        ssh_keys: args.ssh_keys,
    };

    if args.interactive {
        return Ok(gather_request(
            &StdinPrompt,
            &ctx.images(),
            &ctx.keys(),
            &defaults,
            partial,
        )?);
    }

    match (partial.name, partial.image, partial.ip) {
        (Some(name), Some(image), Some(ip)) => Ok(DeployRequest {
            name,
            image,
            ip,
            disk_size: partial.disk_size.unwrap_or(defaults.disk_size),
            memory_mib: partial.memory_mib.unwrap_or(defaults.memory_mib),
            vcpus: partial.vcpus.unwrap_or(defaults.vcpus),
            ssh_keys: partial.ssh_keys,
        }),
        _ => anyhow::bail!(
            "The following arguments are required for non-interactive mode: --name, --image, --ip"
        ),
    }
}
