use anyhow::Result;
use vmlight_hypervisor::StdinPrompt;

use super::Context;
use crate::cli::VmArgs;
use crate::output::{colored_state, instance_table};
use crate::preflight::require_root;

pub async fn execute(args: VmArgs, ctx: &Context) -> Result<()> {
    let manager = ctx.manager()?;

    if args.list {
        print!("{}", instance_table(&manager.list().await?));
        return Ok(());
    }

    if let Some(id) = args.status {
        let status = manager.status(id).await?;
        let instance = &status.instance;
        println!("ID:     {}", instance.id);
        println!("Name:   {}", instance.name);
        println!("Type:   {}", instance.backend);
        println!("Dir:    {}", instance.dir.display());
        println!("Status: {}", colored_state(status.state));
        return Ok(());
    }

    require_root()?;
    if let Some(id) = args.start {
        manager.start(id).await?;
        println!("Instance {} started", id);
    } else if let Some(id) = args.stop {
        manager.stop(id).await?;
        println!("Instance {} is shutting down", id);
    } else if let Some(id) = args.restart {
        manager.restart(id).await?;
        println!("Instance {} is rebooting", id);
    } else if let Some(id) = args.delete {
        manager.delete(id, &StdinPrompt).await?;
        println!("Instance {} deleted", id);
    }
    Ok(())
}
