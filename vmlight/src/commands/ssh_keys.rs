use anyhow::Result;

use super::Context;
use crate::cli::SshKeysArgs;
use crate::output::key_table;
use crate::preflight::require_root;

pub fn execute(args: SshKeysArgs, ctx: &Context) -> Result<()> {
    let store = ctx.keys();

    if args.list {
        let keys = store.list()?;
        if keys.is_empty() {
            println!("No SSH keys in {}", store.path().display());
        } else {
            print!("{}", key_table(&keys));
        }
    } else if let Some(line) = args.add {
        require_root()?;
        let key = store.add(&line)?;
        println!("Key '{}' added", key.name);
    } else if let Some(file) = args.add_file {
        require_root()?;
        for key in store.add_file(&file)? {
            println!("Key '{}' added", key.name);
        }
    } else if let Some(name) = args.remove {
        require_root()?;
        store.remove(&name)?;
        println!("Key '{}' removed", name);
    }
    Ok(())
}
