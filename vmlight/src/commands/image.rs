use anyhow::Result;

use super::Context;
use crate::cli::ImageArgs;
use crate::output::image_table;
use crate::preflight::require_root;

pub fn execute(args: ImageArgs, ctx: &Context) -> Result<()> {
    let store = ctx.images();

    if args.list {
        let images = store.list()?;
        if images.is_empty() {
            println!("No images in {}", store.dir().display());
        } else {
            print!("{}", image_table(&images));
        }
    } else if let Some(path) = args.add {
        require_root()?;
        let image = store.add(&path)?;
        println!("Image '{}' added ({})", image.name, image.format);
    } else if let Some(name) = args.remove {
        require_root()?;
        store.remove(&name)?;
        println!("Image '{}' removed", name);
    }
    Ok(())
}
