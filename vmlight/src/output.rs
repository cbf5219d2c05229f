//! Fixed-width tables printed on stdout.

use vmlight_hypervisor::{ImageEntry, InstanceState, InstanceStatus, SshKey};

const GREEN: &str = "\x1b[1;32m";
const RED: &str = "\x1b[1;31m";
const YELLOW: &str = "\x1b[1;33m";
const RESET: &str = "\x1b[0m";

/// Instance state wrapped in terminal colours.
pub fn colored_state(state: InstanceState) -> String {
    let color = match state {
        InstanceState::Running => GREEN,
        InstanceState::Stopped => RED,
        InstanceState::Unknown => YELLOW,
    };
    format!("{}{}{}", color, state, RESET)
}

pub fn instance_table(statuses: &[InstanceStatus]) -> String {
    let mut out = format!("{:<6} {:<40} {:<15} {}\n", "ID", "NAME", "TYPE", "STATUS");
    for status in statuses {
        let instance = &status.instance;
        out.push_str(&format!(
            "{:<6} {:<40} {:<15} {}\n",
            instance.id,
            instance.name,
            instance.backend.as_str(),
            colored_state(status.state)
        ));
    }
    out
}

pub fn image_table(images: &[ImageEntry]) -> String {
    let mut out = format!("{:<4} {:<40} {}\n", "#", "NAME", "FORMAT");
    for (i, image) in images.iter().enumerate() {
        out.push_str(&format!("{:<4} {:<40} {}\n", i + 1, image.name, image.format));
    }
    out
}

pub fn key_table(keys: &[SshKey]) -> String {
    let mut out = format!("{:<4} {:<30} {:<15} {}\n", "#", "NAME", "TYPE", "KEY");
    for (i, key) in keys.iter().enumerate() {
        out.push_str(&format!(
            "{:<4} {:<30} {:<15} {}\n",
            i + 1,
            key.name,
            key.key_type,
            key.snippet()
        ));
    }
    out
}
