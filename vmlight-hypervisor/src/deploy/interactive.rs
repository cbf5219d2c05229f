//! Interactive completion of a deployment request.

use std::io::{BufRead, Write};

use crate::error::{HypervisorError, Result};
use crate::images::ImageStore;
use crate::ssh_keys::SshKeyStore;
use crate::types::DeployRequest;

/// Line-oriented operator dialogue.
pub trait Prompt: Send + Sync {
    /// Print `question` and read one line, without the trailing newline.
    fn ask(&self, question: &str) -> Result<String>;

    /// Print an informational line.
    fn say(&self, message: &str);
}

/// Prompt on the process's stdin/stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdinPrompt;

impl Prompt for StdinPrompt {
    fn ask(&self, question: &str) -> Result<String> {
        let mut stdout = std::io::stdout();
        write!(stdout, "{}", question)
            .and_then(|_| stdout.flush())
            .map_err(|e| HypervisorError::io("Failed to write prompt", e))?;

        let mut line = String::new();
        let read = std::io::stdin()
            .lock()
            .read_line(&mut line)
            .map_err(|e| HypervisorError::io("Failed to read answer", e))?;
        if read == 0 {
            return Err(HypervisorError::InvalidRequest(
                "input closed before the question was answered".to_string(),
            ));
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    fn say(&self, message: &str) {
        println!("{}", message);
    }
}

/// Fields already supplied on the command line.
#[derive(Debug, Clone, Default)]
pub struct PartialRequest {
    pub name: Option<String>,
    pub image: Option<String>,
    pub ip: Option<String>,
    pub disk_size: Option<String>,
    pub memory_mib: Option<u32>,
    pub vcpus: Option<u32>,
    pub ssh_keys: Vec<String>,
}

/// Values offered when the operator just presses Enter.
#[derive(Debug, Clone)]
pub struct RequestDefaults {
    pub disk_size: String,
    pub memory_mib: u32,
    pub vcpus: u32,
}

/// Ask for every field missing from `partial`.
///
/// Images and keys are chosen by number from the stores' listings; keys are
/// asked for repeatedly until an empty answer.
pub fn gather_request(
    prompt: &dyn Prompt,
    images: &ImageStore,
    keys: &SshKeyStore,
    defaults: &RequestDefaults,
    partial: PartialRequest,
) -> Result<DeployRequest> {
    let name = match partial.name {
        Some(name) => name,
        None => prompt.ask("Please enter a name for the instance: ")?,
    };

    let image = match partial.image {
        Some(image) => image,
        None => {
            let available = images.list()?;
            if available.is_empty() {
                return Err(HypervisorError::InvalidRequest("No images available".to_string()));
            }
            prompt.say("Available images:");
            for (i, entry) in available.iter().enumerate() {
                prompt.say(&format!("  {}. {} ({})", i + 1, entry.name, entry.format));
            }
            let choice = choose(prompt, "Please select an image by number: ", available.len())?;
            available[choice].name.clone()
        }
    };

    let ip = match partial.ip {
        Some(ip) => ip,
        None => prompt.ask("Please give the instance an IP address: ")?,
    };

    let mut ssh_keys = partial.ssh_keys;
    if ssh_keys.is_empty() {
        let available = keys.list()?;
        if available.is_empty() {
            prompt.say("No SSH keys available, skipping SSH key selection.");
        } else {
            prompt.say("Available SSH keys:");
            for (i, key) in available.iter().enumerate() {
                prompt.say(&format!("  {}. {} ({})", i + 1, key.name, key.key_type));
            }
            loop {
                let answer = prompt
                    .ask("Please select an SSH key by number (or press Enter to continue): ")?;
                if answer.trim().is_empty() {
                    break;
                }
                match parse_choice(&answer, available.len()) {
                    Some(i) if !ssh_keys.contains(&available[i].name) => {
                        ssh_keys.push(available[i].name.clone())
                    }
                    Some(_) => prompt.say("Key already selected."),
                    None => prompt.say(&format!("Enter a number between 1 and {}.", available.len())),
                }
            }
        }
    }

    let disk_size = match partial.disk_size {
        Some(size) => size,
        None => ask_or_default(
            prompt,
            &format!("Please enter the disk size (default: {}): ", defaults.disk_size),
            defaults.disk_size.clone(),
        )?,
    };

    let memory_mib = match partial.memory_mib {
        Some(memory) => memory,
        None => ask_number(
            prompt,
            &format!("Please enter the amount of memory (default: {}): ", defaults.memory_mib),
            defaults.memory_mib,
        )?,
    };

    let vcpus = match partial.vcpus {
        Some(vcpus) => vcpus,
        None => ask_number(
            prompt,
            &format!("Please enter the number of vcpus (default: {}): ", defaults.vcpus),
            defaults.vcpus,
        )?,
    };

    prompt.say("Thank you for the information!");

    Ok(DeployRequest {
        name,
        image,
        ip,
        disk_size,
        memory_mib,
        vcpus,
        ssh_keys,
    })
}

/// 1-based menu answer to a 0-based index.
fn parse_choice(answer: &str, len: usize) -> Option<usize> {
    match answer.trim().parse::<usize>() {
        Ok(n) if n >= 1 && n <= len => Some(n - 1),
        _ => None,
    }
}

fn choose(prompt: &dyn Prompt, question: &str, len: usize) -> Result<usize> {
    loop {
        if let Some(index) = parse_choice(&prompt.ask(question)?, len) {
            return Ok(index);
        }
        prompt.say(&format!("Enter a number between 1 and {}.", len));
    }
}

fn ask_or_default(prompt: &dyn Prompt, question: &str, default: String) -> Result<String> {
    let answer = prompt.ask(question)?;
    let answer = answer.trim();
    Ok(if answer.is_empty() {
        default
    } else {
        answer.to_string()
    })
}

fn ask_number(prompt: &dyn Prompt, question: &str, default: u32) -> Result<u32> {
    loop {
        let answer = prompt.ask(question)?;
        let answer = answer.trim();
        if answer.is_empty() {
            return Ok(default);
        }
        match answer.parse::<u32>() {
            Ok(value) if value > 0 => return Ok(value),
            _ => prompt.say("Enter a positive number."),
        }
    }
}
