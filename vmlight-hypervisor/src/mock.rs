//! Test doubles for host tools and the operator prompt.

use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::debug;

use crate::command::{CommandRunner, ToolCommand};
use crate::deploy::Prompt;
use crate::error::{HypervisorError, Result};

/// Header line printed by `xl list`.
pub const XL_LIST_HEADER: &str =
    "Name                                        ID   Mem VCPUs\tState\tTime(s)";

/// Mock runner that simulates the host tools in memory.
///
/// It records every command and reproduces just enough of each tool's
/// behaviour to drive a full deployment inside a temporary directory:
/// - `qemu-img convert` copies the source file to the destination
/// - `qemu-img info` reports a configurable virtual size
/// - `guestmount` requires the mount point to exist
/// - `umount` captures the files written below the mount point, then empties it
/// - `xl list` prints a configurable listing
///
/// Any command whose command line contains a registered failure pattern
/// exits with status 1.
pub struct MockRunner {
    state: Mutex<MockState>,
}

struct MockState {
    calls: Vec<ToolCommand>,
    failures: Vec<String>,
    image_virtual_size: u64,
    xl_list: String,
    guest_files: BTreeMap<String, String>,
}

impl MockRunner {
    /// Create a new mock runner with an empty `xl list` and 2 GiB images.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                calls: Vec::new(),
                failures: Vec::new(),
                image_virtual_size: 2 << 30,
                xl_list: format!(
                    "{}\nDomain-0                                     0  2048     4     r-----     812.4\n",
                    XL_LIST_HEADER
                ),
                guest_files: BTreeMap::new(),
            }),
        }
    }

    /// Fail every command whose command line contains `pattern`.
    pub fn fail_on(self, pattern: impl Into<String>) -> Self {
        self.lock().failures.push(pattern.into());
        self
    }

    /// Virtual size reported by `qemu-img info`.
    pub fn with_image_size(self, bytes: u64) -> Self {
        self.lock().image_virtual_size = bytes;
        self
    }

    /// Replace the rows printed by `xl list` (the header is added).
    pub fn set_domains(&self, rows: &[&str]) {
        let mut listing = format!("{}\n", XL_LIST_HEADER);
        for row in rows {
            listing.push_str(row);
            listing.push('\n');
        }
        self.lock().xl_list = listing;
    }

    /// Command lines run so far.
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.iter().map(ToString::to_string).collect()
    }

    /// Whether any recorded command is `program` with `subcommand` as first argument.
    pub fn ran(&self, program: &str, subcommand: &str) -> bool {
        self.lock().calls.iter().any(|c| {
            c.program_name() == program && c.args.first().map(String::as_str) == Some(subcommand)
        })
    }

    /// Files that were present below a mount point when it was unmounted,
    /// keyed by their path relative to the mount point.
    pub fn guest_files(&self) -> BTreeMap<String, String> {
        self.lock().guest_files.clone()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn simulate(&self, command: &ToolCommand) -> Result<String> {
        let fail = |reason: &str| HypervisorError::CommandFailed {
            command: command.to_string(),
            code: Some(1),
            stderr: reason.to_string(),
        };
        let args = &command.args;

        match (command.program_name(), args.first().map(String::as_str)) {
            ("qemu-img", Some("convert")) => {
                let (src, dst) = match args.as_slice() {
                    [.., src, dst] => (src, dst),
                    _ => return Err(fail("missing operands")),
                };
                std::fs::copy(src, dst).map_err(|e| fail(&e.to_string()))?;
                Ok(String::new())
            }
            ("qemu-img", Some("info")) => {
                let size = self.lock().image_virtual_size;
                Ok(format!(
                    "{{\"virtual-size\": {}, \"format\": \"qcow2\", \"actual-size\": 196616}}",
                    size
                ))
            }
            ("guestmount", _) => {
                let mount_point = args.last().ok_or_else(|| fail("missing mount point"))?;
                if !Path::new(mount_point).is_dir() {
                    return Err(fail("mount point does not exist"));
                }
                Ok(String::new())
            }
            ("umount", _) => {
                let mount_point = PathBuf::from(args.last().ok_or_else(|| fail("missing target"))?);
                let mut captured = BTreeMap::new();
                collect_files(&mount_point, &mount_point, &mut captured)
                    .map_err(|e| fail(&e.to_string()))?;
                std::fs::remove_dir_all(&mount_point).map_err(|e| fail(&e.to_string()))?;
                std::fs::create_dir(&mount_point).map_err(|e| fail(&e.to_string()))?;
                self.lock().guest_files.extend(captured);
                Ok(String::new())
            }
            ("xl", Some("list")) => Ok(self.lock().xl_list.clone()),
            _ => Ok(String::new()),
        }
    }
}

impl Default for MockRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandRunner for MockRunner {
    async fn run(&self, command: &ToolCommand) -> Result<String> {
        debug!(command = %command, "Mock command");

        let line = command.to_string();
        let should_fail = {
            let mut state = self.lock();
            state.calls.push(command.clone());
            state.failures.iter().any(|pattern| line.contains(pattern.as_str()))
        };
        if should_fail {
            return Err(HypervisorError::CommandFailed {
                command: line,
                code: Some(1),
                stderr: "injected failure".to_string(),
            });
        }

        self.simulate(command)
    }
}

fn collect_files(
    root: &Path,
    dir: &Path,
    out: &mut BTreeMap<String, String>,
) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_files(root, &path, out)?;
        } else {
            let relative = path.strip_prefix(root).unwrap_or(&path);
            let content = std::fs::read_to_string(&path)?;
            out.insert(relative.to_string_lossy().into_owned(), content);
        }
    }
    Ok(())
}

/// Prompt answering from a fixed script. Running out of answers is an
/// error, so a test never blocks on a question it did not expect.
pub struct ScriptedPrompt {
    answers: Mutex<VecDeque<String>>,
    transcript: Mutex<Vec<String>>,
}

impl ScriptedPrompt {
    pub fn new(answers: &[&str]) -> Self {
        Self {
            answers: Mutex::new(answers.iter().map(|a| a.to_string()).collect()),
            transcript: Mutex::new(Vec::new()),
        }
    }

    /// Questions asked and messages shown, in order.
    pub fn transcript(&self) -> Vec<String> {
        self.transcript
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl Prompt for ScriptedPrompt {
    fn ask(&self, question: &str) -> Result<String> {
        self.say(question);
        self.answers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front()
            .ok_or_else(|| HypervisorError::InvalidRequest(format!("unexpected question: {}", question)))
    }

    fn say(&self, message: &str) {
        self.transcript
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(message.to_string());
    }
}
