//! Parsing of `xl list` output.
//!
//! ```text
//! Name                                        ID   Mem VCPUs      State   Time(s)
//! Domain-0                                     0  2048     4     r-----     812.4
//! 1-web1                                       7   512     1     -b----      31.0
//! ```

use tracing::debug;

/// One row of `xl list`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainRow {
    pub name: String,
    /// Hypervisor-assigned domain ID, valid until the domain is destroyed
    pub domid: u32,
    /// Six state flags: `r`unning `b`locked `p`aused `s`hutdown `c`rashed `d`ying
    pub state: String,
}

impl DomainRow {
    /// Running or blocked. A blocked domain is idle on I/O, which is the
    /// normal state of a healthy guest.
    pub fn is_running(&self) -> bool {
        let mut flags = self.state.chars();
        let running = flags.next() == Some('r');
        let blocked = flags.next() == Some('b');
        running || blocked
    }
}

/// Parse `xl list` output. The header and rows that do not have the
/// expected columns are ignored.
pub fn parse_xl_list(output: &str) -> Vec<DomainRow> {
    output
        .lines()
        .filter_map(|line| {
            let columns: Vec<&str> = line.split_whitespace().collect();
            let [name, domid, _mem, _vcpus, state, ..] = columns.as_slice() else {
                return None;
            };
            let Ok(domid) = domid.parse::<u32>() else {
                if *name != "Name" {
                    debug!(line, "Skipping unparsable xl list row");
                }
                return None;
            };
            Some(DomainRow {
                name: name.to_string(),
                domid,
                state: state.to_string(),
            })
        })
        .collect()
}
