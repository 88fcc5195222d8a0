//! Locate the I2C bus the controller sits on.
//!
//! The physical bus number is not stable across builds or kernels, so the
//! statically configured number may be wrong. We scan the enumerated I2C
//! adapters for one whose registered name matches a known candidate and take
//! the bus number from its sysfs node instead.

use std::fs;
use std::path::Path;

/// Where the kernel enumerates I2C devices and adapters
pub const SYS_I2C_DEVICES: &str = "/sys/bus/i2c/devices";

/// Adapter names the EC is known to register under
pub const DEFAULT_ADAPTER_NAMES: [&str; 2] = ["cros-ec-i2c", "cros_ec_i2c"];

/// One enumerated adapter: the sysfs node name and the declared adapter name
#[derive(Debug, Clone)]
pub struct AdapterEntry {
    pub node: String,
    pub name: String,
}

/// Pick the EC bus number out of a list of adapter entries.
///
/// Matches the declared name against the candidates by prefix. When several
/// entries match, the one appearing last in traversal order wins; that
/// prefers a passthrough adapter over a multi-function device's own bus
/// node. The winning entry's node is then authoritative: if it does not
/// parse to a bus number in 0-255, discovery fails rather than falling back
/// to an earlier match.
pub fn match_adapter_bus(entries: &[AdapterEntry], candidates: &[&str]) -> Option<u8> {
    let matched = entries
        .iter()
        .filter(|e| candidates.iter().any(|c| e.name.starts_with(c)))
        .last()?;
    let bus = parse_bus_number(&matched.node);
    if bus.is_none() {
        debug!("adapter {} matched but node is unparseable", matched.node);
    }
    bus
}

/// Bus number from a sysfs node name, either `i2c-<bus>` or `<bus>-<addr>`
fn parse_bus_number(node: &str) -> Option<u8> {
    let num = if let Some(rest) = node.strip_prefix("i2c-") {
        rest
    } else {
        node.split('-').next()?
    };
    // u8 bounds the result to the valid 0-255 range
    num.parse::<u8>().ok()
}

/// Scan the system's I2C adapters and return the EC bus number, if any
pub fn discover_bus(candidates: &[&str]) -> Option<u8> {
    let entries = scan_adapters(Path::new(SYS_I2C_DEVICES))?;
    let bus = match_adapter_bus(&entries, candidates);
    match bus {
        Some(bus) => debug!("discovered EC on i2c-{}", bus),
        None => debug!("no I2C adapter matched {:?}", candidates),
    }
    bus
}

fn scan_adapters(root: &Path) -> Option<Vec<AdapterEntry>> {
    let dir = fs::read_dir(root).ok()?;
    let mut entries: Vec<AdapterEntry> = dir
        .flatten()
        .filter_map(|e| {
            let node = e.file_name().into_string().ok()?;
            let name = fs::read_to_string(e.path().join("name")).ok()?;
            Some(AdapterEntry {
                node,
                name: name.trim().to_string(),
            })
        })
        .collect();
    // read_dir order is not deterministic. Order by bus number, then node
    // name, so i2c-10 traverses after i2c-3 and the passthrough preference
    // keys on the actual bus rather than on string order.
    entries.sort_by(|a, b| {
        (parse_bus_number(&a.node), &a.node).cmp(&(parse_bus_number(&b.node), &b.node))
    });
    Some(entries)
}
