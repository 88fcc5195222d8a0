//! Optional configuration file overriding how the controller is probed.
//! All fields are optional and absence of the file is not an error.

use serde::Deserialize;

use crate::embedded_ec::bus_scan::DEFAULT_ADAPTER_NAMES;
use crate::embedded_ec::EcDriverType;

const CONFIG_FILE: &str = "ecprobe.toml";

#[derive(Debug, Default, Deserialize)]
struct Config {
    ec: Option<EcConfig>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct EcConfig {
    /// Only try this transport instead of the usual probe order
    pub driver: Option<EcDriverType>,
    /// Character-device path, overriding the per-endpoint default
    pub device_path: Option<String>,
    /// Skip bus discovery and use this bus number
    pub i2c_bus: Option<u8>,
    pub i2c_address: Option<u16>,
    /// Adapter names to look for during bus discovery
    pub adapter_names: Option<Vec<String>>,
}

impl EcConfig {
    /// Adapter-name candidates as string slices for the scanner
    pub fn adapter_name_refs(&self) -> Vec<&str> {
        match &self.adapter_names {
            Some(names) => names.iter().map(|s| s.as_str()).collect(),
            None => DEFAULT_ADAPTER_NAMES.to_vec(),
        }
    }
}

fn read_config_file() -> Option<String> {
    // Next to the executable first, then the working directory
    if let Ok(mut path) = std::env::current_exe() {
        path.pop();
        path.push(CONFIG_FILE);
        if let Ok(str) = std::fs::read_to_string(path) {
            return Some(str);
        }
    }
    std::fs::read_to_string(CONFIG_FILE).ok()
}

pub fn load_config() -> Option<EcConfig> {
    let toml_str = read_config_file()?;
    match toml::from_str::<Config>(&toml_str) {
        Ok(config) => {
            debug!("loaded {}: {:?}", CONFIG_FILE, config);
            config.ec
        }
        Err(err) => {
            warn!("ignoring malformed {}: {}", CONFIG_FILE, err);
            None
        }
    }
}
