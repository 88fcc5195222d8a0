//! Module to factor out commandline interaction

use clap::Parser;
use clap_num::maybe_hex;

use crate::config;
use crate::embedded_ec::{self, EcDeviceKind, EcDriverType, EcEndpoint};

/// Inventory and diagnostic tool for the on-board embedded controller
#[derive(Parser)]
#[command(name = "ecprobe_tool", arg_required_else_help = true)]
pub struct Cli {
    #[command(flatten)]
    verbosity: clap_verbosity_flag::Verbosity,

    /// List current firmware versions
    #[arg(long)]
    versions: bool,

    /// Show the controller chip's vendor, name and revision
    #[arg(long)]
    chip_info: bool,

    /// Show the board revision number
    #[arg(long)]
    board_version: bool,

    /// Show the controller's flash geometry
    #[arg(long)]
    flash_info: bool,

    /// Show information about the PD chip on a port
    #[arg(long, value_name = "PORT")]
    pd_info: Option<u8>,

    /// Dump the boot-verification non-volatile context block
    #[arg(long)]
    vbnv_read: bool,

    /// Write the non-volatile context block (32 hex digits)
    #[arg(long, value_name = "HEX_BLOCK")]
    vbnv_write: Option<String>,

    /// Run self-test to check if interaction with the controller is possible
    #[arg(long, short)]
    test: bool,

    /// Which logical controller to talk to
    #[clap(value_enum)]
    #[arg(long, default_value = "ec")]
    endpoint: EcDeviceKind,

    /// Select which transport is used instead of probing both
    #[clap(value_enum)]
    #[arg(long)]
    driver: Option<EcDriverType>,

    /// I2C bus number, skipping bus discovery
    #[arg(long)]
    bus: Option<u8>,

    /// I2C address of the controller
    #[arg(long, value_parser=maybe_hex::<u16>)]
    addr: Option<u16>,
}

/// Parse the commandline arguments of the current process
pub fn parse() -> Cli {
    Cli::parse()
}

pub fn run_with_args(args: &Cli) -> i32 {
    env_logger::Builder::new()
        .filter_level(args.verbosity.log_level_filter())
        .format_timestamp(None)
        .init();

    let mut config = config::load_config().unwrap_or_default();
    if args.driver.is_some() {
        config.driver = args.driver;
    }
    if args.bus.is_some() {
        config.i2c_bus = args.bus;
    }
    if args.addr.is_some() {
        config.i2c_address = args.addr;
    }

    let Some(mut ec) = embedded_ec::setup(args.endpoint, &config) else {
        // Absence is a valid state for inventory tooling, but the requested
        // query still has nothing to answer with
        println!("{} not present", args.endpoint.label());
        return 1;
    };
    info!(
        "bound {} over {}",
        args.endpoint.label(),
        ec.transport_name()
    );

    if args.test {
        println!("Self-Test");
        if selftest(&mut ec).is_none() {
            return 1;
        }
    } else if args.versions {
        print_versions(&mut ec);
    } else if args.chip_info {
        match ec.chip_info() {
            Ok(chip) => {
                println!("Chip");
                println!("  Vendor:         {}", chip.vendor);
                println!("  Name:           {}", chip.name);
                println!("  Revision:       {}", chip.revision);
            }
            Err(err) => {
                println!("Failed to read chip info: {}", err);
                return 1;
            }
        }
    } else if args.board_version {
        match ec.board_version() {
            Ok(version) => println!("Board version:    {}", version),
            Err(err) => {
                println!("Failed to read board version: {}", err);
                return 1;
            }
        }
    } else if args.flash_info {
        match ec.flash_info() {
            Ok(info) => {
                println!("Flash");
                println!("  Size:           {:>8} B", info.flash_size);
                println!("  Write block:    {:>8} B", info.write_block_size);
                println!("  Erase block:    {:>8} B", info.erase_block_size);
                println!("  Protect block:  {:>8} B", info.protect_block_size);
            }
            Err(err) => {
                println!("Failed to read flash info: {}", err);
                return 1;
            }
        }
    } else if let Some(port) = args.pd_info {
        match ec.pd_chip_info(port) {
            Ok(info) => {
                println!("PD Chip (port {})", port);
                println!("  Vendor ID:      {:#06x}", info.vendor_id);
                println!("  Product ID:     {:#06x}", info.product_id);
                println!("  Device ID:      {:#06x}", info.device_id);
                match info.fw_version {
                    Some(version) => println!("  FW Version:     {:#x}", version),
                    None => println!("  FW Version:     Unsupported"),
                }
            }
            Err(err) => {
                println!("Failed to read PD chip info: {}", err);
                return 1;
            }
        }
    } else if args.vbnv_read {
        match ec.vbnv_read() {
            Ok(block) => println!("VBNV: {}", hex_block(&block)),
            Err(err) => {
                println!("Failed to read VBNV context: {}", err);
                return 1;
            }
        }
    } else if let Some(hex) = &args.vbnv_write {
        let Some(block) = parse_hex_block(hex) else {
            println!("VBNV block must be exactly 32 hex digits");
            return 2;
        };
        if let Err(err) = ec.vbnv_write(&block) {
            println!("Failed to write VBNV context: {}", err);
            return 1;
        }
    }

    0
}

fn print_versions(ec: &mut EcEndpoint) {
    println!("{}", ec.kind().label());
    match ec.build_info() {
        Ok(build) => println!("  Build version:  {}", build),
        Err(_) => println!("  Build version:  Unknown"),
    }
    if let Ok(version) = ec.version() {
        println!("  RO Version:     {}", version.ro);
        println!("  RW Version:     {}", version.rw);
        print!("  Current image:  ");
        match version.active {
            embedded_ec::EcCurrentImage::RO => println!("RO"),
            embedded_ec::EcCurrentImage::RW => println!("RW"),
            embedded_ec::EcCurrentImage::Unknown => println!("Unknown"),
        }
    } else {
        println!("  RO Version:     Unknown");
        println!("  RW Version:     Unknown");
        println!("  Current image:  Unknown");
    }
}

fn selftest(ec: &mut EcEndpoint) -> Option<()> {
    println!("  Checking handshake");
    ec.hello().ok()?;

    println!("  Reading firmware versions");
    ec.version().ok()?;

    println!("  Reading chip identity");
    ec.chip_info().ok()?;

    Some(())
}

fn hex_block(block: &[u8]) -> String {
    block.iter().map(|b| format!("{:02x}", b)).collect()
}

/// 32 hex digits into the fixed-size VBNV block
fn parse_hex_block(hex: &str) -> Option<[u8; 16]> {
    let hex = hex.trim().strip_prefix("0x").unwrap_or(hex.trim());
    if hex.len() != 32 {
        return None;
    }
    let mut block = [0u8; 16];
    for (i, chunk) in hex.as_bytes().chunks(2).enumerate() {
        let chunk = std::str::from_utf8(chunk).ok()?;
        block[i] = u8::from_str_radix(chunk, 16).ok()?;
    }
    Some(block)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_block_roundtrip() {
        let block = parse_hex_block("000102030405060708090a0b0c0d0e0f").unwrap();
        assert_eq!(block[0], 0);
        assert_eq!(block[15], 0x0f);
        assert_eq!(hex_block(&block), "000102030405060708090a0b0c0d0e0f");
    }

    #[test]
    fn hex_block_rejects_bad_input() {
        assert!(parse_hex_block("").is_none());
        assert!(parse_hex_block("001122").is_none());
        assert!(parse_hex_block("zz0102030405060708090a0b0c0d0e0f").is_none());
    }
}
