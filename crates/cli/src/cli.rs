use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "bmckit")]
#[command(about = "Control an ARM cluster board through its BMC")]
#[command(version)]
#[command(after_help = "Run '<command> --help' for detailed options on each command.")]
pub struct Cli {
    /// BMC host (IP or hostname, optionally with port)
    #[arg(long, global = true, env = "BMCKIT_HOST", value_name = "HOST")]
    pub host: Option<String>,
    /// BMC API version: v1 (http) or v1-1 (https)
    #[arg(long, global = true, default_value = "v1-1", value_name = "VERSION")]
    pub api_version: String,
    /// Username for authentication
    #[arg(long, short = 'u', global = true, env = "BMCKIT_USERNAME")]
    pub user: Option<String>,
    /// Password for authentication
    #[arg(long, short = 'p', global = true, env = "BMCKIT_PASSWORD")]
    pub password: Option<String>,
    /// Also try the vendor-default credential pairs when nothing else works
    #[arg(long, global = true)]
    pub try_default_creds: bool,
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short = 'v', long = "verbose", global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Node power control
    Power {
        #[command(subcommand)]
        command: PowerCommand,
    },
    /// USB routing control
    Usb {
        #[command(subcommand)]
        command: UsbCommand,
    },
    /// Node serial console access
    Uart {
        #[command(subcommand)]
        command: UartCommand,
    },
    /// Fan speed control
    Cooling {
        #[command(subcommand)]
        command: CoolingCommand,
    },
    /// Flash an OS image to a node
    Flash(FlashArgs),
    /// Upload a firmware image to the BMC itself
    Firmware(FirmwareArgs),
    /// Show basic board information
    Info,
    /// Show details about the BMC daemon
    About,
    /// Reboot the BMC (nodes lose power until it is back up)
    Reboot,
    /// Manage cached authentication tokens
    Auth {
        #[command(subcommand)]
        command: AuthCommand,
    },
}

#[derive(Subcommand)]
pub enum PowerCommand {
    /// Show per-node power state
    Status,
    /// Power a node on (all nodes when omitted)
    On {
        /// Node number (1-4)
        #[arg(long, short = 'n')]
        node: Option<u8>,
    },
    /// Power a node off (all nodes when omitted)
    Off {
        /// Node number (1-4)
        #[arg(long, short = 'n')]
        node: Option<u8>,
    },
    /// Power-cycle a node
    Reset {
        /// Node number (1-4)
        #[arg(long, short = 'n')]
        node: u8,
    },
}

#[derive(Subcommand)]
pub enum UsbCommand {
    /// Show the current USB configuration
    Status,
    /// Route the USB bus to a node as host
    Host(UsbArgs),
    /// Route the USB bus to a node as device
    Device(UsbArgs),
    /// Put a node into flashing mode
    Flash(UsbArgs),
}

#[derive(Args)]
pub struct UsbArgs {
    /// Node number (1-4)
    #[arg(long, short = 'n')]
    pub node: u8,
    /// Route the bus to the BMC instead of the USB-A port
    #[arg(long)]
    pub bmc: bool,
}

#[derive(Subcommand)]
pub enum UartCommand {
    /// Read buffered serial output from a node
    Read {
        /// Node number (1-4)
        #[arg(long, short = 'n')]
        node: u8,
    },
    /// Write a command to a node's serial console
    Write {
        /// Node number (1-4)
        #[arg(long, short = 'n')]
        node: u8,
        /// Command to send
        #[arg(long, short = 'c')]
        cmd: String,
    },
}

#[derive(Subcommand)]
pub enum CoolingCommand {
    /// List cooling devices and their speeds
    Status,
    /// Set a cooling device's speed
    Set {
        /// Device name as reported by status
        #[arg(long, short = 'd')]
        device: String,
        /// Target speed
        #[arg(long, short = 's')]
        speed: u32,
    },
}

#[derive(Args)]
pub struct FlashArgs {
    /// Node number (1-4)
    #[arg(long, short = 'n')]
    pub node: u8,
    /// Path to the OS image
    #[arg(long, short = 'i', value_name = "PATH")]
    pub image: PathBuf,
    /// Expected SHA-256 digest of the image (hex)
    #[arg(long, value_name = "HEX")]
    pub sha256: Option<String>,
    /// Ask the BMC to skip its post-transfer integrity check
    #[arg(long)]
    pub skip_crc: bool,
    /// Treat the image path as a file on the BMC's own filesystem
    #[arg(long, short = 'l')]
    pub local: bool,
}

#[derive(Args)]
pub struct FirmwareArgs {
    /// Path to the firmware image
    #[arg(long, short = 'i', value_name = "PATH")]
    pub image: PathBuf,
    /// Expected SHA-256 digest of the image (hex)
    #[arg(long, value_name = "HEX")]
    pub sha256: Option<String>,
}

#[derive(Subcommand)]
pub enum AuthCommand {
    /// Authenticate against the BMC and cache the token
    Login,
    /// Remove the cached token for the host
    Logout {
        /// Remove every cached token instead
        #[arg(long)]
        all: bool,
    },
    /// List hosts with a cached token
    List,
}
