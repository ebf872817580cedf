mod cli;
mod flash;

use bmckit_auth::{Credentials, TokenCache};
use bmckit_client::ops::UsbMode;
use bmckit_client::{ApiVersion, BmcClient, ClientConfig};
use clap::Parser;
use eyre::{eyre, Result, WrapErr};
use tracing_subscriber::EnvFilter;

use crate::cli::{
    AuthCommand, Cli, Commands, CoolingCommand, PowerCommand, UartCommand, UsbCommand,
};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let args = Cli::parse();

    let default_level = match args.verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    match &args.command {
        Commands::Auth { command } => run_auth(&args, command).await,
        Commands::Power { command } => run_power(&build_client(&args)?, command).await,
        Commands::Usb { command } => run_usb(&build_client(&args)?, command).await,
        Commands::Uart { command } => run_uart(&build_client(&args)?, command).await,
        Commands::Cooling { command } => run_cooling(&build_client(&args)?, command).await,
        Commands::Flash(flash_args) => flash::run(&build_client(&args)?, flash_args).await,
        Commands::Firmware(fw_args) => {
            flash::run_firmware(&build_client(&args)?, fw_args).await
        }
        Commands::Info => {
            for (key, value) in build_client(&args)?.info().await? {
                println!("{key}: {value}");
            }
            Ok(())
        }
        Commands::About => {
            for (key, value) in build_client(&args)?.about().await? {
                println!("{key}: {value}");
            }
            Ok(())
        }
        Commands::Reboot => {
            build_client(&args)?.reboot_bmc().await?;
            println!("BMC rebooting; nodes lose power until it is back up");
            Ok(())
        }
    }
}

fn require_host(args: &Cli) -> Result<String> {
    args.host
        .clone()
        .ok_or_else(|| eyre!("no BMC host given; pass --host or set BMCKIT_HOST"))
}

fn build_client(args: &Cli) -> Result<BmcClient> {
    let mut config = ClientConfig::new(require_host(args)?);
    config.version = args
        .api_version
        .parse::<ApiVersion>()
        .map_err(|e| eyre!(e))?;
    config.credentials = args
        .user
        .as_ref()
        .map(|user| Credentials::new(user, args.password.clone().unwrap_or_default()));
    config.allow_default_credentials = args.try_default_creds;
    BmcClient::new(config).wrap_err("failed to build BMC client")
}

async fn run_auth(args: &Cli, command: &AuthCommand) -> Result<()> {
    match command {
        AuthCommand::Login => {
            let client = build_client(args)?;
            let creds = client
                .credentials()
                .cloned()
                .ok_or_else(|| eyre!("auth login requires --user (and usually --password)"))?;
            client
                .resolver()
                .force_authenticate(client.host(), &creds)
                .await
                .wrap_err("authentication failed")?;
            println!("Authenticated; token cached for {}", client.host());
        }
        AuthCommand::Logout { all: true } => {
            TokenCache::new().delete_all()?;
            println!("Removed all cached tokens");
        }
        AuthCommand::Logout { all: false } => {
            let host = require_host(args)?;
            TokenCache::new().delete(&host)?;
            println!("Removed cached token for {host}");
        }
        AuthCommand::List => {
            let hosts = TokenCache::new().hosts();
            if hosts.is_empty() {
                println!("No cached tokens");
            } else {
                for host in hosts {
                    println!("{host}");
                }
            }
        }
    }
    Ok(())
}

async fn run_power(client: &BmcClient, command: &PowerCommand) -> Result<()> {
    match command {
        PowerCommand::Status => {
            for (node, on) in client.power_status().await? {
                println!("node{node}: {}", if on { "on" } else { "off" });
            }
        }
        PowerCommand::On { node: Some(node) } => {
            client.power_on(*node).await?;
            println!("node{node} powered on");
        }
        PowerCommand::On { node: None } => {
            client.power_all(true).await?;
            println!("all nodes powered on");
        }
        PowerCommand::Off { node: Some(node) } => {
            client.power_off(*node).await?;
            println!("node{node} powered off");
        }
        PowerCommand::Off { node: None } => {
            client.power_all(false).await?;
            println!("all nodes powered off");
        }
        PowerCommand::Reset { node } => {
            client.reset_node(*node).await?;
            println!("node{node} reset");
        }
    }
    Ok(())
}

async fn run_usb(client: &BmcClient, command: &UsbCommand) -> Result<()> {
    let (mode, usb) = match command {
        UsbCommand::Status => {
            let status = client.usb_status().await?;
            println!("node:  {}", status.node);
            println!("mode:  {}", status.mode);
            println!("route: {}", status.route);
            return Ok(());
        }
        UsbCommand::Host(usb) => (UsbMode::Host, usb),
        UsbCommand::Device(usb) => (UsbMode::Device, usb),
        UsbCommand::Flash(usb) => (UsbMode::Flash, usb),
    };
    client.set_usb_mode(usb.node, mode, usb.bmc).await?;
    println!("USB mode updated for node{}", usb.node);
    Ok(())
}

async fn run_uart(client: &BmcClient, command: &UartCommand) -> Result<()> {
    match command {
        UartCommand::Read { node } => {
            print!("{}", client.uart_read(*node).await?);
        }
        UartCommand::Write { node, cmd } => {
            client.uart_write(*node, cmd).await?;
            println!("sent to node{node}");
        }
    }
    Ok(())
}

async fn run_cooling(client: &BmcClient, command: &CoolingCommand) -> Result<()> {
    match command {
        CoolingCommand::Status => {
            for device in client.cooling_status().await? {
                println!(
                    "{}: {}/{}",
                    device.name, device.speed, device.max_speed
                );
            }
        }
        CoolingCommand::Set { device, speed } => {
            client.set_cooling_speed(device, *speed).await?;
            println!("{device} set to {speed}");
        }
    }
    Ok(())
}
