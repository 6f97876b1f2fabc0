use std::time::Duration;

use anyhow::bail;
use clap::{Parser, Subcommand};
use jackery_ble::{
    format_status, init_logger, log_info, scan_devices, DeviceConfig, DeviceType,
    JackeryCoordinator,
};

#[derive(Parser)]
#[command(name = "jackery-cli")]
#[command(about = "CLI tool for Jackery BLE power stations")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan for nearby devices and print what they advertise
    Scan {
        #[arg(short, long, default_value = "10")]
        timeout: u64,
        #[arg(short, long)]
        name: Option<String>,
    },
    /// Poll one device and print its status
    Status {
        address: String,
        #[arg(short, long)]
        key: Option<String>,
        #[arg(short, long, value_enum, default_value = "portable")]
        device_type: CliDeviceType,
        #[arg(short, long)]
        model_code: Option<u16>,
    },
    /// Switch the AC output on or off
    SetAc {
        address: String,
        #[arg(value_parser = clap::value_parser!(bool))]
        on: bool,
        #[arg(short, long)]
        key: Option<String>,
    },
    /// Set the light mode (0=off, 1=low, 2=high, 3=sos)
    SetLight {
        address: String,
        mode: u8,
        #[arg(short, long)]
        key: Option<String>,
    },
}

#[derive(clap::ValueEnum, Clone, Copy)]
enum CliDeviceType {
    Portable,
    Box,
}

impl From<CliDeviceType> for DeviceType {
    fn from(value: CliDeviceType) -> Self {
        match value {
            CliDeviceType::Portable => DeviceType::Portable,
            CliDeviceType::Box => DeviceType::Box,
        }
    }
}

fn coordinator_for(
    address: String,
    key: Option<String>,
    device_type: DeviceType,
    model_code: Option<u16>,
) -> JackeryCoordinator {
    JackeryCoordinator::new(DeviceConfig {
        address,
        device_type,
        encryption_key: key,
        model_code,
        ..DeviceConfig::default()
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logger();

    let cli = Cli::parse();

    match cli.command {
        Commands::Scan { timeout, name } => {
            let devices = scan_devices(Duration::from_secs(timeout), name.as_deref()).await?;
            if devices.is_empty() {
                bail!("no Jackery devices found");
            }
            for device in devices {
                log_info(&format!("Device: {device}"));
            }
        }
        Commands::Status {
            address,
            key,
            device_type,
            model_code,
        } => {
            let mut coordinator =
                coordinator_for(address, key, device_type.into(), model_code);
            let state = coordinator.poll_once().await?;
            println!("{}", format_status(&state));
            coordinator.shutdown().await;
        }
        Commands::SetAc { address, on, key } => {
            let mut coordinator =
                coordinator_for(address, key, DeviceType::Portable, None);
            let cmd = coordinator.command_builder().set_ac_output(on);
            coordinator.send_control_command(&cmd).await?;
            log_info(&format!("AC output set to {on}"));
            coordinator.shutdown().await;
        }
        Commands::SetLight { address, mode, key } => {
            let mut coordinator =
                coordinator_for(address, key, DeviceType::Portable, None);
            let cmd = coordinator.command_builder().set_light_mode(mode);
            coordinator.send_control_command(&cmd).await?;
            log_info(&format!("Light mode set to {mode}"));
            coordinator.shutdown().await;
        }
    }

    Ok(())
}
