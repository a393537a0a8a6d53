//! Command-line control of an EasyLase DAC.
//!
//! Run with: `cargo run --example cli -- [on|off|idle|beam|circle|status]`

use std::f64::consts::TAU;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use clap::{Parser, Subcommand};
use easylase::{
    CharDevice, DeviceLink, LogicalPoint, PointScheduler, Result, SchedulerConfig,
    DEFAULT_DEVICE_PATH, DEVICE_MAX_RATE,
};

#[derive(Parser)]
#[command(about = "Control an EasyLase laser DAC")]
struct Args {
    /// Device node of the EasyLase kernel driver
    #[arg(short, long, default_value = DEFAULT_DEVICE_PATH)]
    device: PathBuf,

    /// Output rate in points per second
    #[arg(short, long, default_value_t = DEVICE_MAX_RATE)]
    rate: u16,

    /// Points per device frame (depends on the hardware revision)
    #[arg(long, default_value_t = easylase::DEFAULT_MAX_POINTS)]
    max_points: usize,

    /// How long to project beam and circle patterns, in seconds
    #[arg(short, long, default_value_t = 10)]
    seconds: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Switch the laser output on
    On,
    /// Switch the laser output off
    Off,
    /// Blank the output and clear the device buffers
    Idle,
    /// Hold a soft green beam at the centre
    Beam,
    /// Project a quarter-size green circle
    Circle,
    /// Query whether the device accepts frames
    Status,
}

fn circle_points(n: usize) -> Vec<LogicalPoint> {
    (0..n)
        .map(|i| {
            let angle = TAU * i as f64 / n as f64;
            LogicalPoint::new(angle.cos() / 4.0, angle.sin() / 4.0, 0, 45, 0)
        })
        .collect()
}

fn print_status(args: &Args) -> Result<()> {
    let mut link = DeviceLink::new(CharDevice::new(&args.device));
    link.connect()?;
    let ready = link.is_ready()?;
    println!(
        "{}: connected, {}",
        link.describe(),
        if ready { "ready" } else { "busy" }
    );
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    if let Command::Status = args.command {
        return print_status(&args);
    }

    let config = SchedulerConfig::new(args.max_points);
    let scheduler = PointScheduler::open(&args.device, config)?;
    if scheduler.has_error() {
        eprintln!("error: {}", scheduler.error_string());
        std::process::exit(1);
    }

    scheduler.set_error_callback(|msg| eprintln!("error: {}", msg))?;
    scheduler.set_active_callback(|active| {
        println!("laser: {}", if active { "on" } else { "off" })
    })?;

    match args.command {
        Command::On => scheduler.on()?,
        Command::Off => scheduler.off()?,
        Command::Idle => scheduler.idle()?,
        Command::Beam | Command::Circle => {
            scheduler.on()?;
            if let Command::Beam = args.command {
                scheduler.show_point(LogicalPoint::new(0.0, 0.0, 0, 45, 0))?;
            } else {
                scheduler.show(circle_points(500), true, args.rate)?;
            }

            println!("Projecting for {}s...", args.seconds);
            thread::sleep(Duration::from_secs(args.seconds));
            scheduler.off()?;
            scheduler.idle()?;
        }
        Command::Status => {}
    }

    scheduler.wait_for_finish()?;
    if scheduler.has_error() {
        eprintln!("error: {}", scheduler.error_string());
        std::process::exit(1);
    }
    Ok(())
}
