use myolink::prelude::*;

use clap::{Parser, Subcommand};
use std::error::Error;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Display more information on the console. Can be used multiple times.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Seconds to wait when scanning for bluetooth devices
    #[arg(short, long, value_name = "SECONDS", default_value_t = 3.0)]
    scantime: f32,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Scan for armbands
    Scan {},

    /// Connect to the first armband found and print its sample windows
    Stream {},
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    env_logger::Builder::from_default_env()
        .filter_level(match cli.verbose {
            0 => log::LevelFilter::Info,
            1 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        })
        .init();

    let conf = App {
        verbose: cli.verbose,
        scantime: cli.scantime,
    };

    match &cli.command {
        Some(Commands::Scan {}) => {
            let devices = bluetooth::scan(conf).await?;
            if devices.is_empty() {
                println!("No armbands found.");
            }
            for device in devices {
                println!("{}  {}", device.address, device.name);
            }
        }
        Some(Commands::Stream {}) | None => {
            stream(conf).await?;
        }
    }

    Ok(())
}

async fn stream(conf: App) -> Result<(), Box<dyn Error>> {
    let device = bluetooth::find_peripheral(conf).await?;

    let feeder = SlidingWindowFeeder::new();
    feeder.register_listener(
        "console",
        |source: &str, samples: Vec<Sample>| {
            println!("{source}: {samples:?}");
        },
        SubscriptionParams::new(1, 1),
    )?;

    let (link, events) = device.open();
    let prefs: Arc<dyn PreferenceStore> = Arc::new(MemoryPreferences::default());
    let session = DeviceSession::spawn(
        device.name.clone(),
        device.address.clone(),
        link,
        events,
        feeder.clone(),
        Some(prefs),
        SessionConfig::default(),
    );
    session.connect();

    let mut states = session.watch_state();
    loop {
        states.changed().await?;
        let state = *states.borrow();
        println!("{}: {state:?}", device.name);
    }
}
