use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use log::{debug, info};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;

use geolocator::config::Config;
use geolocator::geocode::create_geocoding_service;
use geolocator::{
    CancelToken, DistanceUnits, Geolocator, Position, PositionEvent, calculate_distance,
};

#[derive(Parser)]
#[command(author, version, about = "Query device location through a pluggable platform service")]
struct Cli {
    /// Path to config file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config file
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },

    /// Show the platform's cached position without starting the sensors
    LastKnown,

    /// Get the current position once
    Position {
        /// Seconds to wait for a fix (defaults to the configured timeout)
        #[arg(short, long, value_parser = parse_timeout)]
        timeout: Option<Duration>,

        /// Wait for a heading as well
        #[arg(long)]
        heading: bool,
    },

    /// Listen for position changes
    Listen {
        /// Stop after this many updates
        #[arg(short = 'n', long, default_value_t = 5)]
        count: usize,

        /// Minimum distance in meters between updates
        #[arg(long, default_value_t = 0.0)]
        min_distance: f64,

        /// Minimum time in seconds between updates
        #[arg(long, default_value_t = 1.0)]
        min_time: f64,

        /// Include heading in updates
        #[arg(long)]
        heading: bool,
    },

    /// Distance between two coordinates
    Distance {
        #[arg(allow_hyphen_values = true)]
        lat1: f64,
        #[arg(allow_hyphen_values = true)]
        lon1: f64,
        #[arg(allow_hyphen_values = true)]
        lat2: f64,
        #[arg(allow_hyphen_values = true)]
        lon2: f64,

        #[arg(short, long, value_enum, default_value_t = DistanceUnits::Miles)]
        units: DistanceUnits,
    },

    /// Find coordinates for an address
    Geocode {
        address: String,

        /// Map service key, for providers that need one
        #[arg(long)]
        map_key: Option<String>,
    },

    /// Find addresses for a coordinate
    Reverse {
        #[arg(allow_hyphen_values = true)]
        latitude: f64,
        #[arg(allow_hyphen_values = true)]
        longitude: f64,

        /// Map service key, for providers that need one
        #[arg(long)]
        map_key: Option<String>,
    },
}

fn parse_timeout(value: &str) -> std::result::Result<Duration, String> {
    let seconds: f64 = value
        .parse()
        .map_err(|_| format!("'{value}' is not a number of seconds"))?;
    if !seconds.is_finite() || seconds <= 0.0 {
        return Err("timeout must be a positive number of seconds".to_string());
    }
    Ok(Duration::from_secs_f64(seconds))
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Init { force } => init_config(&cli.config, *force),
        Commands::Distance {
            lat1,
            lon1,
            lat2,
            lon2,
            units,
        } => {
            let distance = calculate_distance(*lat1, *lon1, *lat2, *lon2, *units);
            if cli.json {
                print_json(&serde_json::json!({ "distance": distance, "units": units }))?;
            } else {
                let label = match units {
                    DistanceUnits::Miles => "miles",
                    DistanceUnits::Kilometers => "km",
                };
                println!("Distance: {distance:.3} {label}");
            }
            Ok(())
        }
        command => {
            let config = load_config(&cli.config)?;
            let geolocator = Geolocator::with_config(
                config.create_location_service(),
                create_geocoding_service(),
                &config.geolocator,
            );
            run_location_command(command, &config, &geolocator, cli.json).await
        }
    }
}

async fn run_location_command(
    command: &Commands,
    config: &Config,
    geolocator: &Geolocator,
    json: bool,
) -> Result<()> {
    if !geolocator.is_geolocation_enabled() {
        bail!("Location services are disabled");
    }

    match command {
        Commands::LastKnown => {
            let position = geolocator
                .get_last_known_position()
                .await
                .context("Failed to get last known position")?;
            match position {
                Some(position) => print_result(&position, json)?,
                None => println!("No last known position"),
            }
        }
        Commands::Position { timeout, heading } => {
            let timeout = match timeout {
                Some(timeout) => Some(*timeout),
                None => config.geolocator.default_timeout()?,
            };

            // Ctrl-C cancels the request rather than killing the process
            let cancel = CancelToken::new();
            let on_interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    on_interrupt.cancel();
                }
            });

            info!("Requesting position (timeout: {timeout:?})");
            let position = geolocator
                .get_position(timeout, Some(cancel), *heading)
                .await
                .context("Failed to get position")?;
            print_result(&position, json)?;
        }
        Commands::Listen {
            count,
            min_distance,
            min_time,
            heading,
        } => {
            let min_time = Duration::try_from_secs_f64(*min_time)
                .with_context(|| format!("Invalid minimum time: {min_time}"))?;
            let mut events = geolocator.subscribe();

            geolocator
                .start_listening(min_time, *min_distance, *heading, Some(config.listener.clone()))
                .await
                .context("Failed to start listening")?;

            let mut received = 0;
            while received < *count {
                tokio::select! {
                    event = events.recv() => match event {
                        Ok(PositionEvent::PositionChanged(position)) => {
                            received += 1;
                            if !json {
                                println!("\nUpdate {received}/{count}:");
                            }
                            print_result(&position, json)?;
                        }
                        Ok(PositionEvent::PositionError(err)) => {
                            return Err(err).context("Listening stopped");
                        }
                        Err(RecvError::Lagged(skipped)) => debug!("Skipped {skipped} updates"),
                        Err(RecvError::Closed) => break,
                    },
                    _ = tokio::signal::ctrl_c() => {
                        info!("Interrupted");
                        break;
                    }
                }
            }

            geolocator
                .stop_listening()
                .await
                .context("Failed to stop listening")?;
        }
        Commands::Geocode { address, map_key } => {
            let positions = geolocator
                .get_positions_for_address(address, map_key.as_deref())
                .await
                .context("Failed to geocode address")?;
            if json {
                print_json(&positions)?;
            } else if positions.is_empty() {
                println!("No matches for '{address}'");
            } else {
                for position in positions {
                    println!("{:.6}, {:.6}", position.latitude, position.longitude);
                }
            }
        }
        Commands::Reverse {
            latitude,
            longitude,
            map_key,
        } => {
            let position = Position::from_coordinates(*latitude, *longitude);
            let addresses = geolocator
                .get_addresses_for_position(&position, map_key.as_deref())
                .await
                .context("Failed to reverse geocode position")?;
            if json {
                print_json(&addresses)?;
            } else {
                for address in addresses {
                    println!("{address}");
                }
            }
        }
        // Handled in main without a location service
        Commands::Init { .. } | Commands::Distance { .. } => {}
    }

    Ok(())
}

fn print_result<T: Serialize + std::fmt::Display>(value: &T, json: bool) -> Result<()> {
    if json {
        print_json(value)
    } else {
        println!("{value}");
        Ok(())
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn init_config(config_path_opt: &Option<PathBuf>, force: bool) -> Result<()> {
    let config_path = Config::get_config_path(config_path_opt);

    if config_path.exists() && !force {
        println!("Config file already exists at {}", config_path.display());
        println!("Use --force to overwrite");
        return Ok(());
    }

    let config = Config::default();
    config
        .save_to_file(&config_path)
        .with_context(|| format!("Failed to write config to {}", config_path.display()))?;

    println!("Created config file at {}", config_path.display());
    Ok(())
}

fn load_config(config_path_opt: &Option<PathBuf>) -> Result<Config> {
    let config_path = Config::get_config_path(config_path_opt);

    if !config_path.exists() {
        info!(
            "No config file at {}, using defaults. Run 'geolocator init' to create one.",
            config_path.display()
        );
        return Ok(Config::default());
    }

    Config::load_from_file(&config_path)
}
