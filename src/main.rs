use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use clap::{Parser, Subcommand};
use home_ledger::config::Config;
use home_ledger::models::device::{Device, DeviceId, DeviceType};
use home_ledger::models::measurement::Measurement;
use home_ledger::models::topology::{Home, HomeId, Room, RoomId};
use home_ledger::services::{fake_data, import_csv, ingest};
use home_ledger::store::LedgerStore;
use home_ledger::store::postgres::PgStore;
use home_ledger::switchbot::advert::{MANUFACTURER_COMPANY_ID, SERVICE_DATA_UUID};
use log::{error, info};
use serde::Serialize;

#[derive(Debug)]
struct LoadedEnvFile {
    path: PathBuf,
    explicit: bool,
}

/// Placement and measurement ledger for SwitchBot devices.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Load environment variables from this file instead of `./.env`.
    #[arg(long, global = true, value_name = "PATH")]
    env_file: Option<PathBuf>,

    /// Overrides DATABASE_URL.
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Print JSON instead of human-readable lines.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Apply pending database migrations and exit.
    Migrate,
    #[command(subcommand)]
    Home(HomeCommand),
    #[command(subcommand)]
    Room(RoomCommand),
    #[command(subcommand)]
    Device(DeviceCommand),
    /// Place a device that has no open placement.
    Place {
        device: DeviceId,
        room: i64,
        /// Defaults to now.
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },
    /// Move a placed device to another room.
    Move {
        device: DeviceId,
        room: i64,
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },
    /// Close the device's open placement.
    Remove {
        device: DeviceId,
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },
    /// Show the room a device is in right now.
    Where { device: DeviceId },
    /// Show every placement of a device.
    History { device: DeviceId },
    /// Record one measurement.
    Record {
        device: DeviceId,
        #[arg(long)]
        at: Option<DateTime<Utc>>,
        #[arg(long, allow_negative_numbers = true)]
        temperature: f32,
        #[arg(long)]
        humidity: u8,
        #[arg(long)]
        co2: Option<u16>,
        #[arg(long)]
        light: Option<u8>,
    },
    /// Show the most recent measurement of a device.
    Latest { device: DeviceId },
    /// List measurements in `[from, to]`, oldest first.
    Range {
        device: DeviceId,
        #[arg(long)]
        from: DateTime<Utc>,
        #[arg(long)]
        to: Option<DateTime<Utc>>,
    },
    /// Import a SwitchBot app CSV export.
    ImportCsv {
        device: DeviceId,
        #[arg(long)]
        file: PathBuf,
        /// IANA zone the export's timestamps are in.
        #[arg(long, env = "TZ")]
        timezone: Tz,
    },
    /// Decode a captured BLE advertisement and record it.
    IngestAdvert {
        device: DeviceId,
        /// Hex payload of the 0xfd3d service data.
        #[arg(long)]
        service_data: String,
        /// Hex payload of the 0x0969 manufacturer data.
        #[arg(long)]
        manufacturer_data: String,
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },
    /// Populate an empty database with a demo home and synthetic readings.
    SeedDemo {
        #[arg(long, default_value_t = 30)]
        days: u32,
    },
}

#[derive(Debug, Subcommand)]
enum HomeCommand {
    Add {
        id: i64,
        name: String,
        #[arg(long)]
        sort_order: i32,
    },
}

#[derive(Debug, Subcommand)]
enum RoomCommand {
    Add {
        id: i64,
        #[arg(long)]
        home: i64,
        name: String,
        #[arg(long)]
        sort_order: i32,
    },
    List {
        home: i64,
    },
}

#[derive(Debug, Subcommand)]
enum DeviceCommand {
    Add {
        id: DeviceId,
        #[arg(long = "type")]
        device_type: DeviceType,
        name: String,
        #[arg(long)]
        sort_order: i32,
    },
    List,
}

struct Output {
    json: bool,
}

impl Output {
    fn emit<T: Serialize + ?Sized>(&self, value: &T, human: impl FnOnce(&T) -> String) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string(value).context("serializing output")?);
        } else {
            println!("{}", human(value));
        }
        Ok(())
    }
}

fn describe_measurement(m: &Measurement) -> String {
    let mut line = format!(
        "{} {}  {:.1}°C  {}%",
        m.device_id,
        m.measured_at.to_rfc3339(),
        m.temperature_celsius,
        m.humidity_percent
    );
    if let Some(co2) = m.co2_ppm {
        line.push_str(&format!("  {} ppm", co2));
    }
    if let Some(light) = m.light_level {
        line.push_str(&format!("  light {}", light));
    }
    line
}

fn execute<S: LedgerStore>(store: &S, command: Command, cfg: &Config, out: &Output) -> Result<()> {
    let now = Utc::now();
    match command {
        Command::Migrate => Ok(()),
        Command::Home(HomeCommand::Add { id, name, sort_order }) => {
            let home = store.create_home(Home {
                id: HomeId(id),
                name,
                sort_order,
            })?;
            out.emit(&home, |h| format!("home {} created: {}", h.id, h.name))
        }
        Command::Room(RoomCommand::Add {
            id,
            home,
            name,
            sort_order,
        }) => {
            let room = store.create_room(Room {
                id: RoomId(id),
                home_id: HomeId(home),
                name,
                sort_order,
            })?;
            out.emit(&room, |r| format!("room {} created in home {}: {}", r.id, r.home_id, r.name))
        }
        Command::Room(RoomCommand::List { home }) => {
            let rooms = store.rooms(HomeId(home))?;
            out.emit(&rooms, |rooms| {
                rooms
                    .iter()
                    .map(|r| format!("{:>4}  {}  {}", r.sort_order, r.id, r.name))
                    .collect::<Vec<_>>()
                    .join("\n")
            })
        }
        Command::Device(DeviceCommand::Add {
            id,
            device_type,
            name,
            sort_order,
        }) => {
            let device = store.register_device(Device {
                id,
                device_type,
                name,
                sort_order,
            })?;
            out.emit(&device, |d| format!("device {} registered as {} ({})", d.id, d.device_type, d.name))
        }
        Command::Device(DeviceCommand::List) => {
            let devices = store.devices()?;
            out.emit(&devices, |devices| {
                devices
                    .iter()
                    .map(|d| format!("{:>4}  {}  {:<14} {}", d.sort_order, d.id, d.device_type.as_str(), d.name))
                    .collect::<Vec<_>>()
                    .join("\n")
            })
        }
        Command::Place { device, room, at } => {
            let placement = store.place(device, RoomId(room), at.unwrap_or(now))?;
            out.emit(&placement, |p| {
                format!("{} placed in room {} at {}", p.device_id, p.room_id, p.placed_at.to_rfc3339())
            })
        }
        Command::Move { device, room, at } => {
            let placement = store.move_to(device, RoomId(room), at.unwrap_or(now))?;
            out.emit(&placement, |p| {
                format!("{} moved to room {} at {}", p.device_id, p.room_id, p.placed_at.to_rfc3339())
            })
        }
        Command::Remove { device, at } => {
            let closed = store.remove(device, at.unwrap_or(now))?;
            out.emit(&closed, |p| {
                let removed = p.removed_at.map(|t| t.to_rfc3339()).unwrap_or_default();
                format!("{} removed from room {} at {}", p.device_id, p.room_id, removed)
            })
        }
        Command::Where { device } => {
            if store.device(device)?.is_none() {
                return Err(home_ledger::LedgerError::UnknownDevice(device).into());
            }
            let current = store.current_placement(device)?;
            out.emit(&current, |p| match p {
                Some(p) => format!("{} is in room {} since {}", device, p.room_id, p.placed_at.to_rfc3339()),
                None => format!("{} is not placed", device),
            })
        }
        Command::History { device } => {
            if store.device(device)?.is_none() {
                return Err(home_ledger::LedgerError::UnknownDevice(device).into());
            }
            let history = store.history(device)?;
            out.emit(&history, |history| {
                history
                    .iter()
                    .map(|p| {
                        let until = p.removed_at.map(|t| t.to_rfc3339()).unwrap_or_else(|| "now".to_string());
                        format!("room {:<6} {} .. {}", p.room_id, p.placed_at.to_rfc3339(), until)
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            })
        }
        Command::Record {
            device,
            at,
            temperature,
            humidity,
            co2,
            light,
        } => {
            let measurement = Measurement {
                device_id: device,
                measured_at: at.unwrap_or(now),
                temperature_celsius: temperature,
                humidity_percent: humidity,
                co2_ppm: co2,
                light_level: light,
            };
            store.record(&measurement)?;
            out.emit(&measurement, |m| format!("recorded {}", describe_measurement(m)))
        }
        Command::Latest { device } => {
            if store.device(device)?.is_none() {
                return Err(home_ledger::LedgerError::UnknownDevice(device).into());
            }
            let latest = store.latest(device)?;
            out.emit(&latest, |m| match m {
                Some(m) => describe_measurement(m),
                None => format!("{} has no measurements", device),
            })
        }
        Command::Range { device, from, to } => {
            let mut count = 0usize;
            for row in store.range(device, from, to.unwrap_or(now))? {
                let m = row?;
                // one JSON object per line so large ranges stream
                out.emit(&m, describe_measurement)?;
                count += 1;
            }
            info!("Range for {} returned {} measurement(s)", device, count);
            Ok(())
        }
        Command::ImportCsv {
            device,
            file,
            timezone,
        } => {
            let source = File::open(&file).with_context(|| format!("failed to open file: {}", file.display()))?;
            let outcome = import_csv::import(store, BufReader::new(source), device, timezone, cfg.import_batch_size)
                .with_context(|| format!("importing {}", file.display()))?;
            out.emit(&outcome, |o| {
                format!(
                    "Inserted {} records from {} ({} already present)",
                    o.inserted,
                    file.display(),
                    o.duplicates
                )
            })
        }
        Command::IngestAdvert {
            device,
            service_data,
            manufacturer_data,
            at,
        } => {
            let service = hex::decode(service_data.trim()).context("service data is not valid hex")?;
            let manufacturer = hex::decode(manufacturer_data.trim()).context("manufacturer data is not valid hex")?;
            let measurement = ingest::record_advertisement(
                store,
                device,
                &HashMap::from([(MANUFACTURER_COMPANY_ID, manufacturer)]),
                &HashMap::from([(SERVICE_DATA_UUID, service)]),
                at.unwrap_or(now),
            )?;
            out.emit(&measurement, |m| format!("recorded {}", describe_measurement(m)))
        }
        Command::SeedDemo { days } => match fake_data::seed_demo(store, now, days, cfg.import_batch_size)? {
            Some(summary) => out.emit(&summary, |s| {
                format!(
                    "seeded home {} ({} rooms, {} devices, {} move(s), {} measurements)",
                    s.home, s.rooms, s.devices, s.moves, s.measurements.inserted
                )
            }),
            None => out.emit(&Option::<fake_data::DemoSummary>::None, |_| {
                "demo home already present; nothing to do".to_string()
            }),
        },
    }
}

fn run(cli: Cli) -> Result<()> {
    // 1) Load config
    let mut cfg = Config::from_env()?;
    if let Some(url) = cli.database_url {
        cfg.database_url = url;
    }
    info!(
        "Config loaded (pool_size={}, connect_timeout={}s, import_batch_size={}, range_page_size={}, run_migrations={})",
        cfg.pool_size,
        cfg.connect_timeout.as_secs(),
        cfg.import_batch_size,
        cfg.range_page_size,
        cfg.run_migrations
    );

    // 2) Connect DB
    let store = PgStore::connect(&cfg.database_url, cfg.pool_size, cfg.connect_timeout)
        .context("DB connection failed")?
        .with_page_size(cfg.range_page_size.get());
    info!("Connected to database");

    // 3) Apply pending database migrations
    let migrate_only = matches!(cli.command, Command::Migrate);
    if cfg.run_migrations || migrate_only {
        store.run_migrations()?;
    } else {
        info!("Skipping migrations via RUN_MIGRATIONS={}", cfg.run_migrations);
    }

    // 4) Run the command
    let out = Output { json: cli.json };
    execute(&store, cli.command, &cfg, &out)
}

/// `--env-file` must be honoured before clap reads `env` fallbacks, so it is found by hand.
fn env_file_from_args() -> Option<PathBuf> {
    let mut args = std::env::args_os().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--" {
            break;
        }
        if arg == "--env-file" {
            return args.next().map(PathBuf::from);
        }
        if let Some(path) = arg.to_str().and_then(|s| s.strip_prefix("--env-file=")) {
            return Some(PathBuf::from(path));
        }
    }
    None
}

fn load_env_file(explicit: Option<PathBuf>) -> Result<Option<LoadedEnvFile>> {
    match explicit {
        Some(path) => {
            dotenvy::from_path(&path).with_context(|| format!("failed to load env file {}", path.display()))?;
            Ok(Some(LoadedEnvFile { path, explicit: true }))
        }
        None => match dotenvy::dotenv() {
            Ok(path) => Ok(Some(LoadedEnvFile { path, explicit: false })),
            Err(e) if e.not_found() => Ok(None),
            Err(e) => Err(e).context("failed to load .env"),
        },
    }
}

fn main() {
    let loaded_env = match load_env_file(env_file_from_args()) {
        Ok(info) => info,
        Err(err) => {
            eprintln!("fatal: {:#}", err);
            std::process::exit(1);
        }
    };

    let cli = Cli::parse();

    // Init logging after environment so RUST_LOG from .env is respected.
    let default_filter = env_logger::Env::default().default_filter_or("info");
    env_logger::Builder::from_env(default_filter)
        .format_timestamp_secs()
        .init();

    if let Some(info) = loaded_env.as_ref() {
        let origin = if info.explicit { "CLI-specified" } else { "default" };
        info!("Environment loaded from {} .env file: {}", origin, info.path.display());
    }

    info!(
        "home-ledger {} (git {}) starting",
        env!("CARGO_PKG_VERSION"),
        env!("BUILD_TIME_GIT_HASH")
    );
    if let Err(e) = run(cli) {
        error!("fatal: {:#}", e);
        std::process::exit(1);
    }
}
