//! fieldops: command-line front end for crews and dispatchers.
//!
//! Runs against the local database (`~/.fieldops/fieldops.db` unless the
//! config says otherwise). The remote store is a collection kept in that
//! same database, first filled from the embedded site register.

use std::sync::Arc;

use chrono::Utc;
use clap::{Parser, Subcommand};
use parking_lot::Mutex;

use fieldops::db::SqliteStore;
use fieldops::error::FieldOpsError;
use fieldops::ledger::ServiceKind;
use fieldops::navigation::{FixedPosition, NavigationUpdate, PositionError, PositionProvider};
use fieldops::persistence::{LocalPersistence, MemoryStore};
use fieldops::route::RoutePlan;
use fieldops::services::sites::{SiteFilter, SiteView};
use fieldops::services::{navigation, routes, sites};
use fieldops::state::{load_config, AppState};
use fieldops::sync::{InMemoryRemote, WriteOutcome};
use fieldops::types::{Category, District, Position};

#[derive(Parser)]
#[command(name = "fieldops")]
#[command(about = "Field operations for water-infrastructure sites")]
struct Cli {
    /// Keep everything in memory; nothing is written to disk
    #[arg(long, env = "FIELDOPS_EPHEMERAL")]
    ephemeral: bool,

    /// Start with the remote store unreachable
    #[arg(long)]
    offline: bool,

    /// Print JSON instead of tables
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List sites
    Sites {
        #[command(flatten)]
        filter: FilterArgs,
        /// Most urgent first instead of alphabetical
        #[arg(long)]
        priority: bool,
    },
    /// Plan a route through the given sites
    Route {
        /// Site ids in visiting order
        #[arg(required = true)]
        site_ids: Vec<String>,
        /// Reorder stops by nearest neighbour from the first stop
        #[arg(long)]
        optimize: bool,
    },
    /// Draft a route over the most urgent open sites
    Suggest {
        #[command(flatten)]
        filter: FilterArgs,
        /// Number of stops
        #[arg(short, long, default_value_t = 5)]
        limit: usize,
    },
    /// Record a service action at a site
    Record {
        site_id: String,
        /// mowing, maintenance, inspection, repair or note
        #[arg(short, long, default_value = "maintenance")]
        kind: String,
        #[arg(short, long, env = "FIELDOPS_WORKER")]
        worker: String,
        #[arg(short, long)]
        note: Option<String>,
    },
    /// Flip a site's completion flag
    Toggle { site_id: String },
    /// Distance, bearing and ETA from a position to a site
    Navigate {
        site_id: String,
        /// Current position as "lat,lng"
        #[arg(long, value_parser = parse_position)]
        from: Position,
        /// Current speed in m/s
        #[arg(long)]
        speed: Option<f64>,
    },
    /// Service ledger statistics
    Stats,
}

#[derive(clap::Args, Clone, Default)]
struct FilterArgs {
    /// District code (CB, CK, JH, PI, PT, ST)
    #[arg(short, long)]
    district: Option<String>,
    /// Category label (I., II.)
    #[arg(short, long)]
    category: Option<String>,
    /// Only sites not yet completed
    #[arg(long)]
    open: bool,
    /// Match against name, id and notes
    #[arg(short, long)]
    text: Option<String>,
    /// Include archived sites
    #[arg(long)]
    archived: bool,
}

impl FilterArgs {
    fn to_filter(&self) -> Result<SiteFilter, FieldOpsError> {
        let district = match &self.district {
            Some(code) => Some(District::from_code(code).ok_or_else(|| {
                FieldOpsError::Config(format!("Unknown district code: {}", code))
            })?),
            None => None,
        };
        Ok(SiteFilter {
            district,
            category: self.category.as_deref().map(Category::from_label),
            completed: self.open.then_some(false),
            include_archived: self.archived,
            text: self.text.clone(),
            ..Default::default()
        })
    }
}

fn parse_position(value: &str) -> Result<Position, String> {
    let (lat, lng) = value
        .split_once(',')
        .ok_or_else(|| format!("expected \"lat,lng\", got {:?}", value))?;
    let lat: f64 = lat.trim().parse().map_err(|e| format!("latitude: {}", e))?;
    let lng: f64 = lng.trim().parse().map_err(|e| format!("longitude: {}", e))?;
    let position = Position::new(lat, lng);
    if !position.is_valid() {
        return Err(format!("{},{} is not a valid coordinate", lat, lng));
    }
    Ok(position)
}

fn main() {
    fieldops::init_logging();
    let cli = Cli::parse();

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: failed to start runtime: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run(cli)) {
        eprintln!("Error: {}", e);
        eprintln!("{}", e.recovery_suggestion());
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), FieldOpsError> {
    let config = load_config()?;

    let persistence: Arc<dyn LocalPersistence> = if cli.ephemeral {
        Arc::new(MemoryStore::new())
    } else {
        Arc::new(SqliteStore::open_configured(config.database_path.as_deref())?)
    };

    let remote = Arc::new(InMemoryRemote::persistent(
        persistence.clone(),
        fieldops::seed::seed_documents()?,
    )?);
    remote.set_online(!cli.offline);

    let position: Arc<dyn PositionProvider> = match &cli.command {
        Command::Navigate { from, speed, .. } => {
            Arc::new(FixedPosition::at(from.lat, from.lng, *speed))
        }
        _ => Arc::new(FixedPosition(Err(PositionError::Unavailable(
            "no position given".into(),
        )))),
    };

    let state = AppState::new(config, remote, persistence, position);
    let report = state.initialize().await?;
    log::debug!("Startup: {:?}", report);

    let result = execute(&state, cli.command, cli.json).await;
    state.shutdown();
    result
}

async fn execute(state: &AppState, command: Command, json: bool) -> Result<(), FieldOpsError> {
    let now = Utc::now();
    match command {
        Command::Sites { filter, priority } => {
            let filter = filter.to_filter()?;
            let views = if priority {
                sites::prioritized_sites(state, &filter, now)
            } else {
                sites::current_sites(state, &filter, now)
            };
            if json {
                print_json(&views)?;
            } else {
                print_sites(&views);
            }
        }
        Command::Route { site_ids, optimize } => {
            let mut plan = routes::build_route(state, &site_ids)?;
            if optimize {
                plan = routes::optimize_route(state, &plan)?;
            }
            print_plan(&plan, json)?;
        }
        Command::Suggest { filter, limit } => {
            let plan = routes::suggest_route(state, &filter.to_filter()?, limit, now)?;
            print_plan(&plan, json)?;
        }
        Command::Record {
            site_id,
            kind,
            worker,
            note,
        } => {
            let kind = ServiceKind::parse(&kind)
                .ok_or_else(|| FieldOpsError::Config(format!("Unknown service kind: {}", kind)))?;
            let (entry, outcome) =
                sites::record_service(state, &site_id, kind, &worker, note.as_deref()).await?;
            if json {
                print_json(&entry)?;
            } else {
                println!(
                    "Recorded {} at {} by {} ({})",
                    entry.kind.as_str(),
                    entry.site_id,
                    entry.worker,
                    describe(outcome)
                );
            }
        }
        Command::Toggle { site_id } => {
            let outcome = sites::toggle_completion(state, &site_id).await?;
            let completed = state.sync.site(&site_id).map(|s| s.is_completed);
            println!(
                "{}: {} ({})",
                site_id,
                if completed == Some(true) { "completed" } else { "open" },
                describe(outcome)
            );
        }
        Command::Navigate { site_id, .. } => {
            let update = Arc::new(Mutex::new(None::<NavigationUpdate>));
            let sink = update.clone();
            let _feed = state.on_navigation_update(move |u| *sink.lock() = Some(u.clone()));

            let session = navigation::start_navigation(state, &site_id)?;
            session.stop();

            let update = update.lock().take().ok_or_else(|| {
                FieldOpsError::PositionUnavailable("no fix received".to_string())
            })?;
            if json {
                print_json(&update)?;
            } else if update.arrived {
                println!("Arrived at {}", update.target_id);
            } else {
                let eta = update
                    .eta_minutes
                    .map(|m| format!("{} min", m))
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{}: {:.2} km, {:.0}° {}, ETA {}",
                    update.target_id,
                    update.distance_km,
                    update.bearing_degrees,
                    fieldops::geo::compass_point(update.bearing_degrees),
                    eta
                );
            }
        }
        Command::Stats => {
            let stats = state.ledger.stats(now);
            if json {
                print_json(&stats)?;
            } else {
                println!("Entries:        {}", stats.total_entries);
                println!("Sites serviced: {}", stats.sites_serviced);
                println!("Last 30 days:   {}", stats.recent_entries);
                for (kind, count) in &stats.by_kind {
                    println!("  {:<12} {}", kind.as_str(), count);
                }
                for (worker, count) in &stats.by_worker {
                    println!("  {:<12} {}", worker, count);
                }
            }
        }
    }
    Ok(())
}

fn describe(outcome: WriteOutcome) -> &'static str {
    match outcome {
        WriteOutcome::Confirmed => "saved",
        WriteOutcome::Pending => "pending sync",
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), FieldOpsError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_sites(views: &[SiteView]) {
    for view in views {
        let site = &view.site;
        println!(
            "{:<20} {:<28} {:<3} {:<3} {:>3} {:<8} {}{}",
            site.id,
            site.name,
            site.district.code(),
            site.category.label(),
            view.risk.score,
            view.risk.level.as_str(),
            if site.is_completed { "done" } else { "open" },
            if view.unsaved {
                " !"
            } else if view.unconfirmed {
                " *"
            } else {
                ""
            }
        );
    }
    println!("{} sites", views.len());
}

fn print_plan(plan: &RoutePlan, json: bool) -> Result<(), FieldOpsError> {
    if json {
        return print_json(plan);
    }
    for (i, stop) in plan.stops.iter().enumerate() {
        let leg = if i == 0 {
            String::new()
        } else {
            plan.stats
                .legs
                .get(i - 1)
                .map(|km| format!("  (+{:.1} km)", km))
                .unwrap_or_default()
        };
        println!("{:>2}. {}{}", i + 1, stop, leg);
    }
    let stats = &plan.stats;
    println!(
        "{:.1} km, {:.1} h driving + {:.1} h work = {:.1} h, {:.1} L fuel",
        stats.total_distance_km,
        stats.driving_hours,
        stats.work_hours,
        stats.total_time_hours,
        stats.fuel_liters
    );
    Ok(())
}
