//! # Spawn Simulation
//!
//! Loads a pool manifest and runs the projectile simulation headless.
//!
//! ## Usage
//!
//! ```bash
//! spawn_sim --manifest demos/pools.toml --seed 42 --duration 60 --tick-rate 60
//! ```

use std::time::Instant;

use reservoir::{PoolManifest, SimConfig, Simulation};

/// Manifest used when `--manifest` is not given.
const DEMO_MANIFEST: &str = include_str!("../../../../demos/pools.toml");

fn init_tracing(verbose: bool) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();
}

fn main() {
    println!("╔══════════════════════════════════════════════════════════════════╗");
    println!("║         RESERVOIR - SPAWN SIMULATION                             ║");
    println!("╚══════════════════════════════════════════════════════════════════╝");
    println!();

    let args: Vec<String> = std::env::args().collect();
    let mut config = SimConfig::default();
    let mut manifest_path: Option<String> = None;
    let mut verbose = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--manifest" | "-m" => {
                if i + 1 < args.len() {
                    manifest_path = Some(args[i + 1].clone());
                    i += 1;
                }
            }
            "--seed" | "-s" => {
                if i + 1 < args.len() {
                    config.seed = args[i + 1].parse().unwrap_or(config.seed);
                    i += 1;
                }
            }
            "--duration" | "-d" => {
                if i + 1 < args.len() {
                    config.duration_secs = args[i + 1].parse().unwrap_or(config.duration_secs);
                    i += 1;
                }
            }
            "--tick-rate" | "-t" => {
                if i + 1 < args.len() {
                    config.tick_rate = args[i + 1].parse().unwrap_or(config.tick_rate);
                    i += 1;
                }
            }
            "--burst" | "-b" => {
                if i + 1 < args.len() {
                    config.max_burst = args[i + 1].parse().unwrap_or(config.max_burst);
                    i += 1;
                }
            }
            "--reload" | "-r" => {
                if i + 1 < args.len() {
                    config.stage_reload_secs =
                        args[i + 1].parse().unwrap_or(config.stage_reload_secs);
                    i += 1;
                }
            }
            "--verbose" | "-v" => verbose = true,
            "--help" | "-h" => {
                println!("Usage: spawn_sim [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -m, --manifest <PATH>      Pool manifest (default: built-in demo)");
                println!("  -s, --seed <SEED>          RNG seed (default: {})", config.seed);
                println!("  -d, --duration <SECS>      Simulated seconds (default: {})", config.duration_secs);
                println!("  -t, --tick-rate <RATE>     Fixed steps per second (default: {})", config.tick_rate);
                println!("  -b, --burst <NUM>          Max spawns per tick (default: {})", config.max_burst);
                println!("  -r, --reload <SECS>        Stage reload period, 0 = never (default: {})", config.stage_reload_secs);
                println!("  -v, --verbose              Debug-level pool logging");
                println!("  -h, --help                 Show this help");
                return;
            }
            _ => {}
        }
        i += 1;
    }

    init_tracing(verbose);

    let manifest = match &manifest_path {
        Some(path) => PoolManifest::from_path(path),
        None => PoolManifest::from_toml_str(DEMO_MANIFEST),
    };
    let manifest = match manifest {
        Ok(manifest) => manifest,
        Err(err) => {
            eprintln!("failed to load manifest: {err}");
            std::process::exit(1);
        }
    };

    println!("┌─ CONFIGURATION ─────────────────────────────────────────────────┐");
    println!("│ Manifest:           {}", manifest_path.as_deref().unwrap_or("built-in demo"));
    println!("│ Pools:              {}", manifest.pools.len());
    println!("│ Seed:               {:#x}", config.seed);
    println!("│ Tick Rate:          {} Hz", config.tick_rate);
    println!("│ Duration:           {} seconds", config.duration_secs);
    println!("│ Max Burst:          {} per tick", config.max_burst);
    println!("└──────────────────────────────────────────────────────────────────┘");
    println!();

    let mut simulation = match Simulation::new(config, &manifest) {
        Ok(simulation) => simulation,
        Err(err) => {
            eprintln!("failed to build registry: {err}");
            std::process::exit(1);
        }
    };

    let start = Instant::now();
    let report = simulation.run().clone();
    let elapsed = start.elapsed();

    println!("┌─ RUN ───────────────────────────────────────────────────────────┐");
    println!("│ Real Time:          {:.3} seconds", elapsed.as_secs_f64());
    println!("│ Ticks:              {}", report.ticks);
    println!("│ Spawned:            {}", report.spawned);
    println!("│ Exhausted:          {}", report.exhausted);
    println!("│ Failures:           {}", report.failures);
    println!("│ Hits (manual):      {}", report.hits);
    println!("│ Auto-Released:      {}", report.auto_releases);
    println!("│ Despawned:          {}", report.despawned);
    println!("│ Peak In Flight:     {}", report.peak_live);
    println!("└──────────────────────────────────────────────────────────────────┘");
    println!();

    println!("┌─ MAINTENANCE ───────────────────────────────────────────────────┐");
    println!("│ Ticks:              {}", report.maintenance_ticks);
    println!("│ Expansions:         {}", report.expansions);
    println!("│ Compactions:        {}", report.defragmentations);
    println!("│ Trimmed:            {}", report.trimmed);
    println!("│ Stage Reloads:      {}", report.stage_reloads);
    let window = simulation.registry().request_window();
    println!("│ Held At Once:       avg {:.1}, peak {}", window.average(), window.peak());
    println!("└──────────────────────────────────────────────────────────────────┘");
    println!();

    println!("┌─ POOLS ─────────────────────────────────────────────────────────┐");
    for pool in simulation.registry().pools() {
        let stats = pool.stats();
        println!(
            "│ {:<16} {:?}  size {:>4}/{:<4} free {:>4}  peak {:>4}  created {:>6}  grown {:>3}x",
            pool.id(),
            pool.config().tier,
            stats.size,
            pool.config().max_size,
            stats.free,
            stats.peak_active,
            stats.total_created,
            stats.expansion_count
        );
    }
    println!("└──────────────────────────────────────────────────────────────────┘");
    println!();

    let factory = simulation.factory();
    println!(
        "Factory: {} created, {} destroyed",
        factory.created(),
        factory.destroyed()
    );
}
