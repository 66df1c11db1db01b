//! Demo driver for the lanes runtime.

use clap::{Parser, Subcommand};
use lanes::{
    delay, initialize_with, set_fault_handler, shutdown, switch_to_background,
    switch_to_dynamic_pool, switch_to_main, switch_to_static_pool, where_am_i, InitOptions,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Parser)]
#[command(name = "lanes-demo")]
#[command(about = "Exercise lanes, pools and switching", long_about = None)]
struct Cli {
    /// Worker count for the static pool (0 = per-CPU default)
    #[arg(long, default_value_t = 0)]
    static_pool: usize,

    /// Worker cap for the dynamic pool
    #[arg(long, default_value_t = 64)]
    dynamic_cap: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bounce a counter between the main and background lanes
    Pingpong {
        /// Number of round trips
        #[arg(short, long, default_value_t = 1000)]
        rounds: usize,
    },
    /// Flood the dynamic pool and report the observed concurrency
    Burst {
        /// Number of jobs to queue
        #[arg(short, long, default_value_t = 200)]
        tasks: usize,
        /// Per-job busy time in milliseconds
        #[arg(short, long, default_value_t = 10)]
        millis: u64,
    },
    /// Print where each kind of target reports itself
    Whereami,
    /// Schedule a delayed action and wait for it
    Delay {
        /// Delay in milliseconds
        #[arg(short, long, default_value_t = 500)]
        millis: u64,
    },
}

fn main() {
    let cli = Cli::parse();

    initialize_with(InitOptions {
        static_pool_size: if cli.static_pool == 0 {
            None
        } else {
            Some(cli.static_pool)
        },
        dynamic_pool_cap: Some(cli.dynamic_cap),
        ..Default::default()
    });
    set_fault_handler(|fault| eprintln!("fault on {}: {}", fault.target(), fault.message()));

    let result = match cli.command {
        Commands::Pingpong { rounds } => pingpong(rounds),
        Commands::Burst { tasks, millis } => burst(tasks, millis),
        Commands::Whereami => whereami(),
        Commands::Delay { millis } => delayed(millis),
    };

    shutdown();
    if let Err(err) = result {
        eprintln!("error: {}", err);
        std::process::exit(1);
    }
}

fn pingpong(rounds: usize) -> lanes::Result<()> {
    let to_main = switch_to_main()?;
    let to_background = switch_to_background()?;
    let hops = Arc::new(AtomicUsize::new(0));

    let start = Instant::now();
    for _ in 0..rounds {
        let count = hops.clone();
        to_main
            .dispatch(move || {
                count.fetch_add(1, Ordering::SeqCst);
            })?
            .join()?;
        let count = hops.clone();
        to_background
            .dispatch(move || {
                count.fetch_add(1, Ordering::SeqCst);
            })?
            .join()?;
    }
    let elapsed = start.elapsed();

    println!(
        "{} round trips ({} hops) in {:?} ({:.1} us/hop)",
        rounds,
        hops.load(Ordering::SeqCst),
        elapsed,
        elapsed.as_micros() as f64 / (rounds * 2) as f64
    );
    Ok(())
}

fn burst(tasks: usize, millis: u64) -> lanes::Result<()> {
    let pool = lanes::dynamic_pool()?;
    let peak = Arc::new(AtomicUsize::new(0));
    let running = Arc::new(AtomicUsize::new(0));

    let start = Instant::now();
    let handles: Vec<_> = (0..tasks)
        .map(|_| {
            let peak = peak.clone();
            let running = running.clone();
            pool.queue_task(move || {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(millis));
                running.fetch_sub(1, Ordering::SeqCst);
            })
        })
        .collect::<lanes::Result<_>>()?;
    for handle in handles {
        handle.join()?;
    }

    println!(
        "{} jobs of {}ms in {:?}; peak concurrency {} (cap {})",
        tasks,
        millis,
        start.elapsed(),
        peak.load(Ordering::SeqCst),
        pool.max_concurrency()
    );
    Ok(())
}

fn whereami() -> lanes::Result<()> {
    println!("caller:       {}", where_am_i());
    for switch in [
        switch_to_main()?,
        switch_to_background()?,
        switch_to_static_pool()?,
        switch_to_dynamic_pool()?,
    ] {
        let name = switch.target_name().to_string();
        switch
            .dispatch(move || println!("{:<13} {}", format!("{}:", name), where_am_i()))?
            .join()?;
    }
    Ok(())
}

fn delayed(millis: u64) -> lanes::Result<()> {
    let start = Instant::now();
    println!("scheduling action in {}ms from {}", millis, where_am_i());

    // From an unmanaged thread the delayed action lands on the background
    // lane.
    let handle = delay(Duration::from_millis(millis), move || {
        println!("fired after {:?} on {}", start.elapsed(), where_am_i());
    })?;
    handle.join()
}
