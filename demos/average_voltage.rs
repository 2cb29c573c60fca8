// Average voltage monitor
//
// Repeatedly queries the average voltage of one source and prints it.

use clap::Parser;
use infiniscope_rs::{
    ChannelRef, ConnectOptions, IdentityPolicy, MeasurementInterval, Scope, ScopeError,
};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "average_voltage")]
#[command(about = "Print the average voltage of an oscilloscope channel")]
struct Args {
    /// VISA resource string, host[:port] or serial device
    address: String,

    /// Source to measure
    #[arg(short, long, default_value = "1")]
    source: String,

    /// Measure over whole cycles instead of the displayed record
    #[arg(short, long)]
    cycle: bool,

    /// Number of readings
    #[arg(short = 'n', long, default_value_t = 10)]
    count: usize,

    /// Delay between readings in milliseconds
    #[arg(short, long, default_value_t = 500)]
    interval_ms: u64,

    /// Only accept a DSO-X 2024A
    #[arg(long)]
    strict: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    env_logger::init();

    let source: ChannelRef = args.source.parse()?;
    let interval = if args.cycle {
        MeasurementInterval::Cycle
    } else {
        MeasurementInterval::Display
    };
    let policy = if args.strict {
        IdentityPolicy::dsox2024a()
    } else {
        IdentityPolicy::any()
    };

    let mut scope = Scope::connect(&args.address, ConnectOptions::new(policy))?;
    println!("Measuring {} on {}", source, scope.identity().model);

    for reading in 1..=args.count {
        match scope.measure_average_voltage(source, interval) {
            Ok(volts) => println!("{:>4}: {:.6} V", reading, volts),
            Err(ScopeError::Measurement(e)) => println!("{:>4}: {}", reading, e),
            Err(e) => return Err(e.into()),
        }
        std::thread::sleep(Duration::from_millis(args.interval_ms));
    }

    scope.close()?;
    Ok(())
}
