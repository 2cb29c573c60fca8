// Waveform acquisition in different transfer formats
//
// This example reads the same channel as bytes, words and ASCII text and prints
// a short summary of each trace.

use clap::Parser;
use infiniscope_rs::{
    ByteOrder, ChannelRef, CodeReference, ConnectOptions, Encoding, IdentityPolicy, Scope, Trace,
    TraceRequest,
};
use polars::prelude::*;

#[derive(Parser)]
#[command(name = "data_acquisition")]
#[command(about = "Read waveform traces from a SCPI oscilloscope")]
struct Args {
    /// VISA resource string, host[:port] or serial device
    address: String,

    /// Source to read (1, chan2, math, wmem1, ...)
    #[arg(short, long, default_value = "chan1")]
    source: String,

    /// Number of points to request instead of the maximum
    #[arg(short, long)]
    points: Option<u32>,

    /// Shift each trace so that its first sample sits at the vertical origin
    #[arg(long)]
    first_sample_reference: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    if args.verbose {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Debug)
            .init();
    } else {
        env_logger::init();
    }

    let source: ChannelRef = args.source.parse()?;
    let mut options = ConnectOptions::new(IdentityPolicy::any());
    if args.first_sample_reference {
        options = options.with_code_reference(CodeReference::FirstSample);
    }

    println!("Oscilloscope Data Acquisition Example");
    println!("=====================================\n");

    let mut scope = Scope::connect(&args.address, options)?;
    println!("Connected to {}\n", scope.identity());

    let requests = [
        ("1. Signed bytes", TraceRequest::new(source).encoding(Encoding::Byte)),
        (
            "2. Signed words, LSB first",
            TraceRequest::new(source)
                .encoding(Encoding::Word)
                .byte_order(ByteOrder::LsbFirst),
        ),
        ("3. ASCII", TraceRequest::new(source).encoding(Encoding::Ascii)),
    ];

    for (title, request) in requests {
        let request = match args.points {
            Some(points) => request.points(points),
            None => request.maximum_points(),
        };
        println!("{}", title);
        let trace = scope.get_trace(request)?;
        print_trace_summary(&trace)?;
    }

    scope.close()?;
    println!("\nData acquisition examples completed!");
    Ok(())
}

// Helper function to print basic statistics about a trace
fn print_trace_summary(trace: &Trace) -> Result<(), Box<dyn std::error::Error>> {
    if trace.is_empty() {
        println!("   Empty trace");
        return Ok(());
    }

    let stats = trace
        .lazy()?
        .select([
            col("time").min().alias("t_min"),
            col("time").max().alias("t_max"),
            col("voltage").min().alias("v_min"),
            col("voltage").max().alias("v_max"),
            col("voltage").mean().alias("v_mean"),
        ])
        .collect()?;

    let get = |name: &str| -> Result<f64, PolarsError> {
        Ok(stats.column(name)?.f64()?.get(0).unwrap_or(f64::NAN))
    };

    println!("   Captured {} samples", trace.len());
    println!("   Time range: {:.3e}s to {:.3e}s", get("t_min")?, get("t_max")?);
    println!(
        "   Data range: {:.3}V to {:.3}V (mean: {:.3}V)",
        get("v_min")?,
        get("v_max")?,
        get("v_mean")?
    );
    Ok(())
}
