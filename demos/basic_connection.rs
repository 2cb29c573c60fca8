// Basic connection example
//
// This example connects to an oscilloscope, prints its identity and sets the timebase.

use infiniscope_rs::{ConnectOptions, IdentityPolicy, Scope, TimeMode};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging (optional)
    env_logger::init();

    let address = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "TCPIP0::192.168.1.20::INSTR".to_string());

    println!("Oscilloscope Connection Example");
    println!("===============================\n");

    println!("1. Connecting to {}...", address);
    let options = ConnectOptions::new(IdentityPolicy::contains("DSO-X"));
    let mut scope = Scope::connect(&address, options)?;
    println!("Successfully connected!");

    println!("\n2. Device information:");
    let identity = scope.identity();
    println!("   Manufacturer: {}", identity.manufacturer);
    println!("   Model:        {}", identity.model);
    println!("   Serial:       {}", identity.serial_number);
    println!("   Firmware:     {}", identity.firmware);

    println!("\n3. Setting up the timebase...");
    scope.set_time_mode(TimeMode::Main)?;
    scope.set_time_per_division(100e-6)?;
    println!("   100 us/div, time mode {}", scope.time_mode()?);

    scope.close()?;
    println!("\n4. Connection test completed successfully!");

    Ok(())
}
