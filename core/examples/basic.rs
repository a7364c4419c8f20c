//! Basic circuit breaker usage example

use std::sync::Arc;
use std::time::Duration;
use tripwire::{CircuitBreaker, CircuitError, ManualClock};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Circuit Breaker Basic Example ===\n");

    // A manual clock lets the example skip the recovery wait
    let clock = Arc::new(ManualClock::new());

    let circuit = CircuitBreaker::builder("planets_api")
        .failure_threshold(3)
        .recovery_timeout(Duration::from_secs(5))
        .clock(clock.clone())
        .on_open(|name| println!("Circuit '{}' opened", name))
        .on_close(|name| println!("Circuit '{}' closed", name))
        .on_half_open(|name| println!("Circuit '{}' half-open, probing", name))
        .build()?;

    println!("Initial state: {}\n", circuit.state_name());

    println!("--- Successful calls ---");
    for i in 1..=2 {
        report(circuit.call(|| Ok::<_, String>(format!("Planet {}", i))));
    }
    println!("State: {}\n", circuit.state_name());

    println!("--- Triggering failures ---");
    for i in 1..=3 {
        report(circuit.call(|| Err::<String, _>(format!("connection refused ({})", i))));
    }
    println!("State: {}\n", circuit.state_name());

    println!("--- Attempting call while open ---");
    report(circuit.call(|| Ok::<_, String>("never runs".to_string())));
    println!();

    println!("--- Six seconds later ---");
    clock.advance(Duration::from_secs(6));
    report(circuit.call(|| Ok::<_, String>("Tatooine".to_string())));
    println!("State: {}", circuit.state_name());

    Ok(())
}

fn report(result: Result<String, CircuitError<String>>) {
    match result {
        Ok(value) => println!("ok: {}", value),
        Err(CircuitError::Execution(e)) => println!("failed: {}", e),
        Err(rejected) => println!("rejected: {}", rejected),
    }
}
