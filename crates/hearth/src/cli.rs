//! Plain-text rendering of runtime results for the terminal.
use std::process::ExitCode;

use hearth_core::ActivationEvent;
use hearth_core::ResolutionResult;
use hearth_core::plugin_system::{ActivationReport, PluginRecordSnapshot, ShutdownReport};

/// Prints the activation order, or every problem found. Failures exit with 1.
pub fn print_resolution(result: &ResolutionResult) -> ExitCode {
    match result {
        ResolutionResult::Success(order) if order.is_empty() => {
            println!("No plugins to resolve.");
            ExitCode::SUCCESS
        }
        ResolutionResult::Success(order) => {
            println!("Activation order:");
            for (position, id) in order.iter().enumerate() {
                println!("  {}. {}", position + 1, id);
            }
            ExitCode::SUCCESS
        }
        ResolutionResult::Failure(failure) => {
            println!("Resolution failed ({}):", failure.code());
            if let Some(cycle) = &failure.cycle {
                println!("  cycle: {}", cycle.join(" -> "));
            }
            for missing in &failure.missing {
                println!("  missing: {}", missing);
            }
            for conflict in &failure.conflicts {
                println!("  {}: {}", conflict.kind.description(), conflict);
            }
            ExitCode::from(1)
        }
    }
}

pub fn print_records(records: &[PluginRecordSnapshot]) {
    if records.is_empty() {
        println!("No plugins found.");
        return;
    }
    for record in records {
        let mut line = format!("{} {} [{}]", record.id, record.version, record.state);
        if !record.dependencies.is_empty() {
            line.push_str(&format!(" requires {}", record.dependencies.join(", ")));
        }
        if let Some(error) = &record.last_error {
            line.push_str(&format!(" error: {}", error));
        }
        println!("{}", line);
    }
}

pub fn print_activation(event: &ActivationEvent, report: &ActivationReport) {
    if report.activated.is_empty() && report.failures.is_empty() {
        println!("No plugin activated on {}.", event);
    }
    for id in &report.activated {
        println!("Activated {} on {}", id, event);
    }
    for failure in &report.failures {
        println!("Failed: {}", failure);
    }
}

pub fn print_shutdown(report: &ShutdownReport) {
    for id in &report.deactivated {
        println!("Deactivated {}", id);
    }
    for failure in &report.failures {
        println!("Shutdown failure: {}", failure);
    }
    for id in &report.leaked {
        println!("Warning: isolation context of {} is still referenced", id);
    }
}
