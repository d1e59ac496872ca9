//! Output helpers shared by the commands: text vs JSON, quiet handling.

use colored::Colorize;
use serde::Serialize;

use crate::OutputFormat;

/// Print a serializable result in the selected format.
pub fn print<T: Serialize>(value: &T, format: OutputFormat, quiet: bool) {
    if quiet {
        return;
    }

    match format {
        OutputFormat::Json => match serde_json::to_string_pretty(value) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("{}: failed to serialize output: {}", "Error".red().bold(), e),
        },
        OutputFormat::Text => {
            // Text rendering is command-specific; callers print their own
            // summaries and only use this path for JSON.
        }
    }
}

/// Print a success line in text mode.
pub fn success(message: &str, format: OutputFormat, quiet: bool) {
    if quiet {
        return;
    }
    if let OutputFormat::Text = format {
        println!("{} {}", "OK".green().bold(), message);
    }
}
