//! Terminal notify sink and consent prompt.

use std::io::{self, BufRead, Write};

use candy_core::{CandyEvent, CandyObserver, ConsentPrompt, DeviceDescriptor, Severity};
use tracing::{info, warn};

/// `message : HH:MM:SS.fff [device]`
pub fn format_notice(message: &str, device_id: Option<&str>, timestamp: &str) -> String {
    match device_id {
        Some(id) => format!("{} : {} [{}]", message, timestamp, id),
        None => format!("{} : {}", message, timestamp),
    }
}

/// Prints notices to the terminal; everything else goes to the log.
pub struct ConsoleObserver;

impl CandyObserver for ConsoleObserver {
    fn on_event(&self, event: &CandyEvent) {
        match event {
            CandyEvent::Notice {
                message,
                device_id,
                severity,
            } => {
                let now = chrono::Local::now();
                let line = format_notice(
                    message,
                    device_id.as_deref(),
                    &now.format("%H:%M:%S.%3f").to_string(),
                );
                match severity {
                    Severity::Status => println!("{}", line),
                    Severity::Error => eprintln!("{}", line),
                }
            }
            CandyEvent::DeviceAdded(descriptor) => info!("Device added: {}", descriptor),
            CandyEvent::DeviceRemoved { id } => warn!("Device removed: {}", id),
            CandyEvent::Connected(descriptor) => info!("Connected: {}", descriptor.id()),
            CandyEvent::Closing(descriptor) => info!("Closing: {}", descriptor.id()),
        }
    }
}

/// Asks on stdin before a device is opened.
pub struct StdinPrompt;

impl ConsentPrompt for StdinPrompt {
    fn request_access(&self, descriptor: &DeviceDescriptor) -> bool {
        print!("Allow access to {}? [y/N] ", descriptor);
        if io::stdout().flush().is_err() {
            return false;
        }

        let mut answer = String::new();
        match io::stdin().lock().read_line(&mut answer) {
            Ok(_) => matches!(answer.trim(), "y" | "Y" | "yes"),
            Err(_) => false,
        }
    }
}
