//! Live printing of lifecycle events while a command runs.

use colored::Colorize;
use ext_core::{ExtensionEvent, InstallOperation};
use tokio::sync::broadcast::Receiver;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;

/// Prints events from a background task until [`Progress::finish`].
pub struct Progress {
    stop: oneshot::Sender<()>,
    printer: JoinHandle<()>,
}

impl Progress {
    pub fn start(mut events: Receiver<ExtensionEvent>) -> Self {
        let (stop, mut stopped) = oneshot::channel();
        let printer = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    received = events.recv() => match received {
                        Ok(event) => print_event(&event),
                        Err(RecvError::Lagged(skipped)) => print_skipped(skipped),
                        Err(RecvError::Closed) => return,
                    },
                    _ = &mut stopped => break,
                }
            }
            drain(&mut events);
        });
        Self { stop, printer }
    }

    /// Print whatever is still queued, then stop.
    pub async fn finish(self) {
        // The printer only exits early once the channel is closed.
        let _ = self.stop.send(());
        if let Err(e) = self.printer.await {
            debug!("Progress printer ended abnormally: {}", e);
        }
    }
}

fn drain(events: &mut Receiver<ExtensionEvent>) {
    loop {
        match events.try_recv() {
            Ok(event) => print_event(&event),
            Err(TryRecvError::Lagged(skipped)) => print_skipped(skipped),
            Err(TryRecvError::Empty | TryRecvError::Closed) => break,
        }
    }
}

fn print_skipped(skipped: u64) {
    println!("   {} {} events not shown", "...".dimmed(), skipped);
}

fn print_event(event: &ExtensionEvent) {
    match event {
        ExtensionEvent::InstallRequested { identifier, .. } => {
            println!("{} Installing {}", "=>".blue().bold(), identifier.id.cyan());
        }
        ExtensionEvent::BatchInstallCompleted(results) => {
            for result in results {
                match (&result.local, result.error) {
                    (Some(local), None) => {
                        let verb = match result.operation {
                            InstallOperation::Update => "Updated",
                            _ => "Installed",
                        };
                        println!(
                            "   {} {} {} v{}",
                            "OK".green().bold(),
                            verb,
                            local.identifier.id.cyan(),
                            local.version()
                        );
                    }
                    (_, Some(code)) => println!(
                        "   {} {} ({})",
                        "FAILED".red().bold(),
                        result.identifier.id.cyan(),
                        code
                    ),
                    (None, None) => {}
                }
            }
        }
        ExtensionEvent::UninstallRequested(identifier) => {
            println!("{} Uninstalling {}", "=>".blue().bold(), identifier.id.cyan());
        }
        ExtensionEvent::UninstallCompleted { identifier, error } => match error {
            None => println!("   {} Removed {}", "OK".green().bold(), identifier.id.cyan()),
            Some(code) => println!(
                "   {} {} ({})",
                "FAILED".red().bold(),
                identifier.id.cyan(),
                code
            ),
        },
    }
}
