use std::thread;

use signal_hook::{
    consts::{SIGINT, SIGTERM},
    iterator::Signals,
};

pub const INTERRUPTED_EXIT_CODE: i32 = 130;

/// On the first SIGINT or SIGTERM runs `on_interrupt` (bringing the stack down)
/// and exits with 130.
pub fn signal_handler<F>(on_interrupt: F)
where
    F: FnOnce() + Send + 'static,
{
    thread::spawn(move || {
        let mut signals = match Signals::new([SIGINT, SIGTERM]) {
            Ok(signals) => signals,
            Err(err) => {
                eprintln!("signal handler setup failed: {}", err);
                return;
            }
        };
        if let Some(signal) = signals.forever().next() {
            tracing::warn!("received signal {}; stopping stack", signal);
            on_interrupt();
            std::process::exit(INTERRUPTED_EXIT_CODE);
        }
    });
}
