//! Demonstrates a log file shared between worker threads.
//!
//! Run with: cargo run --example shared_log

use holdfast::retry::{self, handlers};
use holdfast::{diagnostics, OwnedResource, SharedResource};
use parking_lot::Mutex;
use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    // Keep 64 KiB aside so a failing control block allocation has room to retry.
    let reserve = handlers::EmergencyReserve::bytes(64 * 1024);
    let _guard = retry::global().scoped(reserve.handler());

    let path = std::env::temp_dir().join("holdfast_shared_log.txt");
    let log = open_log(path.clone())?;
    tracing::info!("Opened {}", path.display());

    let workers: Vec<_> = (0..4)
        .map(|id| {
            let log = log.clone();
            std::thread::spawn(move || -> io::Result<()> {
                for line in 0..3 {
                    writeln!(log.lock(), "worker {} line {}", id, line)?;
                }
                tracing::info!(worker = id, owners = log.use_count(), "Worker done");
                Ok(())
            })
        })
        .collect();

    for worker in workers {
        worker.join().map_err(|_| "worker panicked")??;
    }

    tracing::info!(owners = log.use_count(), "All workers finished");
    drop(log);

    let contents = std::fs::read_to_string(&path)?;
    tracing::info!("Log has {} lines", contents.lines().count());
    std::fs::remove_file(&path)?;

    // A release function that fails is logged, never propagated.
    let socket: OwnedResource<&str> =
        OwnedResource::from_raw("socket-7", |_: &str| Err::<(), _>("connection reset"));
    drop(socket);
    tracing::info!(
        swallowed = diagnostics::swallowed_release_failures(),
        "Release failures swallowed"
    );

    Ok(())
}

fn open_log(path: PathBuf) -> Result<SharedResource<Mutex<File>>, Box<dyn std::error::Error>> {
    let closing = path.clone();
    let shared = SharedResource::acquire(
        || File::create(&path).map(Mutex::new),
        move |file: Mutex<File>| {
            let result = file.into_inner().sync_all();
            tracing::info!("Closed {}", closing.display());
            result
        },
    )?;
    Ok(shared)
}
