use anyhow::{Context, Result};
use chrono::Local;
use rollcall_store::{AttendanceLedger, Gallery};
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing_subscriber::EnvFilter;

mod config;
mod display;
mod session;

use session::{SessionEvent, SessionHandle, SessionSettings};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cfg = config::Config::from_env();
    std::fs::create_dir_all(&cfg.data_dir)
        .with_context(|| format!("failed to create data dir {}", cfg.data_dir.display()))?;

    // Missing files start empty; files that exist but do not parse are fatal.
    let gallery = Gallery::load(cfg.gallery_path(), cfg.faces_dir())
        .context("failed to load the identity gallery")?;
    let ledger = AttendanceLedger::load(cfg.ledger_path(), cfg.cooldown_secs)
        .context("failed to load the attendance ledger")?;

    tracing::info!(
        data_dir = %cfg.data_dir.display(),
        identities = gallery.len(),
        "rollcall ready"
    );

    let mut stores = Some((gallery, ledger));
    let mut input = BufReader::new(tokio::io::stdin()).lines();

    loop {
        println!();
        println!("--- Rollcall Attendance ---");
        println!("1. Start attendance");
        println!("2. List known identities");
        println!("3. Exit");
        prompt("Enter choice: ")?;

        let Some(line) = input.next_line().await? else {
            break; // stdin closed
        };

        match line.trim() {
            "1" => {
                let Some((gallery, ledger)) = stores.take() else {
                    break;
                };
                let handle = session::spawn(SessionSettings::from_config(&cfg), gallery, ledger);
                stores = Some(drive_session(handle, &mut input).await?);
            }
            "2" => {
                let Some((gallery, _)) = stores.as_ref() else {
                    break;
                };
                if gallery.is_empty() {
                    println!("No identities enrolled yet.");
                } else {
                    println!("--- Known identities ---");
                    for name in gallery.list_names() {
                        println!("{name}");
                    }
                }
            }
            "3" => break,
            _ => println!("Invalid choice!"),
        }
    }

    tracing::info!("rollcall exiting");
    Ok(())
}

/// Consume session events until the session ends, printing operator-facing
/// lines and answering enrollment name requests. Returns the stores.
async fn drive_session(
    mut handle: SessionHandle,
    input: &mut Lines<BufReader<Stdin>>,
) -> Result<(Gallery, AttendanceLedger)> {
    println!("Starting attendance. Press 'q' or Escape in the video window to stop.");

    while let Some(event) = handle.events.recv().await {
        match event {
            SessionEvent::AttendanceMarked { name } => {
                println!(
                    "[ATTENDANCE] {name} marked present at {}",
                    Local::now().format("%H:%M:%S")
                );
            }
            SessionEvent::SpoofSuspected { name } => {
                println!("[WARNING] possible spoof attempt for {name} — no mark recorded");
            }
            SessionEvent::LowLight => {
                println!("[LIGHTING] too dark for detection; improve lighting");
            }
            SessionEvent::ChallengeStep { prompt: step } => {
                println!("[LIVENESS] Please {step} now.");
            }
            SessionEvent::ChallengeFailed { prompt: step } => {
                println!("[LIVENESS] Challenge failed ({step}). Face not enrolled.");
            }
            SessionEvent::EnrollRequested { reply } => {
                println!("[NEW FACE] Liveness passed.");
                prompt("Enter name for this new face (leave empty to skip): ")?;
                let name = input
                    .next_line()
                    .await?
                    .map(|l| l.trim().to_string())
                    .unwrap_or_default();
                let _ = reply.send((!name.is_empty()).then_some(name));
            }
            SessionEvent::Enrolled { name } => {
                println!("[NEW FACE] {name} saved.");
            }
            SessionEvent::EnrollAborted => {
                println!("[NEW FACE] Enrollment skipped.");
            }
            SessionEvent::EnrollFailed { reason } => {
                println!("[NEW FACE] Enrollment failed: {reason}");
            }
            SessionEvent::Ended { reason } => {
                println!("Session ended: {reason}");
            }
        }
    }

    handle.finish()
}

fn prompt(text: &str) -> Result<()> {
    print!("{text}");
    std::io::stdout().flush().context("failed to flush stdout")?;
    Ok(())
}
