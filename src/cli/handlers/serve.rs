// src/cli/handlers/serve.rs

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use super::commons;
use crate::{
    CancellationToken,
    cli::args::ServeArgs,
    core::{backend::ShellBackend, provisioner::Provisioner, settings::SettingsStore, task_runner::TaskRunner},
    models::ProjectType,
    protocol::{
        messages::{Inbound, Outbound},
        session::Session,
    },
    system::executor,
};

/// Serves one dialog session over stdio: one JSON message per line in, one
/// per line out. Logs go to stderr.
pub fn handle(args: Vec<String>, cancellation_token: &CancellationToken) -> Result<()> {
    let serve_args = ServeArgs::try_parse_from(&args)?;
    let store = commons::open_settings()?;
    let project_type = match serve_args.project_type.as_deref() {
        Some(raw) => commons::parse_project_type(raw)?,
        None => store.settings().project_type.unwrap_or(ProjectType::Mcu),
    };

    commons::block_on(
        serve(project_type, store, serve_args.show_output, Arc::clone(cancellation_token)),
        cancellation_token,
    )?
}

async fn serve(
    project_type: ProjectType,
    store: SettingsStore,
    show_output: bool,
    cancellation_token: CancellationToken,
) -> Result<()> {
    let settings = store.settings().clone();
    let backend = Arc::new(ShellBackend::new(&settings).with_cancellation(Arc::clone(&cancellation_token)));
    let runner = TaskRunner::new(&settings.shell);
    let provisioner = Provisioner::new(runner.clone(), &settings).with_visible_output(show_output);

    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Outbound>();
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<Inbound>();
    let session = Session::new(project_type, store, backend, runner, provisioner, outbound_tx.clone());
    log::info!("Serving a {} dialog (session {}).", project_type, session.id());
    let session_task = tokio::spawn(session.run(inbound_rx));

    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(message) = outbound_rx.recv().await {
            match message.to_json() {
                Ok(line) => {
                    stdout.write_all(line.as_bytes()).await?;
                    stdout.write_all(b"\n").await?;
                    stdout.flush().await?;
                }
                Err(e) => log::warn!("Could not serialize {:?}: {}", message, e),
            }
        }
        Ok::<(), std::io::Error>(())
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if line.trim().is_empty() {
                    continue;
                }
                match Inbound::parse(&line) {
                    Ok(message) => {
                        let closing = message == Inbound::Cancel;
                        if inbound_tx.send(message).is_err() || closing {
                            break;
                        }
                    }
                    Err(e) => {
                        log::debug!("Rejected inbound line {:?}: {}", line, e);
                        let _ = outbound_tx.send(Outbound::ValidationFailed {
                            error: format!(t!("serve.error.bad_message"), error = e),
                        });
                    }
                }
            }
            _ = executor::wait_for_cancellation(&cancellation_token) => break,
        }
    }

    // Closing the inbound side closes the session, which disposes its tasks.
    drop(inbound_tx);
    session_task.await?;
    drop(outbound_tx);
    writer.await??;
    log::info!("Session ended.");
    Ok(())
}
