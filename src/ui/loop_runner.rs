//! Main event loop for the TUI.
//!
//! This module contains the core event loop that multiplexes terminal input,
//! background task events, and periodic ticks.

use crate::app::{App, AppEvent, Outcome};
use crate::feed::{ViewState, WorkerCommand};
use crate::keybindings::KeySpec;
use anyhow::Result;
use crossterm::{
    event::{Event, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use futures::StreamExt;
use ratatui::{backend::CrosstermBackend, Terminal};
use std::io::{self, Stdout};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Notify};

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

use super::render::render;

/// The foreground's ends of the background channels.
pub struct Channels {
    /// Diffs, group announcements and fetch results.
    pub events: mpsc::Receiver<AppEvent>,
    /// State changes and update requests for the feed worker.
    pub commands: mpsc::Sender<WorkerCommand>,
    /// What the foreground is showing, for the worker to diff against.
    pub view: watch::Sender<ViewState>,
    /// Wakes every fetch loop early.
    pub wake: Arc<Notify>,
}

/// Runs the TUI application event loop.
///
/// Uses `tokio::select!` to multiplex four event sources:
/// - **Signals**: SIGTERM/SIGINT end the loop
/// - **Terminal input**: Key presses and resizes from crossterm's event stream
/// - **Background tasks**: Worker diffs and fetch results via `AppEvent`
/// - **Periodic tick**: Status expiry
///
/// # Panic Safety
///
/// Installs a panic hook that restores terminal state before unwinding,
/// ensuring the terminal is not left in raw mode on panic.
pub async fn run(app: &mut App, mut channels: Channels, tick: Duration) -> Result<()> {
    // Install panic hook BEFORE setting up terminal
    let original_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen);
        original_hook(panic_info);
    }));

    let mut terminal = setup_terminal()?;
    let mut event_stream = crossterm::event::EventStream::new();
    let mut tick_interval = tokio::time::interval(tick);

    #[cfg(unix)]
    let mut sigterm = signal(SignalKind::terminate())?;
    #[cfg(unix)]
    let mut sigint = signal(SignalKind::interrupt())?;

    let size = terminal.size()?;
    resize(app, size.width, size.height);
    let mut clear = false;

    loop {
        publish(app, &channels).await;

        if app.needs_redraw {
            if std::mem::take(&mut clear) {
                terminal.clear()?;
            }
            app.keep_visible();
            terminal.draw(|f| render(f, app))?;
            app.needs_redraw = false;
        }

        if app.clear_expired_status() {
            app.needs_redraw = true;
        }

        // PERF-013: Drain pending background events before waiting on input
        while let Ok(event) = channels.events.try_recv() {
            let outcome = app.handle_event(event);
            note(app, outcome, &mut clear);
        }

        #[cfg(unix)]
        let sigterm_fut = sigterm.recv();
        #[cfg(not(unix))]
        let sigterm_fut = std::future::pending::<Option<()>>();

        #[cfg(unix)]
        let sigint_fut = sigint.recv();
        #[cfg(not(unix))]
        let sigint_fut = std::future::pending::<Option<()>>();

        tokio::select! {
            biased;

            _ = sigterm_fut => {
                tracing::info!("Received SIGTERM, shutting down gracefully");
                break;
            }

            _ = sigint_fut => {
                tracing::info!("Received SIGINT, shutting down gracefully");
                break;
            }

            maybe_event = event_stream.next() => match maybe_event {
                Some(Ok(Event::Key(key))) if key.kind == KeyEventKind::Press => {
                    let outcome = app.handle_key(KeySpec::from_event(key.code, key.modifiers));
                    if outcome == Outcome::Exit {
                        break;
                    }
                    note(app, outcome, &mut clear);
                }
                Some(Ok(Event::Resize(width, height))) => {
                    resize(app, width, height);
                    clear = true;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "Terminal event error");
                }
                None => break,
            },

            Some(event) = channels.events.recv() => {
                let outcome = app.handle_event(event);
                note(app, outcome, &mut clear);
            }

            _ = tick_interval.tick() => {}
        }
    }

    if channels.commands.send(WorkerCommand::Shutdown).await.is_err() {
        tracing::debug!("Feed worker already stopped");
    }
    restore_terminal(terminal)?;
    Ok(())
}

/// The status bar takes the bottom row.
fn resize(app: &mut App, width: u16, height: u16) {
    app.resize(usize::from(width), usize::from(height.saturating_sub(1)));
}

fn note(app: &mut App, outcome: Outcome, clear: &mut bool) {
    match outcome {
        Outcome::Nothing | Outcome::Exit => {}
        Outcome::RedrawAll => {
            *clear = true;
            app.needs_redraw = true;
        }
        Outcome::Update | Outcome::Refilter | Outcome::TagFilter | Outcome::Retag => {
            app.needs_redraw = true;
        }
    }
}

/// Forwards queued commands and the current view to the background.
async fn publish(app: &mut App, channels: &Channels) {
    for command in app.take_commands() {
        if command == WorkerCommand::ForceUpdate {
            channels.wake.notify_waiters();
        }
        if let Err(e) = channels.commands.send(command).await {
            tracing::warn!(error = %e, "Feed worker is gone; command dropped");
        }
    }

    let view = app.view_state();
    channels.view.send_if_modified(|current| {
        if *current == view {
            false
        } else {
            *current = view;
            true
        }
    });
}

/// Set up the terminal for TUI rendering.
fn setup_terminal() -> Result<Terminal<CrosstermBackend<Stdout>>> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let terminal = Terminal::new(backend)?;
    Ok(terminal)
}

/// Restore terminal to normal state.
fn restore_terminal(mut terminal: Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}
