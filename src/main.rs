mod app;
mod config;
mod core;
mod logging;
mod platform;
mod ui;
mod utils;

use std::io;
use std::time::Duration;

use clap::Parser;
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::prelude::*;

use crate::app::App;
use crate::config::{Args, Config};
use crate::core::AppState;
use crate::core::devices::DeviceEnumerator;
use crate::platform::get_probe;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::new(Args::parse())?;
    logging::init(&config);
    tracing::info!("formatusb version: {}", env!("CARGO_PKG_VERSION"));

    let enumerator = DeviceEnumerator::new(get_probe());

    if config.list_only {
        return print_device_list(&enumerator, &config).await;
    }

    // Safety check: Validate terminal size BEFORE entering raw mode or alternate screen.
    let (cols, rows) = crossterm::terminal::size()?;
    if cols == 0 || rows == 0 || cols > 1000 || rows > 1000 {
        anyhow::bail!(
            "Invalid terminal size detected ({}x{}). Please ensure you're running in a valid terminal.",
            cols,
            rows
        );
    }

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new(enumerator, &config);
    app.refresh_devices().await;

    let result = run_app(&mut terminal, &mut app).await;

    // Never leave a helper running behind us
    app.supervisor.cancel().await;
    if let Err(e) = utils::remove_scratch_log(&app.scratch_log) {
        tracing::warn!("Could not remove {}: {e}", app.scratch_log.display());
    }

    // Restore terminal
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    if let Err(e) = result {
        eprintln!("Error: {e}");
    }

    Ok(())
}

async fn print_device_list(enumerator: &DeviceEnumerator, config: &Config) -> anyhow::Result<()> {
    let entries = enumerator
        .build_display_list(config.show_all, config.show_partitions)
        .await;

    if config.json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else {
        for entry in &entries {
            println!("{}", entry.text);
        }
    }

    Ok(())
}

async fn run_app<B: Backend>(terminal: &mut Terminal<B>, app: &mut App) -> anyhow::Result<()> {
    loop {
        app.tick = app.tick.wrapping_add(1);

        // Pick up output and completion of a running format job
        app.pump_job().await;

        terminal.draw(|f| ui::draw(f, app))?;

        // Poll for events with timeout for tick
        if event::poll(Duration::from_millis(100))? {
            if let Event::Key(key) = event::read()? {
                if key.kind != KeyEventKind::Press {
                    continue;
                }

                match &app.state {
                    AppState::Idle => {
                        handle_idle_input(app, key.code).await;
                    }
                    AppState::EditingLabel => {
                        handle_label_input(app, key.code);
                    }
                    AppState::ConfirmDestructive(_) => {
                        handle_confirm_input(app, key.code);
                    }
                    AppState::Output => {
                        handle_output_input(app, key.code).await;
                    }
                    AppState::Error(_) | AppState::Success(_) => {
                        handle_message_input(app, key.code);
                    }
                }

                if app.should_quit {
                    return Ok(());
                }
            }
        }
    }
}

async fn handle_idle_input(app: &mut App, key: KeyCode) {
    match key {
        KeyCode::Char('q') => app.should_quit = true,
        KeyCode::Up => app.select_previous(),
        KeyCode::Down => app.select_next(),
        KeyCode::Enter => app.enter_confirm_mode(),
        KeyCode::Char('f') => app.cycle_fs(),
        KeyCode::Char('t') => app.cycle_scheme(),
        KeyCode::Char('l') => app.enter_label_edit(),
        KeyCode::Char('a') => app.toggle_show_all().await,
        KeyCode::Char('p') => app.toggle_show_partitions().await,
        KeyCode::Char('r') => app.refresh_devices().await,
        _ => {}
    }
}

fn handle_label_input(app: &mut App, key: KeyCode) {
    match key {
        KeyCode::Esc | KeyCode::Enter => app.cancel(),
        KeyCode::Backspace => app.pop_label_char(),
        KeyCode::Char(c) => app.push_label_char(c),
        _ => {}
    }
}

fn handle_confirm_input(app: &mut App, key: KeyCode) {
    match key {
        KeyCode::Esc => app.cancel(),
        KeyCode::Enter => app.format_selected(),
        KeyCode::Backspace => {
            app.input_buffer.pop();
        }
        KeyCode::Char(c) => {
            app.input_buffer.push(c);
        }
        _ => {}
    }
}

async fn handle_output_input(app: &mut App, key: KeyCode) {
    match key {
        KeyCode::Esc | KeyCode::Char('b') => app.leave_output().await,
        KeyCode::Char('q') if !app.supervisor.is_active() => app.should_quit = true,
        _ => {}
    }
}

fn handle_message_input(app: &mut App, key: KeyCode) {
    match key {
        KeyCode::Char('q') => app.should_quit = true,
        KeyCode::Esc | KeyCode::Enter => app.cancel(),
        _ => {}
    }
}
