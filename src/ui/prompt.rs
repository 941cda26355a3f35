use ratatui::{
    Frame,
    layout::{Alignment, Constraint, Flex, Layout, Margin, Rect},
    style::{Color, Modifier, Style},
    symbols::border,
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Paragraph, Wrap},
};

use super::dashboard::{COLOR_BORDER, COLOR_MUTED, COLOR_PRIMARY};
use crate::app::App;
use crate::core::job::{JobOutcome, JobState};

pub enum MessageType {
    Success,
    Error,
}

/// Draw confirmation dialog for the destructive format
pub fn draw_confirm_dialog(frame: &mut Frame, app: &App, device: &str) {
    let area = centered_rect(60, 50, frame.area());

    frame.render_widget(Clear, area);

    let block = Block::default()
        .title(" ⚠️  CONFIRM USB FORMAT ")
        .borders(Borders::ALL)
        .style(Style::default().fg(Color::Red));

    let inner = block.inner(area);
    frame.render_widget(block, area);

    let chunks = Layout::vertical([
        Constraint::Length(2),
        Constraint::Length(4),
        Constraint::Length(2),
        Constraint::Length(3),
        Constraint::Min(1),
    ])
    .split(inner);

    let warning = Paragraph::new(Line::from(vec![
        Span::styled(
            "WARNING: ",
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        ),
        Span::raw("This action will PERMANENTLY DESTROY all data on:"),
    ]));
    frame.render_widget(warning, chunks[0]);

    let entry = app
        .selected_entry()
        .map(|entry| entry.text.clone())
        .unwrap_or_else(|| device.to_string());
    let format = app
        .selected_fs()
        .map(|fs| fs.display_name())
        .unwrap_or_default();
    let details = Paragraph::new(vec![
        Line::from(Span::styled(
            entry,
            Style::default().fg(Color::White).add_modifier(Modifier::BOLD),
        )),
        Line::from(format!("Format: {format}")),
        Line::from(format!("Label: {}", app.label)),
    ])
    .style(Style::default().fg(Color::White));
    frame.render_widget(details, chunks[1]);

    let instruction = Paragraph::new(format!("Type '{}' to confirm:", device))
        .style(Style::default().fg(Color::Yellow));
    frame.render_widget(instruction, chunks[2]);

    let input_display = Paragraph::new(app.input_buffer.as_str()).block(
        Block::default()
            .borders(Borders::ALL)
            .title(" Input ")
            .style(Style::default().fg(Color::White)),
    );
    frame.render_widget(input_display, chunks[3]);
}

/// Draw the live output of the format job
pub fn draw_output_page(frame: &mut Frame, app: &App) {
    let area = frame.area().inner(Margin::new(2, 1));

    let chunks = Layout::vertical([Constraint::Min(3), Constraint::Length(1)]).split(area);

    let title = match app.supervisor.request() {
        Some(request) => format!(" Formatting {} as {} ", request.device, request.format),
        None => " Output ".to_string(),
    };

    // Keep the tail of the log in view
    let visible = chunks[0].height.saturating_sub(2) as usize;
    let skip = app.output_lines.len().saturating_sub(visible);
    let lines: Vec<Line> = app
        .output_lines
        .iter()
        .skip(skip)
        .map(|line| Line::from(line.as_str()))
        .collect();

    let output = Paragraph::new(lines).block(
        Block::default()
            .borders(Borders::ALL)
            .border_set(border::ROUNDED)
            .border_style(Style::default().fg(COLOR_BORDER))
            .title(title)
            .title_style(Style::default().fg(COLOR_PRIMARY)),
    );
    frame.render_widget(output, chunks[0]);

    let spinner_frames = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];
    let spinner = spinner_frames[app.tick as usize % spinner_frames.len()];
    let footer = match (app.supervisor.state(), app.supervisor.last_outcome()) {
        (JobState::Starting, _) => format!("{spinner} Starting..."),
        (JobState::Running, _) if app.supervisor.affordances().back_enabled => {
            format!("{spinner} Working...   Esc: stop and go back")
        }
        (JobState::Running, _) => format!("{spinner} Working..."),
        (_, Some(JobOutcome::Succeeded)) => "Done.   Esc: back".to_string(),
        (_, Some(JobOutcome::Failed(failure))) => format!("{failure}.   Esc: back"),
        _ => "Esc: back".to_string(),
    };
    frame.render_widget(
        Paragraph::new(footer)
            .alignment(Alignment::Center)
            .style(Style::default().fg(COLOR_MUTED)),
        chunks[1],
    );
}

/// Draw status/info messages
pub fn draw_status_message(frame: &mut Frame, message: &str, msg_type: MessageType) {
    let area = centered_rect(60, 40, frame.area());

    frame.render_widget(Clear, area);

    let (title, color) = match msg_type {
        MessageType::Success => (" Success ", Color::Green),
        MessageType::Error => (" Error ", Color::Red),
    };

    let block = Block::default()
        .title(title)
        .borders(Borders::ALL)
        .style(Style::default().fg(color));

    let inner = block.inner(area);
    frame.render_widget(block, area);

    let chunks = Layout::vertical([Constraint::Min(1), Constraint::Length(1)]).split(inner);

    let text = Paragraph::new(message)
        .alignment(Alignment::Center)
        .wrap(Wrap { trim: true })
        .style(Style::default().fg(color));
    frame.render_widget(text, chunks[0]);

    let footer = Paragraph::new("Press Esc/Enter to dismiss")
        .alignment(Alignment::Center)
        .style(Style::default().fg(Color::DarkGray));
    frame.render_widget(footer, chunks[1]);
}

/// Helper to create a centered rectangle
fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let [area] = Layout::horizontal([Constraint::Percentage(percent_x)])
        .flex(Flex::Center)
        .areas(r);
    let [area] = Layout::vertical([Constraint::Percentage(percent_y)])
        .flex(Flex::Center)
        .areas(area);
    area
}
