use ratatui::{
    Frame,
    layout::{Alignment, Constraint, Layout, Margin, Rect},
    style::{Color, Modifier, Style, Stylize},
    symbols::border,
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Padding, Paragraph, Row, Table},
};

use crate::app::App;
use crate::core::AppState;

// Design tokens for consistent styling
pub(crate) const COLOR_PRIMARY: Color = Color::Rgb(99, 179, 237); // Soft blue
pub(crate) const COLOR_SUCCESS: Color = Color::Rgb(104, 211, 145); // Soft green
pub(crate) const COLOR_WARNING: Color = Color::Rgb(246, 173, 85); // Soft orange
pub(crate) const COLOR_DANGER: Color = Color::Rgb(252, 129, 129); // Soft red
pub(crate) const COLOR_MUTED: Color = Color::Rgb(113, 128, 150); // Gray
pub(crate) const COLOR_BORDER: Color = Color::Rgb(74, 85, 104); // Dark gray

/// Draw the options page: device list, format options and key help
pub fn draw_dashboard(frame: &mut Frame, app: &App) {
    let area = frame.area();
    let inner_area = area.inner(Margin::new(2, 1));

    let chunks = Layout::vertical([
        Constraint::Length(5), // Header
        Constraint::Min(6),    // Device table
        Constraint::Length(8), // Options
        Constraint::Length(3), // Help bar
    ])
    .split(inner_area);

    draw_header(frame, chunks[0], app);
    draw_device_table(frame, chunks[1], app);
    draw_options(frame, chunks[2], app);
    draw_help_bar(frame, chunks[3], app);
}

fn draw_header(frame: &mut Frame, area: Rect, app: &App) {
    let (badge_text, badge_color) = if app.enumerator.has_privileges() {
        (" ● ROOT ", COLOR_SUCCESS)
    } else {
        (" ○ USER ", COLOR_WARNING)
    };

    let title_line = Line::from(vec![
        Span::styled(
            "USB Format",
            Style::default()
                .fg(COLOR_PRIMARY)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw("  "),
        Span::styled(
            badge_text,
            Style::default()
                .fg(Color::Black)
                .bg(badge_color)
                .add_modifier(Modifier::BOLD),
        ),
    ]);

    let kind = if app.show_partitions { "partitions" } else { "devices" };
    let subtitle = Line::from(vec![Span::styled(
        format!("{} {} available", app.entries.len(), kind),
        Style::default().fg(COLOR_MUTED),
    )]);

    let header = Paragraph::new(vec![Line::default(), title_line, Line::default(), subtitle])
        .alignment(Alignment::Center)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_set(border::ROUNDED)
                .border_style(Style::default().fg(COLOR_BORDER))
                .padding(Padding::horizontal(2)),
        );

    frame.render_widget(header, area);
}

fn draw_device_table(frame: &mut Frame, area: Rect, app: &App) {
    let header_cells = ["NAME", "SIZE", "MODEL", "VENDOR", "BUS"].iter().map(|h| {
        Cell::from(format!(" {} ", h)).style(
            Style::default()
                .fg(COLOR_MUTED)
                .add_modifier(Modifier::BOLD),
        )
    });
    let header = Row::new(header_cells).height(1).bottom_margin(1);

    let rows: Vec<Row> = app
        .entries
        .iter()
        .enumerate()
        .map(|(i, entry)| {
            let device = &entry.device;
            let base_color = if entry.classification.is_removable_or_usb {
                COLOR_SUCCESS
            } else {
                COLOR_WARNING
            };

            let style = if i == app.selected_index {
                Style::default()
                    .fg(Color::Black)
                    .bg(base_color)
                    .add_modifier(Modifier::BOLD)
            } else {
                Style::default().fg(base_color)
            };

            let bus = if entry.classification.is_removable_or_usb {
                "● Removable"
            } else {
                "○ Fixed"
            };
            let model = if device.model.is_empty() {
                &device.label
            } else {
                &device.model
            };

            Row::new(vec![
                Cell::from(format!(" {} ", device.name)),
                Cell::from(format!(" {} ", device.size)),
                Cell::from(format!(" {} ", model)),
                Cell::from(format!(" {} ", device.vendor)),
                Cell::from(format!(" {} ", bus)),
            ])
            .style(style)
        })
        .collect();

    let widths = [
        Constraint::Length(14),
        Constraint::Length(10),
        Constraint::Percentage(35),
        Constraint::Percentage(20),
        Constraint::Length(14),
    ];

    let table = Table::new(rows, widths)
        .header(header)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_set(border::ROUNDED)
                .border_style(Style::default().fg(COLOR_BORDER))
                .title(" Select USB device ")
                .title_style(Style::default().fg(Color::White).bold())
                .padding(Padding::horizontal(1)),
        )
        .column_spacing(1);

    frame.render_widget(table, area);

    if app.entries.is_empty() {
        let empty = Paragraph::new("No removable devices found. Plug one in and press 'r'.")
            .alignment(Alignment::Center)
            .style(Style::default().fg(COLOR_MUTED));
        frame.render_widget(empty, area.inner(Margin::new(2, 3)));
    }
}

fn option_line<'a>(key: &'a str, name: &'a str, value: String, enabled: bool) -> Line<'a> {
    let value_style = if enabled {
        Style::default().fg(Color::White).add_modifier(Modifier::BOLD)
    } else {
        Style::default().fg(COLOR_MUTED)
    };
    Line::from(vec![
        Span::styled(format!(" {key} "), Style::default().fg(Color::White).bg(COLOR_BORDER)),
        Span::styled(format!(" {name:<16}"), Style::default().fg(COLOR_MUTED)),
        Span::styled(value, value_style),
    ])
}

fn checkbox(checked: bool) -> String {
    if checked { "[x]".to_string() } else { "[ ]".to_string() }
}

fn draw_options(frame: &mut Frame, area: Rect, app: &App) {
    let editing = app.state == AppState::EditingLabel;
    let label = if editing {
        format!("{}▏", app.label)
    } else if app.label.is_empty() {
        "(none)".to_string()
    } else {
        app.label.clone()
    };

    let format = app
        .selected_fs()
        .map(|fs| format!("{} ({})", fs.display_name(), fs.token()))
        .unwrap_or_default();
    let scheme = if app.partitioning_enabled() {
        app.selected_scheme()
            .map(|s| s.display_name().to_string())
            .unwrap_or_default()
    } else {
        "none (format partition in place)".to_string()
    };

    let mut lines = vec![
        option_line("f", "Format", format, true),
        option_line("l", "Label", label, true),
        option_line("t", "Partition table", scheme, app.partitioning_enabled()),
        option_line("a", "Show all drives", checkbox(app.show_all), true),
        option_line("p", "Show partitions", checkbox(app.show_partitions), true),
    ];
    if let Some(error) = &app.label_error {
        lines.push(Line::from(Span::styled(
            format!(" {error}"),
            Style::default().fg(COLOR_DANGER),
        )));
    }

    let options = Paragraph::new(lines).block(
        Block::default()
            .borders(Borders::ALL)
            .border_set(border::ROUNDED)
            .border_style(Style::default().fg(if editing {
                COLOR_PRIMARY
            } else {
                COLOR_BORDER
            }))
            .title(" Options ")
            .title_style(Style::default().fg(Color::White).bold()),
    );

    frame.render_widget(options, area);
}

fn draw_help_bar(frame: &mut Frame, area: Rect, app: &App) {
    let bindings = match &app.state {
        AppState::EditingLabel => vec![("Type", "Edit label"), ("Enter/Esc", "Done")],
        _ if app.supervisor.is_active() => vec![("Enter", "Show progress"), ("q", "Quit")],
        _ => {
            let mut bindings = vec![("↑↓", "Navigate"), ("r", "Refresh"), ("q", "Quit")];
            if app.next_enabled() {
                bindings.insert(1, ("Enter", "Next"));
            }
            bindings
        }
    };

    let mut spans = Vec::new();
    for (i, (key, action)) in bindings.iter().enumerate() {
        if i > 0 {
            spans.push(Span::styled("  │  ", Style::default().fg(COLOR_BORDER)));
        }
        spans.push(Span::styled(
            format!(" {} ", key),
            Style::default()
                .fg(Color::White)
                .bg(COLOR_BORDER)
                .add_modifier(Modifier::BOLD),
        ));
        spans.push(Span::styled(
            format!(" {}", action),
            Style::default().fg(COLOR_MUTED),
        ));
    }

    let help = Paragraph::new(Line::from(spans))
        .alignment(Alignment::Center)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_set(border::ROUNDED)
                .border_style(Style::default().fg(COLOR_BORDER)),
        );

    frame.render_widget(help, area);
}
