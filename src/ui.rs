use crate::controller::ConsoleView;
use crate::session::{ConnectionState, Field, SessionDraft};
use crate::telemetry::TelemetryWindow;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::symbols;
use ratatui::text::{Line, Span};
use ratatui::widgets::{Axis, Block, Borders, Chart, Dataset, GraphType, Paragraph};
use ratatui::Frame;

const SEND_COLOR: Color = Color::Rgb(53, 162, 235);
const RECV_COLOR: Color = Color::Rgb(255, 99, 132);

/// Everything one frame needs.
pub struct Screen<'a> {
    pub view: &'a ConsoleView,
    pub draft: &'a SessionDraft,
    pub telemetry: &'a TelemetryWindow,
    pub focus: Field,
    pub activity: &'a [String],
    pub status_line: &'a str,
}

pub fn render(f: &mut Frame, screen: &Screen) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(8),
            Constraint::Length(3),
            Constraint::Min(8),
            Constraint::Length(6),
            Constraint::Length(3),
        ])
        .split(f.size());

    let top = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Min(30), Constraint::Length(28)])
        .split(chunks[0]);

    f.render_widget(form(screen.draft, screen.focus), top[0]);
    f.render_widget(session_panel(screen.view), top[1]);
    f.render_widget(toast(screen.view), chunks[1]);
    render_chart(f, screen.telemetry, chunks[2]);

    let activity: Vec<Line> = screen
        .activity
        .iter()
        .rev()
        .take(chunks[3].height.saturating_sub(2) as usize)
        .rev()
        .map(|m| Line::from(m.as_str()))
        .collect();
    f.render_widget(
        Paragraph::new(activity).block(Block::default().borders(Borders::ALL).title("Activity")),
        chunks[3],
    );

    f.render_widget(
        Paragraph::new(screen.status_line)
            .block(Block::default().borders(Borders::ALL).title("Status")),
        chunks[4],
    );
}

fn form<'a>(draft: &'a SessionDraft, focus: Field) -> Paragraph<'a> {
    let lines: Vec<Line> = Field::ALL
        .iter()
        .map(|&field| {
            let value = draft.value(field);
            let label_style = if field == focus {
                Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
            } else {
                Style::default()
            };
            let marker = if field == focus { "> " } else { "  " };
            let value_span = if value.is_empty() {
                Span::styled(field.placeholder(), Style::default().fg(Color::DarkGray))
            } else if field.is_secret() {
                Span::raw("*".repeat(value.chars().count()))
            } else {
                Span::raw(value)
            };
            Line::from(vec![
                Span::styled(format!("{}{:<12}", marker, field.label()), label_style),
                value_span,
            ])
        })
        .collect();

    Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title("Session"))
}

fn session_panel(view: &ConsoleView) -> Paragraph<'static> {
    let button_style = if !view.submit_enabled {
        Style::default().fg(Color::DarkGray)
    } else if view.danger {
        Style::default().fg(Color::Red).add_modifier(Modifier::BOLD)
    } else {
        Style::default().fg(Color::Green).add_modifier(Modifier::BOLD)
    };
    let state_style = match view.state {
        ConnectionState::Connected => Style::default().fg(Color::Green),
        ConnectionState::Connecting => Style::default().fg(Color::Yellow),
        ConnectionState::Disconnected => Style::default().fg(Color::Gray),
    };

    let lines = vec![
        Line::from(Span::styled(format!("[ {} ]", view.button_label), button_style)),
        Line::from(""),
        Line::from(Span::styled(view.state.to_string(), state_style)),
        Line::from(format!("Connect Count: {}", view.connection_count_text())),
    ];
    Paragraph::new(lines)
        .alignment(Alignment::Center)
        .block(Block::default().borders(Borders::ALL).title("Forward"))
}

fn toast(view: &ConsoleView) -> Paragraph<'static> {
    match &view.error {
        Some(message) => Paragraph::new(Span::styled(
            message.clone(),
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        ))
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Red)),
        ),
        None => Paragraph::new("").block(Block::default().borders(Borders::ALL)),
    }
}

fn render_chart(f: &mut Frame, telemetry: &TelemetryWindow, area: Rect) {
    let (send, recv) = telemetry.points();
    let y_max = (telemetry.peak() as f64 * 1.1).max(1.0);
    let x_max = telemetry.capacity().saturating_sub(1).max(1) as f64;

    let title = match telemetry.latest() {
        Some(latest) => format!(
            "Transfer  Send {}  Recv {}",
            format_bytes(latest.send_bytes as f64),
            format_bytes(latest.recv_bytes as f64)
        ),
        None => "Transfer".to_string(),
    };

    let datasets = vec![
        Dataset::default()
            .name("Send")
            .marker(symbols::Marker::Braille)
            .graph_type(GraphType::Line)
            .style(Style::default().fg(SEND_COLOR))
            .data(&send),
        Dataset::default()
            .name("Recv")
            .marker(symbols::Marker::Braille)
            .graph_type(GraphType::Line)
            .style(Style::default().fg(RECV_COLOR))
            .data(&recv),
    ];

    let chart = Chart::new(datasets)
        .block(Block::default().borders(Borders::ALL).title(title))
        .x_axis(Axis::default().bounds([0.0, x_max]))
        .y_axis(
            Axis::default()
                .title("Bytes")
                .bounds([0.0, y_max])
                .labels(vec![
                    Span::raw("0"),
                    Span::raw(format_bytes(y_max / 2.0)),
                    Span::raw(format_bytes(y_max)),
                ]),
        );
    f.render_widget(chart, area);
}

pub fn format_bytes(bytes: f64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{:.0} {}", value, UNITS[unit])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::TelemetrySample;
    use ratatui::backend::TestBackend;
    use ratatui::Terminal;

    fn view(state: ConnectionState) -> ConsoleView {
        ConsoleView {
            state,
            button_label: match state {
                ConnectionState::Disconnected => "Connect",
                ConnectionState::Connecting => "Connecting",
                ConnectionState::Connected => "Stop",
            },
            submit_enabled: state != ConnectionState::Connecting,
            danger: state == ConnectionState::Connected,
            connection_count: (state == ConnectionState::Connected).then_some(4),
            error: None,
            session: None,
            window: 50,
            send: vec![10, 2000, 30],
            recv: vec![5, 6, 70_000],
        }
    }

    fn draw(view: &ConsoleView, draft: &SessionDraft) -> String {
        draw_with(view, draft, &TelemetryWindow::default())
    }

    fn draw_with(view: &ConsoleView, draft: &SessionDraft, telemetry: &TelemetryWindow) -> String {
        let mut terminal = Terminal::new(TestBackend::new(100, 40)).unwrap();
        let activity = vec!["[12:00:00.000] Forward started".to_string()];
        terminal
            .draw(|f| {
                render(
                    f,
                    &Screen {
                        view,
                        draft,
                        telemetry,
                        focus: Field::RemoteAddress,
                        activity: &activity,
                        status_line: "Enter: connect/stop",
                    },
                )
            })
            .unwrap();
        terminal
            .backend()
            .buffer()
            .content
            .iter()
            .map(|cell| cell.symbol())
            .collect()
    }

    #[test]
    fn renders_form_button_and_count() {
        let mut draft = SessionDraft::default();
        draft.password = "secret".to_string();
        let screen = draw(&view(ConnectionState::Connected), &draft);

        assert!(screen.contains("Local IP"));
        assert!(screen.contains("127.0.0.1"));
        assert!(screen.contains("******"));
        assert!(!screen.contains("secret"));
        assert!(screen.contains("[ Stop ]"));
        assert!(screen.contains("Connect Count: 4"));
        assert!(screen.contains("Forward started"));
    }

    #[test]
    fn unknown_count_and_error_toast() {
        let mut v = view(ConnectionState::Disconnected);
        v.error = Some("TCP Bind Error".to_string());
        let screen = draw(&v, &SessionDraft::default());
        assert!(screen.contains("[ Connect ]"));
        assert!(screen.contains("Connect Count: ---"));
        assert!(screen.contains("TCP Bind Error"));
    }

    #[test]
    fn chart_title_and_axis_follow_the_window() {
        let mut telemetry = TelemetryWindow::new(10);
        telemetry.push(TelemetrySample { send_bytes: 512, recv_bytes: 2048 });
        telemetry.push(TelemetrySample { send_bytes: 1536, recv_bytes: 10 });
        let screen = draw_with(
            &view(ConnectionState::Connected),
            &SessionDraft::default(),
            &telemetry,
        );
        assert!(screen.contains("Send 1.5 KiB"));
        assert!(screen.contains("Recv 10 B"));
        // Axis top is 10% above the 2048 peak.
        assert!(screen.contains("2.2 KiB"));
        assert!(screen.contains("Bytes"));
    }

    #[test]
    fn byte_labels_scale_units() {
        assert_eq!(format_bytes(0.0), "0 B");
        assert_eq!(format_bytes(1023.0), "1023 B");
        assert_eq!(format_bytes(1536.0), "1.5 KiB");
        assert_eq!(format_bytes(3.0 * 1024.0 * 1024.0), "3.0 MiB");
    }
}
