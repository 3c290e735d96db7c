//! UI rendering logic for the TUI

use crate::tui::app::{LogEntry, TuiApp};
use crate::tui::layout::{centered, create_layout, truncate_string};
use livepreview_core::ErrorKind;
use log::Level;
use ratatui::{
    layout::{Alignment, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Paragraph, Wrap},
    Frame,
};

/// Render the entire UI
pub fn render_ui(frame: &mut Frame, app: &mut TuiApp) {
    let area = frame.area();
    let layout = create_layout(area, app.log_maximized);

    render_header(frame, layout.header, app);
    render_preview(frame, layout.main, app);
    render_log(frame, layout.log, app);
    render_footer(frame, layout.footer, app);

    // Modals overlay everything
    if app.show_help_modal {
        render_help_modal(frame, area);
    } else if app.show_error_modal {
        render_error_modal(frame, app, area);
    }
}

/// Session status header
fn render_header(frame: &mut Frame, area: Rect, app: &TuiApp) {
    let (badge, badge_color) = app.diagnostic_badge();

    let mut title = vec![
        Span::styled(
            " LIVEPREVIEW",
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        ),
        Span::raw("  │  "),
        Span::styled(app.source_name.clone(), Style::default().fg(Color::White)),
        Span::raw("  │  "),
        Span::styled(
            badge,
            Style::default().fg(badge_color).add_modifier(Modifier::BOLD),
        ),
    ];
    if let Some(status) = app.current_status() {
        title.push(Span::raw("  │  "));
        title.push(Span::styled(status.to_string(), Style::default().fg(Color::Yellow)));
    }

    let stats = match &app.state {
        Some(s) => Line::from(vec![
            Span::styled(" Session ", Style::default().fg(Color::DarkGray)),
            Span::styled(
                format!("{} ({})", s.generation, s.session),
                Style::default().fg(Color::White),
            ),
            Span::raw("  │  "),
            Span::styled("Builds ", Style::default().fg(Color::DarkGray)),
            Span::styled(s.compilations.to_string(), Style::default().fg(Color::White)),
            Span::styled(
                if s.compile_pending { " (pending)" } else { "" },
                Style::default().fg(Color::Yellow),
            ),
            Span::raw("  │  "),
            Span::styled("Refreshes ", Style::default().fg(Color::DarkGray)),
            Span::styled(s.recreations.to_string(), Style::default().fg(Color::White)),
            Span::raw("  │  "),
            Span::styled("Stale dropped ", Style::default().fg(Color::DarkGray)),
            Span::styled(s.dropped_events.to_string(), Style::default().fg(Color::White)),
        ]),
        None => Line::from(Span::styled(" Starting…", Style::default().fg(Color::DarkGray))),
    };

    let paragraph = Paragraph::new(vec![Line::from(title), stats]).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::DarkGray)),
    );
    frame.render_widget(paragraph, area);
}

/// Rendered frame outline, or the artifact text when toggled on
fn render_preview(frame: &mut Frame, area: Rect, app: &TuiApp) {
    let title = if app.showing_artifact() {
        " Compiled artifact "
    } else {
        " Preview "
    };
    let border_color = match app.error_panel() {
        Some(_) => Color::Red,
        None => Color::Cyan,
    };

    let lines: Vec<Line> = app
        .preview_lines()
        .into_iter()
        .map(|line| Line::from(Span::raw(line)))
        .collect();

    let mut block = Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color));

    // One-line error summary in the border, full text in the modal
    if let Some(error) = app.error_panel() {
        let first_line = error.message.lines().next().unwrap_or_default();
        let width = area.width.saturating_sub(title.len() as u16 + 8) as usize;
        block = block.title_bottom(Line::from(Span::styled(
            format!(" {} ", truncate_string(first_line, width)),
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        )));
    }

    let paragraph = Paragraph::new(lines)
        .block(block)
        .scroll((app.preview_scroll, 0));
    frame.render_widget(paragraph, area);
}

fn render_log(frame: &mut Frame, area: Rect, app: &TuiApp) {
    let level_indicator = match app.min_log_level {
        Level::Error => "ERR",
        Level::Warn => "≥WARN",
        Level::Info => "≥INFO",
        Level::Debug => "≥DBG",
        Level::Trace => "ALL",
    };

    let block = Block::default()
        .title(format!(" Log [{}] ", level_indicator))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray));

    let inner = block.inner(area);
    frame.render_widget(block, area);

    let max_lines = inner.height as usize;
    let filtered: Vec<&LogEntry> = app.filtered_log_entries();
    let start = filtered.len().saturating_sub(max_lines);

    let lines: Vec<Line> = filtered
        .into_iter()
        .skip(start)
        .map(|entry| {
            Line::from(vec![
                Span::styled(
                    format!("[{}] ", entry.timestamp),
                    Style::default().fg(Color::DarkGray),
                ),
                Span::styled(
                    format!("{:<5}", log_level_label(entry.level)),
                    log_level_style(entry.level),
                ),
                Span::raw(" "),
                Span::styled(entry.message.clone(), Style::default().fg(Color::White)),
            ])
        })
        .collect();

    let paragraph = Paragraph::new(lines).wrap(Wrap { trim: false });
    frame.render_widget(paragraph, inner);
}

/// Render footer with keybinds
fn render_footer(frame: &mut Frame, area: Rect, app: &TuiApp) {
    let key = |k: &'static str| Span::styled(k, Style::default().fg(Color::White));
    let label = |l: &'static str| Span::styled(l, Style::default().fg(Color::DarkGray));

    let mut spans = vec![
        key("?"),
        label(" help"),
        Span::raw("  "),
        key("r"),
        label(" refresh"),
        Span::raw("  "),
        key("a"),
        label(if app.showing_artifact() { " preview" } else { " artifact" }),
        Span::raw("  "),
        key("L"),
        label(if app.log_maximized { " mini" } else { " max" }),
        Span::raw("  "),
        key("q"),
        label(" quit"),
    ];

    if app.error_panel().is_some() {
        spans.push(Span::raw("  "));
        spans.push(Span::styled(
            "e error  esc dismiss",
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        ));
    }

    let paragraph = Paragraph::new(Line::from(spans))
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::DarkGray)),
        )
        .alignment(Alignment::Center);

    frame.render_widget(paragraph, area);
}

/// Render error modal
fn render_error_modal(frame: &mut Frame, app: &TuiApp, area: Rect) {
    let Some(error) = app.error_panel() else {
        return;
    };
    let modal_area = centered(
        area,
        area.width.saturating_sub(10).min(100),
        area.height.saturating_sub(10).min(30),
    );

    let title = match error.kind {
        ErrorKind::Compile => " COMPILE ERROR ",
        ErrorKind::Runtime => " RUNTIME ERROR ",
    };
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Red))
        .title(title)
        .title_bottom(Line::from(" e close  esc dismiss ").alignment(Alignment::Center))
        .style(Style::default().bg(Color::Black));

    let text = Paragraph::new(error.message.as_str())
        .block(block)
        .wrap(Wrap { trim: false })
        .style(Style::default().fg(Color::Red));

    frame.render_widget(Clear, modal_area);
    frame.render_widget(text, modal_area);
}

fn log_level_label(level: Level) -> &'static str {
    match level {
        Level::Error => "ERR",
        Level::Warn => "WARN",
        Level::Info => "INFO",
        Level::Debug => "DBG",
        Level::Trace => "TRC",
    }
}

fn log_level_style(level: Level) -> Style {
    match level {
        Level::Error => Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        Level::Warn => Style::default().fg(Color::Yellow),
        Level::Info => Style::default().fg(Color::Cyan),
        Level::Debug => Style::default().fg(Color::Green),
        Level::Trace => Style::default().fg(Color::Magenta),
    }
}

/// Render help modal with all keyboard shortcuts
fn render_help_modal(frame: &mut Frame, area: Rect) {
    let modal_area = centered(area, 56, 16);

    let entry = |keys: &'static str, what: &'static str| {
        Line::from(vec![
            Span::styled(format!("  {:<12}", keys), Style::default().fg(Color::White)),
            Span::styled(what, Style::default().fg(Color::Gray)),
        ])
    };
    let heading = |text: &'static str| {
        Line::from(Span::styled(
            text,
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        ))
    };

    let help_text = vec![
        heading("  Preview"),
        entry("r", "Recreate the sandbox and re-run"),
        entry("a", "Toggle compiled artifact view"),
        entry("j/k", "Scroll preview"),
        Line::from(""),
        heading("  Errors"),
        entry("e", "Show/hide full error"),
        entry("Esc", "Close modal / dismiss error"),
        Line::from(""),
        heading("  Log"),
        entry("1-5", "Set log level (1=Error, 5=Trace)"),
        entry("L", "Toggle log panel maximized"),
        Line::from(""),
        entry("q/Ctrl+c", "Quit"),
    ];

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan))
        .title(" Keyboard Shortcuts ")
        .style(Style::default().bg(Color::Black));

    let text = Paragraph::new(help_text).block(block).wrap(Wrap { trim: false });

    frame.render_widget(Clear, modal_area);
    frame.render_widget(text, modal_area);
}

#[cfg(test)]
mod tests {
    use super::*;
    use livepreview_core::{DiagnosticState, ErrorPanel, Frame as PreviewFrame, PreviewState};
    use ratatui::{backend::TestBackend, Terminal};

    fn screen(app: &mut TuiApp) -> String {
        let mut terminal = Terminal::new(TestBackend::new(80, 30)).unwrap();
        terminal.draw(|f| render_ui(f, app)).unwrap();
        let buffer = terminal.backend().buffer().clone();
        buffer
            .content()
            .chunks(buffer.area.width as usize)
            .map(|row| row.iter().map(|cell| cell.symbol()).collect::<String>())
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[test]
    fn test_renders_outline_and_badge() {
        let mut app = TuiApp::new("app.rhai");
        let mut state = PreviewState::new();
        state.diagnostics.state = DiagnosticState::Ready;
        state.diagnostics.building = false;
        state.diagnostics.frame = PreviewFrame {
            html: "<h1>hi</h1>".to_string(),
            outline: "h1\n  \"hi\"".to_string(),
        };
        app.update_state(state);

        let text = screen(&mut app);
        assert!(text.contains("READY"));
        assert!(text.contains("app.rhai"));
        assert!(text.contains("\"hi\""));
    }

    #[test]
    fn test_renders_error_modal() {
        let mut app = TuiApp::new("app.rhai");
        let mut state = PreviewState::new();
        state.diagnostics.state = DiagnosticState::CompileError("Unterminated element <div>".to_string());
        state.diagnostics.error = Some(ErrorPanel {
            kind: ErrorKind::Compile,
            message: "Unterminated element <div>".to_string(),
        });
        app.update_state(state);
        app.toggle_error_modal();

        let text = screen(&mut app);
        assert!(text.contains("COMPILE ERROR"));
        assert!(text.contains("Unterminated element <div>"));
    }
}
