//! Layout management for adaptive terminal sizing

use ratatui::layout::{Constraint, Direction, Layout, Rect};

/// Layout slots - header, preview, log, footer
pub struct LayoutSlots {
    pub header: Rect,
    pub main: Rect,
    pub log: Rect,
    pub footer: Rect,
}

/// Create the main layout. The log pane grows with the terminal, or takes
/// the preview's place when maximized.
pub fn create_layout(area: Rect, log_maximized: bool) -> LayoutSlots {
    let log_height = match area.height {
        0..=29 => 5,
        30..=49 => 8,
        _ => 12,
    };

    let (main, log) = if log_maximized {
        (Constraint::Length(log_height), Constraint::Min(5))
    } else {
        (Constraint::Min(5), Constraint::Length(log_height))
    };

    let sections = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(4), // Header with session status
            main,
            log,
            Constraint::Length(3), // Footer (needs 3 for borders + content)
        ])
        .split(area);

    LayoutSlots {
        header: sections[0],
        main: sections[1],
        log: sections[2],
        footer: sections[3],
    }
}

/// Center a box of at most `width` x `height` within `area`
pub fn centered(area: Rect, width: u16, height: u16) -> Rect {
    let width = width.min(area.width);
    let height = height.min(area.height);
    Rect {
        x: area.x + (area.width - width) / 2,
        y: area.y + (area.height - height) / 2,
        width,
        height,
    }
}

/// Truncate a string to fit within a given width
pub fn truncate_string(s: &str, max_width: usize) -> String {
    if s.chars().count() <= max_width {
        s.to_string()
    } else if max_width <= 3 {
        s.chars().take(max_width).collect()
    } else {
        let mut result: String = s.chars().take(max_width - 3).collect();
        result.push_str("...");
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_string() {
        assert_eq!(truncate_string("short", 10), "short");
        assert_eq!(truncate_string("a longer line", 8), "a lon...");
        assert_eq!(truncate_string("abcdef", 2), "ab");
    }

    #[test]
    fn test_centered_fits_inside() {
        let area = Rect::new(0, 0, 80, 24);
        let modal = centered(area, 100, 10);
        assert_eq!(modal, Rect::new(0, 7, 80, 10));
    }

    #[test]
    fn test_log_maximized_swaps_sizes() {
        let area = Rect::new(0, 0, 80, 40);
        let normal = create_layout(area, false);
        let maxed = create_layout(area, true);
        assert_eq!(normal.log.height, 8);
        assert_eq!(maxed.main.height, 8);
        assert!(maxed.log.height > normal.log.height);
    }
}
