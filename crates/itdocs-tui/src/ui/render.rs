use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::Style,
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Paragraph},
    Frame,
};

use itdocs_core::auth::TotpCode;
use itdocs_core::utils::{age_display, format_optional, truncate};

use crate::app::{App, AppState, LoginFocus, Screen};

use super::styles;

/// Longest profile value shown on the dashboard before it is cut
const MAX_FIELD_WIDTH: usize = 48;

const LOGO: [&str; 3] = [
    "         ╦╔╦╗  ╔╦╗╔═╗╔═╗╔═╗",
    "         ║ ║    ║║║ ║║  ╚═╗",
    "         ╩ ╩   ═╩╝╚═╝╚═╝╚═╝",
];

pub fn render(frame: &mut Frame, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Title bar
            Constraint::Min(10),   // Main content
            Constraint::Length(2), // Status bar
        ])
        .split(frame.area());

    render_title_bar(frame, app, chunks[0]);
    match app.screen {
        Screen::Login => render_login(frame, app),
        Screen::MfaChallenge => render_mfa(frame, app),
        Screen::Dashboard => render_dashboard(frame, app, chunks[1]),
    }
    render_status_bar(frame, app, chunks[2]);

    // Render overlays
    if matches!(app.state, AppState::ShowingHelp) {
        render_help_overlay(frame);
    }

    if matches!(app.state, AppState::ConfirmingQuit) {
        render_quit_overlay(frame);
    }
}

fn logo_lines() -> Vec<Line<'static>> {
    LOGO.iter()
        .map(|line| Line::from(Span::styled(*line, styles::title_style())))
        .collect()
}

fn render_title_bar(frame: &mut Frame, app: &App, area: Rect) {
    let title = "  itdocs";
    let right = match app.username() {
        Some(user) if app.screen == Screen::Dashboard => format!("{}  [?] Help", user),
        _ => "[?] Help".to_string(),
    };

    let title_line = Line::from(vec![
        Span::styled(title, styles::title_style()),
        Span::raw(" ".repeat(
            (area.width as usize).saturating_sub(title.len() + right.chars().count() + 4),
        )),
        Span::styled(right, styles::muted_style()),
    ]);

    let block = Block::default()
        .borders(Borders::BOTTOM)
        .border_style(styles::muted_style());

    let paragraph = Paragraph::new(title_line).block(block);
    frame.render_widget(paragraph, area);
}

fn render_status_bar(frame: &mut Frame, app: &App, area: Rect) {
    let shortcuts = match app.screen {
        Screen::Login => "[Tab] next field | [Enter] login | [Esc] quit",
        Screen::MfaChallenge => "[Enter] verify | [Esc] back",
        Screen::Dashboard => "[r]eload | [l]ogout | [q]uit",
    };

    let left_text = match app.status_message {
        Some(ref msg) => format!(" {} ", msg),
        None => String::new(),
    };
    let right_text = format!(" {} ", shortcuts);

    let width = area.width as usize;
    let padding_len = width
        .saturating_sub(left_text.chars().count())
        .saturating_sub(right_text.len());
    let status_line = Line::from(vec![
        Span::styled(left_text, styles::muted_style()),
        Span::raw(" ".repeat(padding_len)),
        Span::styled(right_text, styles::muted_style()),
    ]);
    let paragraph = Paragraph::new(status_line).style(styles::status_bar_style());
    frame.render_widget(paragraph, area);
}

fn field_style(focused: bool) -> Style {
    if focused {
        styles::selected_style()
    } else {
        styles::list_item_style()
    }
}

fn render_login(frame: &mut Frame, app: &App) {
    // Fixed size dialog - compact
    let mut height = 12;
    if app.login_error.is_some() {
        height += 2;
    }
    if app.login_notice.is_some() {
        height += 2;
    }
    let area = centered_rect_fixed(46, height, frame.area());

    frame.render_widget(Clear, area);

    let mut lines = logo_lines();
    lines.push(Line::from(""));

    if let Some(ref notice) = app.login_notice {
        lines.push(Line::from(Span::styled(
            format!(" {}", notice),
            styles::highlight_style(),
        )));
        lines.push(Line::from(""));
    }

    // Username field
    let username_focused = app.login_focus == LoginFocus::Username;
    let username_display = format!("{:<16}", tail(&app.login_username, 16));
    let cursor = if username_focused { "▌" } else { "" };
    lines.push(Line::from(vec![
        Span::raw("      "),
        Span::styled("Username: [", styles::muted_style()),
        Span::styled(
            format!("{}{}", username_display, cursor),
            field_style(username_focused),
        ),
        Span::styled("]", styles::muted_style()),
    ]));

    // Password field
    let password_focused = app.login_focus == LoginFocus::Password;
    let password_masked: String = "*".repeat(app.login_password.chars().count().min(16));
    let password_display = format!("{:<16}", password_masked);
    let cursor = if password_focused { "▌" } else { "" };
    lines.push(Line::from(vec![
        Span::raw("      "),
        Span::styled("Password: [", styles::muted_style()),
        Span::styled(
            format!("{}{}", password_display, cursor),
            field_style(password_focused),
        ),
        Span::styled("]", styles::muted_style()),
    ]));

    // Login button
    let button_focused = app.login_focus == LoginFocus::Button;
    let label = if button_focused {
        " ▶ Login ◀ "
    } else {
        "   Login   "
    };
    lines.push(Line::from(""));
    lines.push(Line::from(vec![
        Span::raw("            ["),
        Span::styled(label, field_style(button_focused)),
        Span::raw("]"),
    ]));

    if let Some(ref error) = app.login_error {
        lines.push(Line::from(""));
        lines.push(Line::from(Span::styled(
            format!(" {}", error),
            styles::error_style(),
        )));
    }

    render_dialog(frame, area, lines);
}

fn render_mfa(frame: &mut Frame, app: &App) {
    let height = if app.mfa_error.is_some() { 13 } else { 11 };
    let area = centered_rect_fixed(46, height, frame.area());

    frame.render_widget(Clear, area);

    let mut lines = logo_lines();
    lines.push(Line::from(""));
    lines.push(Line::from(Span::styled(
        format!(
            " Enter the {}-digit code from your",
            TotpCode::LENGTH
        ),
        styles::list_item_style(),
    )));
    lines.push(Line::from(Span::styled(
        " authenticator app.",
        styles::list_item_style(),
    )));
    lines.push(Line::from(""));

    // Unfilled digits show as underscores
    let entered: String = app
        .mfa_code
        .chars()
        .chain(std::iter::repeat('_'))
        .take(TotpCode::LENGTH)
        .flat_map(|c| [c, ' '])
        .collect();
    lines.push(Line::from(vec![
        Span::raw("          "),
        Span::styled("Code: [ ", styles::muted_style()),
        Span::styled(entered, styles::selected_style()),
        Span::styled("]", styles::muted_style()),
    ]));

    if let Some(ref error) = app.mfa_error {
        lines.push(Line::from(""));
        lines.push(Line::from(Span::styled(
            format!(" {}", error),
            styles::error_style(),
        )));
    }

    render_dialog(frame, area, lines);
}

fn render_dashboard(frame: &mut Frame, app: &App, area: Rect) {
    let label = |text: &'static str| Span::styled(format!("  {:<16}", text), styles::muted_style());

    let mut lines = vec![Line::from("")];
    match app.profile {
        Some(ref profile) => {
            lines.push(Line::from(Span::styled(
                format!("  {}", truncate(profile.display_name(), MAX_FIELD_WIDTH)),
                styles::title_style(),
            )));
            lines.push(Line::from(""));
            lines.push(Line::from(vec![
                label("Username"),
                Span::styled(
                    truncate(&profile.username, MAX_FIELD_WIDTH),
                    styles::list_item_style(),
                ),
            ]));
            lines.push(Line::from(vec![
                label("Email"),
                Span::styled(
                    truncate(
                        &format_optional(profile.email.as_deref(), "-"),
                        MAX_FIELD_WIDTH,
                    ),
                    styles::list_item_style(),
                ),
            ]));
            lines.push(Line::from(vec![
                label("Account"),
                if profile.is_active {
                    Span::styled("active", styles::success_style())
                } else {
                    Span::styled("inactive", styles::error_style())
                },
            ]));
            lines.push(Line::from(vec![
                label("Two-factor"),
                if profile.totp_enabled {
                    Span::styled("enabled", styles::success_style())
                } else {
                    Span::styled("disabled", styles::muted_style())
                },
            ]));
        }
        None if app.profile_loading => {
            lines.push(Line::from(Span::styled(
                "  Loading profile...",
                styles::muted_style(),
            )));
        }
        None => {
            lines.push(Line::from(Span::styled(
                "  Profile not loaded. Press r to retry.",
                styles::muted_style(),
            )));
        }
    }

    lines.push(Line::from(""));
    lines.push(Line::from(Span::styled(" Session", styles::highlight_style())));
    lines.push(Line::from(vec![
        label("Signed in"),
        Span::styled(
            app.token_issued_at()
                .map(age_display)
                .unwrap_or_else(|| "restored from previous run".to_string()),
            styles::list_item_style(),
        ),
    ]));
    lines.push(Line::from(vec![
        label("Last refresh"),
        Span::styled(
            app.last_refresh
                .map(age_display)
                .unwrap_or_else(|| "not yet".to_string()),
            styles::list_item_style(),
        ),
    ]));

    let block = Block::default()
        .title(" Dashboard ")
        .borders(Borders::ALL)
        .border_style(styles::border_style(true));

    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn render_help_overlay(frame: &mut Frame) {
    let area = centered_rect_fixed(46, 16, frame.area());

    frame.render_widget(Clear, area);

    let version = env!("CARGO_PKG_VERSION");
    let key = |k: &'static str, desc: &'static str| {
        Line::from(vec![
            Span::styled(format!("  {:<10}", k), styles::help_key_style()),
            Span::styled(desc, styles::help_desc_style()),
        ])
    };

    let mut help_text = logo_lines();
    help_text.push(Line::from(Span::styled(
        format!("              version {}", version),
        styles::muted_style(),
    )));
    help_text.push(Line::from(""));
    help_text.push(Line::from(Span::styled(" Dashboard", styles::highlight_style())));
    help_text.push(key("r", "Reload profile"));
    help_text.push(key("l", "Log out"));
    help_text.push(key("q", "Quit"));
    help_text.push(key("Ctrl+C", "Quit immediately"));
    help_text.push(Line::from(""));
    help_text.push(Line::from(vec![
        Span::styled("       Press ", styles::muted_style()),
        Span::styled("?", styles::help_key_style()),
        Span::styled(" or ", styles::muted_style()),
        Span::styled("Esc", styles::help_key_style()),
        Span::styled(" to close", styles::muted_style()),
    ]));

    render_dialog(frame, area, help_text);
}

fn render_quit_overlay(frame: &mut Frame) {
    let area = centered_rect_fixed(46, 10, frame.area());

    frame.render_widget(Clear, area);

    let mut lines = logo_lines();
    lines.push(Line::from(""));
    lines.push(Line::from(Span::styled(
        "   Are you sure you want to quit?",
        styles::highlight_style(),
    )));
    lines.push(Line::from(""));
    lines.push(Line::from(vec![
        Span::styled("   Press ", styles::muted_style()),
        Span::styled("[Y]", styles::help_key_style()),
        Span::styled(" to quit, ", styles::muted_style()),
        Span::styled("[N]", styles::help_key_style()),
        Span::styled(" to cancel", styles::muted_style()),
    ]));

    render_dialog(frame, area, lines);
}

fn render_dialog(frame: &mut Frame, area: Rect, lines: Vec<Line<'_>>) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(styles::border_style(true))
        .style(Style::default());

    frame.render_widget(Paragraph::new(lines).block(block), area);
}

/// Last `width` characters of `s`, so the cursor end of a long entry stays visible
fn tail(s: &str, width: usize) -> String {
    let count = s.chars().count();
    s.chars().skip(count.saturating_sub(width)).collect()
}

/// Create a centered rectangle with fixed dimensions
fn centered_rect_fixed(width: u16, height: u16, r: Rect) -> Rect {
    let x = r.x + (r.width.saturating_sub(width)) / 2;
    let y = r.y + (r.height.saturating_sub(height)) / 2;
    Rect::new(x, y, width.min(r.width), height.min(r.height))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_long_profile_fields_fit_dashboard() {
        let email = format!("{}@example.com", "j".repeat(60));
        let shown = truncate(&email, MAX_FIELD_WIDTH);
        assert_eq!(shown.chars().count(), MAX_FIELD_WIDTH);
        assert!(shown.ends_with("..."));
        assert_eq!(truncate("jdoe@example.com", MAX_FIELD_WIDTH), "jdoe@example.com");
    }

    #[test]
    fn test_tail() {
        assert_eq!(tail("short", 16), "short");
        assert_eq!(tail("a-very-long-username@example.com", 8), "mple.com");
        assert_eq!(tail("", 4), "");
    }

    #[test]
    fn test_centered_rect_fixed() {
        let outer = Rect::new(0, 0, 100, 40);
        let inner = centered_rect_fixed(46, 12, outer);
        assert_eq!(inner, Rect::new(27, 14, 46, 12));

        // Never larger than the frame
        let small = centered_rect_fixed(46, 12, Rect::new(0, 0, 20, 5));
        assert_eq!(small.width, 20);
        assert_eq!(small.height, 5);
    }
}
