use std::fmt;

use anstyle::{AnsiColor, Color, Style};
use stepwise_core::StepResult;

pub const HEADER: Style = Style::new()
    .fg_color(Some(Color::Ansi(AnsiColor::Green)))
    .bold();

pub const USAGE: Style = Style::new()
    .fg_color(Some(Color::Ansi(AnsiColor::Green)))
    .bold();

pub const LITERAL: Style = Style::new().fg_color(Some(Color::Ansi(AnsiColor::Cyan)));

pub const DESC: Style = Style::new()
    .fg_color(Some(Color::Ansi(AnsiColor::White)))
    .dimmed();

pub const OK: Style = Style::new()
    .fg_color(Some(Color::Ansi(AnsiColor::Green)))
    .bold();

pub const WARN: Style = Style::new()
    .fg_color(Some(Color::Ansi(AnsiColor::Yellow)))
    .bold();

pub const ERROR: Style = Style::new()
    .fg_color(Some(Color::Ansi(AnsiColor::Red)))
    .bold();

pub fn get_clap_styles() -> clap::builder::Styles {
    clap::builder::Styles::styled()
        .header(HEADER)
        .usage(USAGE)
        .literal(LITERAL)
        .placeholder(LITERAL)
}

/// `text` wrapped in the escape codes of `style`.
pub fn paint(style: Style, text: impl fmt::Display) -> String {
    format!("{}{}{}", style.render(), text, style.render_reset())
}

pub fn result_style(result: &StepResult) -> Style {
    match result {
        StepResult::Success { .. } => OK,
        StepResult::Skip { .. } => DESC,
        StepResult::Abort { .. } => WARN,
        StepResult::Error { .. } => ERROR,
    }
}
