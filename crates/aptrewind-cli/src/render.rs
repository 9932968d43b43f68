use std::io::IsTerminal;
use std::time::Duration;

use anstyle::{AnsiColor, Effects, Style};
use indicatif::{ProgressBar, ProgressStyle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStyle {
    Plain,
    Rich,
}

pub fn output_style(plain_flag: bool) -> OutputStyle {
    if plain_flag || !std::io::stdout().is_terminal() {
        OutputStyle::Plain
    } else {
        OutputStyle::Rich
    }
}

fn label_style(label: &str) -> Style {
    let color = match label {
        "ok" => AnsiColor::BrightGreen,
        "fail" | "error" => AnsiColor::BrightRed,
        "warn" | "skip" => AnsiColor::BrightYellow,
        _ => AnsiColor::BrightBlue,
    };
    Style::new().fg_color(Some(color.into())).effects(Effects::BOLD)
}

fn section_style() -> Style {
    Style::new()
        .fg_color(Some(AnsiColor::BrightCyan.into()))
        .effects(Effects::BOLD)
}

fn colorize(style: Style, text: &str) -> String {
    format!("{}{}{}", style.render(), text, style.render_reset())
}

pub fn render_status_line(style: OutputStyle, label: &str, message: &str) -> String {
    match style {
        OutputStyle::Plain => format!("{label}: {message}"),
        OutputStyle::Rich => {
            format!("{} {message}", colorize(label_style(label), &format!("[{label}]")))
        }
    }
}

pub fn print_status(style: OutputStyle, label: &str, message: &str) {
    println!("{}", render_status_line(style, label, message));
}

pub fn print_section(style: OutputStyle, title: &str) {
    match style {
        OutputStyle::Plain => println!("-- {title}"),
        OutputStyle::Rich => {
            println!();
            println!("{}", colorize(section_style(), &format!("== {title} ==")));
        }
    }
}

/// Progress over a known number of work items. Rich mode draws an indicatif
/// bar; plain mode stays silent and lets per-item status lines speak.
pub struct PhaseProgress {
    bar: Option<ProgressBar>,
}

impl PhaseProgress {
    pub fn start(style: OutputStyle, label: &str, total: u64) -> Self {
        let bar = match style {
            OutputStyle::Plain => None,
            OutputStyle::Rich => {
                let bar = ProgressBar::new(total.max(1));
                if let Ok(template) = ProgressStyle::with_template(
                    "{spinner:.cyan.bold} {msg:<10} [{bar:24.cyan/blue}] {pos:>3}/{len:3}",
                ) {
                    bar.set_style(template.progress_chars("=>-"));
                }
                bar.set_message(label.to_string());
                bar.enable_steady_tick(Duration::from_millis(80));
                Some(bar)
            }
        };
        Self { bar }
    }

    pub fn tick(&self) {
        if let Some(bar) = &self.bar {
            bar.inc(1);
        }
    }

    pub fn finish(self) {
        if let Some(bar) = self.bar {
            bar.finish_and_clear();
        }
    }
}
