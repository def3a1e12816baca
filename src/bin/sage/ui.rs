use std::fmt::Display;
use std::io::IsTerminal;
use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};
use nu_ansi_term::{Color, Style};

/// Terminal output for the `sage` binary. Colors only when stdout is a
/// terminal and the caller did not ask for plain output.
pub struct Ui {
    palette: Palette,
    paint: bool,
    quiet: bool,
}

impl Ui {
    pub fn new(plain: bool, quiet: bool) -> Self {
        let paint = !plain && !quiet && std::io::stdout().is_terminal();

        #[cfg(windows)]
        if paint {
            let _ = nu_ansi_term::enable_ansi_support();
        }

        Self {
            palette: if paint {
                Palette::colored()
            } else {
                Palette::plain()
            },
            paint,
            quiet,
        }
    }

    /// Prints `title` followed by right-aligned `key: value` rows.
    pub fn section<'a, I, V>(&self, title: &str, rows: I)
    where
        I: IntoIterator<Item = (&'a str, V)>,
        V: Display,
    {
        let rows: Vec<(&str, String)> = rows
            .into_iter()
            .map(|(key, value)| (key, value.to_string()))
            .collect();
        if rows.is_empty() {
            return;
        }
        println!("{}", self.palette.heading.paint(format!("{HEADING_ICON} {title}")));
        let width = rows.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
        for (key, value) in rows {
            println!(
                "  {} {}",
                self.palette.key.paint(format!("{key:>width$}:")),
                self.palette.value.paint(value)
            );
        }
    }

    pub fn success(&self, message: &str) {
        if self.quiet {
            return;
        }
        println!("{} {message}", self.palette.success.paint(SUCCESS_ICON));
    }

    pub fn error(&self, message: &str) {
        eprintln!("{} {message}", self.palette.error.paint(ERROR_ICON));
    }

    /// Spinner shown while a long step runs. Finishing the guard clears it.
    pub fn task(&self, label: impl Into<String>) -> Task {
        let label = label.into();
        let bar = (self.paint && !self.quiet).then(|| {
            let bar = ProgressBar::new_spinner();
            if let Ok(style) = ProgressStyle::with_template("{spinner} {msg} {elapsed}") {
                bar.set_style(style.tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ "));
            }
            bar.set_message(label.clone());
            bar.enable_steady_tick(Duration::from_millis(120));
            bar
        });
        Task {
            bar,
            started: Instant::now(),
        }
    }
}

pub struct Task {
    bar: Option<ProgressBar>,
    started: Instant,
}

impl Task {
    pub fn finish(mut self) -> Duration {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
        self.started.elapsed()
    }
}

impl Drop for Task {
    fn drop(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.abandon();
        }
    }
}

pub fn format_duration(duration: Duration) -> String {
    if duration.as_secs_f64() >= 1.0 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{:.0}ms", duration.as_secs_f64() * 1_000.0)
    }
}

struct Palette {
    heading: Style,
    key: Style,
    value: Style,
    success: Style,
    error: Style,
}

impl Palette {
    fn colored() -> Self {
        Self {
            heading: Style::new().fg(Color::Purple).bold(),
            key: Style::new().fg(Color::LightBlue).bold(),
            value: Style::new().fg(Color::White),
            success: Style::new().fg(Color::LightGreen).bold(),
            error: Style::new().fg(Color::Red).bold(),
        }
    }

    fn plain() -> Self {
        Self {
            heading: Style::new(),
            key: Style::new(),
            value: Style::new(),
            success: Style::new(),
            error: Style::new(),
        }
    }
}

const HEADING_ICON: &str = "▸";
const SUCCESS_ICON: &str = "✔";
const ERROR_ICON: &str = "✘";
