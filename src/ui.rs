use console::{strip_ansi_codes, Term};
use forge3d::job::{JobRecord, JobStatus, Thumbnail};
use forge3d::utils::{format_bytes, GB, MB};
use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use std::time::Duration;
use unicode_width::UnicodeWidthStr;

/// Terminal output helpers
pub struct UI {
    term: Term,
}

impl UI {
    pub fn new() -> Self {
        Self {
            term: Term::stdout(),
        }
    }

    /// Helper method to conditionally apply color based on terminal support
    fn colorize<F>(&self, text: &str, color_fn: F) -> String
    where
        F: FnOnce(&str) -> String,
    {
        if self.supports_color() {
            color_fn(text)
        } else {
            text.to_string()
        }
    }

    pub fn success(&self, message: &str) {
        let output = self.colorize(message, |m| m.green().bold().to_string());
        println!("{}", output);
    }

    pub fn warning(&self, message: &str) {
        let output = self.colorize(message, |m| m.yellow().bold().to_string());
        println!("{}", output);
    }

    pub fn info(&self, message: &str) {
        let output = self.colorize(message, |m| m.blue().bold().to_string());
        println!("{}", output);
    }

    /// Job status word, coloured by lifecycle stage
    pub fn format_job_status(&self, status: JobStatus) -> String {
        let text = status.to_string();
        if !self.supports_color() {
            return text;
        }
        match status {
            JobStatus::Queued => text.dimmed().to_string(),
            JobStatus::Processing | JobStatus::Downloading => text.yellow().to_string(),
            JobStatus::Completed => text.green().to_string(),
            JobStatus::Failed => text.red().to_string(),
        }
    }

    pub fn format_thumbnail(&self, thumbnail: &Thumbnail) -> String {
        match thumbnail {
            Thumbnail::None => "-".to_string(),
            Thumbnail::Placeholder(url) => format!("placeholder ({})", url),
            Thumbnail::Captured(data) => format!("captured ({})", format_bytes(data.len() as u64)),
        }
    }

    /// Card summarising a finished job
    pub fn job_card(&self, record: &JobRecord, extra: Vec<(&str, String)>) {
        let mut content = vec![
            ("Job", record.job_id.to_string()),
            ("Prompt", record.prompt.clone()),
            ("Status", self.format_job_status(record.status)),
        ];
        if let Some(error) = &record.error {
            content.push(("Error", error.clone()));
        }
        content.push(("Thumbnail", self.format_thumbnail(&record.thumbnail)));
        let elapsed = record.updated_at - record.created_at;
        content.push(("Elapsed", format!("{}s", elapsed.num_seconds())));
        content.extend(extra);
        self.card("Generation", content);
    }

    /// Print a section header
    pub fn header(&self, title: &str) {
        let term_width = self.width();
        let title_len = title.len() + 4; // 2 spaces on each side
        let line_len = if term_width > title_len {
            (term_width - title_len) / 2
        } else {
            0
        };

        let line = "═".repeat(line_len);

        println!();
        if self.supports_color() {
            println!("{} {} {}", line.cyan(), title.cyan().bold(), line.cyan());
        } else {
            println!("{} {} {}", line, title, line);
        }
        println!();
    }

    /// Create a card-style display for information
    pub fn card(&self, title: &str, content: Vec<(&str, String)>) {
        let term_width = self.width();
        let card_width = term_width.saturating_sub(4).clamp(50, 80);

        let supports_color = self.supports_color();

        println!("╭{}╮", "─".repeat(card_width - 2));
        let title_width = title.width();
        let title_spaces = card_width.saturating_sub(title_width + 4);
        if supports_color {
            println!("│ {} {}│", title.cyan().bold(), " ".repeat(title_spaces));
        } else {
            println!("│ {} {}│", title, " ".repeat(title_spaces));
        }
        println!("├{}┤", "─".repeat(card_width - 2));

        for (label, value) in content {
            // Strip ANSI codes for width calculations
            let label_plain = strip_ansi_codes(label);
            let value_plain = strip_ansi_codes(&value);

            let content_width = label_plain.width() + value_plain.width() + 4;
            let spaces = if content_width < card_width - 1 {
                card_width - content_width - 1
            } else {
                1
            };

            if supports_color {
                println!("│ {}: {}{}│", label.dimmed(), value, " ".repeat(spaces));
            } else {
                println!("│ {}: {}{}│", label, value, " ".repeat(spaces));
            }
        }

        println!("╰{}╯", "─".repeat(card_width - 2));
        println!();
    }

    /// Get terminal width for responsive layout
    pub fn width(&self) -> usize {
        self.term.size().1 as usize
    }

    pub fn supports_color(&self) -> bool {
        self.term.features().colors_supported()
    }
}

impl Default for UI {
    fn default() -> Self {
        Self::new()
    }
}

/// Format file size in a human readable way with colors (if supported)
pub fn format_size_colored(bytes: u64) -> String {
    let formatted = format_bytes(bytes);
    let supports_color = Term::stdout().features().colors_supported();

    if supports_color {
        if bytes < MB {
            formatted.green().to_string()
        } else if bytes < GB {
            formatted.yellow().to_string()
        } else {
            formatted.red().to_string()
        }
    } else {
        formatted
    }
}

/// Spinner shown while a job is in flight
pub fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.cyan} [{elapsed_precise:.dim}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.enable_steady_tick(Duration::from_millis(120));
    pb.set_message(message.to_string());
    pb
}
