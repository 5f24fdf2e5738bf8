//! Terminal rendering for run reports and records

use colored::{ColoredString, Colorize};
use services::{
    models::record::{Record, RecordStatus},
    services::pipeline::{RunReport, StageResult},
};
use utils::text::truncate_chars;

const TITLE_WIDTH: usize = 48;

/// Output handler for terminal display
#[derive(Default)]
pub struct OutputHandler;

impl OutputHandler {
    pub fn new() -> Self {
        Self
    }

    /// Print a section header
    pub fn print_header(&self, text: &str) {
        println!();
        println!("{}", format!("▶ {}", text).bright_yellow().bold());
        println!("{}", "─".repeat(60).dimmed());
    }

    pub fn print_success(&self, text: &str) {
        println!("{} {}", "✓".bright_green(), text.bright_white());
    }

    pub fn print_error(&self, text: &str) {
        println!("{} {}", "✗".bright_red(), text.bright_red());
    }

    pub fn print_warning(&self, text: &str) {
        println!("{} {}", "⚠".bright_yellow(), text.yellow());
    }

    pub fn print_info(&self, text: &str) {
        println!("{} {}", "ℹ".bright_blue(), text);
    }

    /// One line per stage, then the final status.
    pub fn print_report(&self, report: &RunReport) {
        self.print_header(&format!(
            "{} \"{}\"",
            report.record_id,
            truncate_chars(&report.title, TITLE_WIDTH)
        ));

        for outcome in &report.stages {
            let stage = format!("{:<18}", outcome.stage.to_string());
            match &outcome.result {
                StageResult::Succeeded(detail) => {
                    println!("  {} {} {}", "ok  ".bright_green(), stage, detail.dimmed())
                }
                StageResult::Skipped(reason) => {
                    println!("  {} {} {}", "skip".dimmed(), stage.dimmed(), reason.dimmed())
                }
                StageResult::Failed { error, transient } => {
                    let suffix = if *transient { " (transient)" } else { "" };
                    println!(
                        "  {} {} {}{}",
                        "FAIL".bright_red().bold(),
                        stage,
                        error.bright_red(),
                        suffix.yellow()
                    )
                }
            }
        }

        println!("{}", "─".repeat(60).dimmed());
        println!(
            "  {} {} in {:.1}s",
            "Status:".dimmed(),
            status_colored(report.status),
            report.elapsed_ms as f64 / 1000.0
        );
        if let Some(url) = &report.video_url {
            println!("  {} {}", "Video:".dimmed(), url.bright_cyan());
        }
        println!();
    }

    /// Record fields that are set, grouped the way the pipeline fills them.
    pub fn print_record(&self, record: &Record) {
        self.print_header(&format!("Record {}", record.id));

        field("Title", Some(record.title.as_str()));
        println!(
            "  {:<16} {}",
            "Status:".dimmed(),
            status_colored(record.status)
        );
        if !record.keywords.is_empty() {
            field("Keywords", Some(record.keywords.join(", ").as_str()));
        }
        field("Optimized title", record.optimized_title.as_deref());

        let filled: Vec<_> = record.filled_products().collect();
        if !filled.is_empty() {
            println!();
            println!("  {}", "Products".bright_white().bold());
            for (slot, product) in filled.into_iter().rev() {
                println!(
                    "  {} {}{}",
                    format!("#{slot}").bright_yellow(),
                    truncate_chars(product.title.as_deref().unwrap_or_default(), TITLE_WIDTH),
                    product
                        .price
                        .as_deref()
                        .map(|p| format!(" ({p})"))
                        .unwrap_or_default()
                        .dimmed()
                );
                if let Some(link) = &product.affiliate_url {
                    println!("     {}", link.bright_cyan());
                }
            }
        }

        println!();
        field("Video", record.video_url.as_deref());
        field("Drive", record.drive_url.as_deref());
        field("YouTube", record.youtube_url.as_deref());
        field("TikTok", record.tiktok_url.as_deref());
        field("Instagram", record.instagram_url.as_deref());
        field("Blog", record.blog_url.as_deref());

        if let Some(error) = &record.last_error {
            println!();
            self.print_warning(&format!("Last error: {error}"));
        }
        println!();
    }
}

fn field(label: &str, value: Option<&str>) {
    if let Some(value) = value.filter(|v| !v.trim().is_empty()) {
        println!("  {:<16} {}", format!("{label}:").dimmed(), value);
    }
}

fn status_colored(status: RecordStatus) -> ColoredString {
    let text = status.to_string();
    match status {
        RecordStatus::Pending => text.bright_yellow(),
        RecordStatus::Processing => text.bright_blue(),
        RecordStatus::Completed => text.bright_green().bold(),
        RecordStatus::Failed => text.bright_red().bold(),
    }
}
