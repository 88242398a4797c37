//! Terminal output of the batchline binary: a spinner while seeding and
//! the coloured history view.

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use batchline::progress::{BatchState, CompletionSummary};

/// Spinner shown while a fixture is written to the database.
pub struct SeedProgress {
    pb: ProgressBar,
    green: Style,
}

impl SeedProgress {
    pub fn start(source: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
            pb.set_style(style);
        }
        pb.set_message(format!("Seeding from {source}"));
        pb.enable_steady_tick(std::time::Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
        }
    }

    pub fn finish(&self, actors: usize, stages: usize, batches: usize) {
        self.pb.finish_and_clear();
        println!(
            "  {} Seeded {actors} actors, {stages} stages, {batches} batches",
            self.green.apply_to("✓")
        );
    }

    pub fn abandon(&self) {
        self.pb.finish_and_clear();
    }
}

pub fn print_history(state: BatchState, summary: &CompletionSummary) {
    let bold = Style::new().bold();
    let state_style = match state {
        BatchState::Completed => Style::new().green().bold(),
        BatchState::Fixed(_) => Style::new().yellow(),
        BatchState::Unassigned => Style::new().dim(),
    };

    println!(
        "{} {} ({} pcs.)",
        bold.apply_to("Batch"),
        bold.apply_to(&summary.batch.number),
        summary.batch.quantity
    );
    println!("  state: {}", state_style.apply_to(state));
    if summary.stages.is_empty() {
        println!("  no stages completed yet");
        return;
    }
    for stage in &summary.stages {
        println!(
            "  {:<20} {:<20} {:>6} pcs.  {}",
            stage.label,
            stage.actor_name,
            stage.quantity,
            stage.completed_at.format("%d.%m.%Y %H:%M")
        );
    }
}
