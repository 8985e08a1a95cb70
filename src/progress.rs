// ABOUTME: Terminal rendering of restore progress events
// ABOUTME: Drives an indicatif bar and prints one log line per event

use crate::restore::{Phase, ProgressEvent};
use indicatif::{ProgressBar, ProgressStyle};

/// Bar resolution: one step per hundredth of a percent.
const BAR_STEPS: u64 = 10_000;

pub struct ProgressRenderer {
    bar: Option<ProgressBar>,
}

impl ProgressRenderer {
    pub fn new(show_bar: bool) -> Self {
        let bar = show_bar.then(|| {
            let bar = ProgressBar::new(BAR_STEPS);
            bar.set_style(
                ProgressStyle::default_bar()
                    .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {msg}")
                    .unwrap()
                    .progress_chars("■□"),
            );
            bar.set_message("0.00%");
            bar
        });
        Self { bar }
    }

    pub fn render(&self, event: &ProgressEvent) {
        let line = event.to_string();
        match &self.bar {
            Some(bar) => {
                bar.set_position(bar_position(event.percent));
                bar.set_message(format!("{:.2}%", event.percent));
                bar.println(line);
                if event.is_terminal() {
                    match event.phase {
                        Phase::Completed => bar.finish_with_message("restore complete"),
                        Phase::Cancelled => bar.abandon_with_message("restore stopped"),
                        _ => bar.abandon_with_message("restore failed"),
                    }
                }
            }
            None => println!("{}", line),
        }
    }

    /// Leave the bar on screen after a run that ended without a terminal event.
    pub fn abandon(&self) {
        if let Some(bar) = &self.bar {
            if !bar.is_finished() {
                bar.abandon();
            }
        }
    }
}

fn bar_position(percent: f64) -> u64 {
    ((percent.clamp(0.0, 100.0) * 100.0).round() as u64).min(BAR_STEPS)
}
