//! Terminal rendering: one aggregate progress bar plus a log line per transition

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use ytmdl_core::{BatchProgress, Item, ItemState, ProgressSnapshot, QueueEvent};

/// Bar resolution; the aggregate fraction is scaled onto it
const BAR_LENGTH: u64 = 1000;

pub struct Renderer {
    bar: ProgressBar,
}

impl Renderer {
    /// Bar drawn on stdout; tracing output stays on stderr
    pub fn new() -> Self {
        let bar = ProgressBar::with_draw_target(Some(BAR_LENGTH), ProgressDrawTarget::stdout());
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} [{bar:40.green/white}] {percent:>3}% {msg}")
                .expect("progress template is valid")
                .progress_chars("━━╌"),
        );
        Self { bar }
    }

    /// Renderer that draws nothing
    pub fn hidden() -> Self {
        Self {
            bar: ProgressBar::hidden(),
        }
    }

    pub fn update(&self, snapshot: &ProgressSnapshot) {
        self.bar
            .set_position((snapshot.fraction * BAR_LENGTH as f64).round() as u64);
        self.bar.set_message(status_line(snapshot));
        self.bar.tick();
    }

    /// Print above the bar without tearing it
    pub fn line(&self, text: impl AsRef<str>) {
        self.bar.println(text.as_ref());
    }

    pub fn event(&self, event: &QueueEvent) {
        if let Some(line) = event_line(event) {
            self.line(line);
        }
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl Default for Renderer {
    fn default() -> Self {
        Self::new()
    }
}

/// Short status shown next to the bar, e.g. "7/20 done, 3 active, 0.4/s"
pub fn status_line(snapshot: &ProgressSnapshot) -> String {
    let counters = &snapshot.counters;
    let mut line = format!(
        "{}/{} done, {} active",
        counters.finished(),
        counters.total,
        counters.active + counters.paused
    );
    if counters.failed > 0 {
        line.push_str(&format!(", {} failed", counters.failed));
    }
    if let Some(rate) = snapshot.items_per_sec {
        line.push_str(&format!(", {:.1}/s", rate));
    }
    if snapshot.paused {
        line.push_str(" [paused]");
    }
    line
}

/// Log line for an event; progress ticks and per-item suspension are not logged
pub fn event_line(event: &QueueEvent) -> Option<String> {
    match event {
        QueueEvent::BatchAdded { title, items, .. } => Some(format!(
            "Queued \"{}\" ({} item{})",
            title,
            items,
            if *items == 1 { "" } else { "s" }
        )),
        QueueEvent::ItemStateChanged {
            display_name,
            from,
            to,
            ..
        } => match (from, to) {
            (ItemState::Pending, ItemState::Active) => Some(format!("Downloading {}", display_name)),
            (ItemState::Active, ItemState::Pending) => Some(format!("Requeued {}", display_name)),
            (ItemState::Failed, ItemState::Pending) => Some(format!("Retrying {}", display_name)),
            (_, ItemState::Succeeded) => Some(format!("Done {}", display_name)),
            (_, ItemState::Skipped) => Some(format!("Skipped {}", display_name)),
            (_, ItemState::Failed) => Some(format!("Failed {}", display_name)),
            _ => None,
        },
        QueueEvent::Paused => Some("Paused, press p to resume".to_string()),
        QueueEvent::Resumed => Some("Resumed".to_string()),
        QueueEvent::Cancelled { batch_id: None } => Some("Cancelled all downloads".to_string()),
        QueueEvent::Cancelled { batch_id: Some(id) } => Some(format!("Cancelled batch {}", id)),
        QueueEvent::ItemProgress { .. } => None,
    }
}

/// Summary line for a batch followed by one line per item that did not succeed
pub fn batch_report(progress: &BatchProgress, items: &[Item]) -> Vec<String> {
    let mut lines = vec![format!("{}: {}", progress.title, progress.summary())];

    for item in items {
        let reason = match item.state {
            ItemState::Skipped => item.skip_reason.clone(),
            ItemState::Failed => item.last_error.as_ref().map(|err| err.message.clone()),
            _ => None,
        };
        if let Some(reason) = reason {
            lines.push(format!("  {} ({}): {}", item.display_name, item.state, reason));
        }
    }
    lines
}
