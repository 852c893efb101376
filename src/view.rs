// Terminal presentation of the lifecycle state

use crate::generation::{LifecycleState, Phase};
use crossterm::cursor::MoveToColumn;
use crossterm::execute;
use crossterm::style::Print;
use crossterm::terminal::{Clear, ClearType};
use std::io::{self, Write};
use std::path::Path;
use std::time::Duration;
use termimad::{MadSkin, crossterm::style::Color};
use tokio::sync::watch;

const SPINNER_FRAMES: [&str; 4] = ["|", "/", "-", "\\"];
const PREVIEW_CHARS: usize = 48;

/// Markdown for one state snapshot. `saved` is where the image was written, if anywhere.
pub fn render_markdown(state: &LifecycleState, saved: Option<&Path>) -> String {
    match state.phase() {
        Phase::Idle => "**Enter your image prompt**".to_string(),
        Phase::Submitting => format!("*Generating your image...*\n\n> {}", state.prompt),
        Phase::Succeeded => {
            let mut text = format!("## Image ready\n\n> {}\n\n", state.prompt);
            if let Some(image) = &state.result {
                let uri = image.data_uri();
                let preview: String = uri.chars().take(PREVIEW_CHARS).collect();
                let suffix = if uri.len() > preview.len() { "..." } else { "" };
                text.push_str(&format!("`{}{}`\n", preview, suffix));
            }
            if let Some(path) = saved {
                text.push_str(&format!("\nSaved to `{}`\n", path.display()));
            }
            text
        }
        Phase::Failed => format!(
            "## Error\n\n**{}**",
            state.error.as_deref().unwrap_or_default()
        ),
    }
}

fn create_markdown_skin() -> MadSkin {
    let mut skin = MadSkin::default();

    skin.headers[0].set_fg(Color::Cyan);
    skin.headers[1].set_fg(Color::Green);
    skin.inline_code.set_fg(Color::Yellow);
    skin.bold.set_fg(Color::White);
    skin.italic.set_fg(Color::Magenta);

    skin
}

/// Prints state snapshots with a markdown skin
pub struct TerminalView {
    skin: MadSkin,
    error_skin: MadSkin,
}

impl TerminalView {
    pub fn new() -> Self {
        let mut error_skin = create_markdown_skin();
        error_skin.headers[1].set_fg(Color::Red);
        error_skin.bold.set_fg(Color::Red);

        Self {
            skin: create_markdown_skin(),
            error_skin,
        }
    }

    pub fn show(&self, state: &LifecycleState, saved: Option<&Path>) {
        let text = render_markdown(state, saved);
        match state.phase() {
            Phase::Failed => self.error_skin.print_text(&text),
            _ => self.skin.print_text(&text),
        }
    }

    /// One-line notice outside the state machine (busy refusal, validation)
    pub fn notice(&self, message: &str) {
        self.skin.print_text(&format!("*{}*", message));
    }
}

impl Default for TerminalView {
    fn default() -> Self {
        Self::new()
    }
}

/// Wipe whatever the busy indicator last drew
pub fn clear_busy_line() {
    if let Err(e) = execute!(io::stderr(), MoveToColumn(0), Clear(ClearType::CurrentLine)) {
        tracing::debug!("could not clear busy line: {}", e);
    }
}

/// Animate a busy line on stderr while the watched state is in flight.
///
/// Returns once the channel closes.
pub async fn busy_indicator(mut updates: watch::Receiver<LifecycleState>) {
    let mut frame = 0usize;
    let mut ticker = tokio::time::interval(Duration::from_millis(120));
    let mut drawn = false;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if updates.borrow().in_flight {
                    let line = format!("{} Generating your image...", SPINNER_FRAMES[frame % SPINNER_FRAMES.len()]);
                    frame += 1;
                    if let Err(e) = execute!(io::stderr(), MoveToColumn(0), Clear(ClearType::CurrentLine), Print(line)) {
                        tracing::debug!("could not draw busy line: {}", e);
                    }
                    drawn = true;
                }
            }
            changed = updates.changed() => {
                if drawn && !updates.borrow_and_update().in_flight {
                    clear_busy_line();
                    if let Err(e) = io::stderr().flush() {
                        tracing::debug!("could not flush stderr: {}", e);
                    }
                    drawn = false;
                }
                if changed.is_err() {
                    return;
                }
            }
        }
    }
}
