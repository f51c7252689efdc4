//! Install state display

use std::time::Duration;

use console::{Style, Term};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use sideload_events::Subscription;
use sideload_types::InstallState;

/// Renders install states as they arrive on the bus
pub struct EventHandler {
    term: Term,
    colors_enabled: bool,
    /// No terminal output at all (JSON mode)
    quiet: bool,
    bar: Option<ProgressBar>,
    last_state: Option<&'static str>,
}

impl EventHandler {
    /// Create new event handler
    pub fn new(colors_enabled: bool, quiet: bool) -> Self {
        Self {
            term: Term::stderr(),
            colors_enabled,
            quiet,
            bar: None,
            last_state: None,
        }
    }

    /// Show states until the attempt reaches `Success` or `Error`
    pub async fn follow(&mut self, subscription: &mut Subscription) -> Option<InstallState> {
        while let Some(state) = subscription.recv().await {
            self.handle_state(&state);
            if state.is_terminal() {
                return Some(state);
            }
        }
        None
    }

    /// Handle one observed state
    pub fn handle_state(&mut self, state: &InstallState) {
        let entered = self.last_state != Some(state.name());
        self.last_state = Some(state.name());
        if self.quiet {
            return;
        }

        match state {
            InstallState::Parsing if entered => self.show_status("Reading package..."),
            InstallState::Installing { progress } => {
                let bar = self.bar.get_or_insert_with(new_bar);
                bar.set_position(percent(*progress));
            }
            InstallState::UserConfirmationRequired { pending_action } => {
                self.finish_bar();
                self.show_status(&format!(
                    "Confirm the installation on the device (session {})",
                    pending_action.session_id()
                ));
            }
            InstallState::Success => {
                self.finish_bar();
                self.show_status("Installer reported success");
            }
            InstallState::Error { message } => {
                if let Some(bar) = self.bar.take() {
                    bar.abandon();
                }
                self.show_error(message);
            }
            _ => {}
        }
    }

    fn finish_bar(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
    }

    fn show_status(&self, message: &str) {
        let styled = Style::new()
            .dim()
            .force_styling(self.colors_enabled)
            .apply_to(message);
        let _ = self.term.write_line(&styled.to_string());
    }

    fn show_error(&self, message: &str) {
        let styled = Style::new()
            .red()
            .force_styling(self.colors_enabled)
            .apply_to(format!("Error: {message}"));
        let _ = self.term.write_line(&styled.to_string());
    }
}

fn new_bar() -> ProgressBar {
    let bar = ProgressBar::with_draw_target(Some(100), ProgressDrawTarget::stderr());
    if let Ok(style) = ProgressStyle::with_template("{spinner} Installing [{bar:40}] {pos:>3}%") {
        bar.set_style(style.progress_chars("=> "));
    }
    bar.enable_steady_tick(Duration::from_millis(120));
    bar
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn percent(progress: f32) -> u64 {
    (progress.clamp(0.0, 1.0) * 100.0).round() as u64
}
