//! Stderr progress for the command line: stage spinners and a frame counter.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UiMode {
    Auto,
    Plain,
    Pretty,
}

#[derive(Clone, Debug)]
pub struct Ui {
    mode: UiMode,
    is_tty: bool,
    disable_pretty: bool,
}

impl Ui {
    pub fn new(mode: UiMode, is_tty: bool, disable_pretty: bool) -> Self {
        Self {
            mode,
            is_tty,
            disable_pretty,
        }
    }

    pub fn from_args(ui_flag: Option<&str>, is_tty: bool, disable_pretty: bool) -> Self {
        let mode = match ui_flag {
            Some("plain") => UiMode::Plain,
            Some("pretty") => UiMode::Pretty,
            _ => UiMode::Auto,
        };
        Self::new(mode, is_tty, disable_pretty)
    }

    fn use_pretty(&self) -> bool {
        self.is_tty
            && match self.mode {
                UiMode::Pretty => true,
                UiMode::Auto => !self.disable_pretty,
                UiMode::Plain => false,
            }
    }

    pub fn stage(&self, name: &str) -> StageGuard {
        if self.use_pretty() {
            let spinner = ProgressBar::new_spinner();
            spinner.set_draw_target(ProgressDrawTarget::stderr());
            spinner.enable_steady_tick(Duration::from_millis(120));
            let style = ProgressStyle::with_template("{spinner} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner());
            spinner.set_style(style);
            spinner.set_message(format!("{name}…"));
            StageGuard::new(name.to_string(), Some(spinner))
        } else {
            eprintln!("==> {}", name);
            StageGuard::new(name.to_string(), None)
        }
    }

    /// Frame counter for a running session. `total` is known for finite streams.
    pub fn frames(&self, name: &str, total: Option<u64>) -> FrameProgress {
        if !self.use_pretty() {
            eprintln!("==> {}", name);
            return FrameProgress {
                name: name.to_string(),
                start: Instant::now(),
                bar: None,
                frames: 0,
            };
        }

        let bar = match total {
            Some(total) => {
                let bar = ProgressBar::new(total);
                let style = ProgressStyle::with_template(
                    "{spinner} {msg} [{bar:30}] {pos}/{len} frames ({per_sec})",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar());
                bar.set_style(style);
                bar
            }
            None => {
                let bar = ProgressBar::new_spinner();
                let style = ProgressStyle::with_template("{spinner} {msg} {pos} frames ({per_sec})")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner());
                bar.set_style(style);
                bar
            }
        };
        bar.set_draw_target(ProgressDrawTarget::stderr());
        bar.enable_steady_tick(Duration::from_millis(120));
        bar.set_message(name.to_string());
        FrameProgress {
            name: name.to_string(),
            start: Instant::now(),
            bar: Some(bar),
            frames: 0,
        }
    }
}

pub struct StageGuard {
    name: String,
    start: Instant,
    spinner: Option<ProgressBar>,
}

impl StageGuard {
    fn new(name: String, spinner: Option<ProgressBar>) -> Self {
        Self {
            name,
            start: Instant::now(),
            spinner,
        }
    }
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed();
        let message = format!("✔ {} ({})", self.name, format_duration(elapsed));
        if let Some(spinner) = &self.spinner {
            spinner.finish_with_message(message);
        } else {
            eprintln!("{message}");
        }
    }
}

pub struct FrameProgress {
    name: String,
    start: Instant,
    bar: Option<ProgressBar>,
    frames: u64,
}

impl FrameProgress {
    /// Record that frames up to and including `frame_index` were processed.
    pub fn set_frame(&mut self, frame_index: u64) {
        self.frames = self.frames.max(frame_index + 1);
        if let Some(bar) = &self.bar {
            bar.set_position(self.frames);
        }
    }

    /// Short status next to the counter, e.g. "recording".
    pub fn set_status(&self, status: &str) {
        if let Some(bar) = &self.bar {
            bar.set_message(format!("{} {}", self.name, status));
        }
    }

    pub fn finish(self, frames: u64) {
        let message = format!(
            "✔ {} ({} frames, {})",
            self.name,
            frames,
            format_duration(self.start.elapsed())
        );
        match &self.bar {
            Some(bar) => {
                bar.set_position(frames);
                bar.finish_with_message(message);
            }
            None => eprintln!("{message}"),
        }
    }
}

fn format_duration(duration: Duration) -> String {
    if duration.as_secs() >= 1 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_flags_and_tty_pick_rendering() {
        assert!(Ui::from_args(Some("pretty"), true, true).use_pretty());
        assert!(!Ui::from_args(Some("pretty"), false, false).use_pretty());
        assert!(!Ui::from_args(Some("plain"), true, false).use_pretty());
        assert!(Ui::from_args(Some("auto"), true, false).use_pretty());
        assert!(!Ui::from_args(None, true, true).use_pretty());
    }

    #[test]
    fn durations_switch_units_at_one_second() {
        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.50s");
    }
}
