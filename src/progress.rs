//! Upload progress bars and a log writer that keeps them pinned.

use crate::upload::UploadPhase;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io::{self, Write};
use std::sync::OnceLock;
use std::time::Duration;
use tracing_subscriber::fmt::MakeWriter;

static MULTI_PROGRESS: OnceLock<MultiProgress> = OnceLock::new();

fn multi_progress() -> &'static MultiProgress {
    MULTI_PROGRESS.get_or_init(|| {
        let mp = MultiProgress::new();
        mp.set_draw_target(ProgressDrawTarget::stderr_with_hz(10));
        mp
    })
}

fn upload_style() -> ProgressStyle {
    ProgressStyle::with_template("{prefix:>24} [{bar:30}] {pos:>3}% {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ")
}

/// A 0-100 bar for one file upload
pub fn add_upload_bar(file_name: &str) -> ProgressBar {
    let bar = multi_progress().add(ProgressBar::new(100));
    bar.set_style(upload_style());
    bar.set_prefix(file_name.to_string());
    bar.set_message("uploading");
    bar
}

/// Reflect an upload phase on its bar
pub fn update_upload_bar(bar: &ProgressBar, phase: &UploadPhase) {
    bar.set_position(u64::from(phase.percent()));
    match phase {
        UploadPhase::Uploading => bar.set_message("uploading"),
        UploadPhase::Processing { status, .. } => bar.set_message(status.to_string()),
        UploadPhase::Completed(_) => bar.finish_with_message("done"),
        UploadPhase::Failed(reason) => bar.abandon_with_message(format!("failed: {}", reason)),
        UploadPhase::TimedOut { .. } => bar.abandon_with_message("timed out"),
        UploadPhase::Cancelled => bar.abandon_with_message("cancelled"),
    }
}

/// Spinner showing what a streaming answer is doing
pub fn add_status_spinner(message: &str) -> ProgressBar {
    let spinner = multi_progress().add(ProgressBar::new_spinner());
    spinner.set_style(
        ProgressStyle::with_template("{spinner} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.enable_steady_tick(Duration::from_millis(120));
    spinner.set_message(message.to_string());
    spinner
}

fn emit_line(line: &str) {
    let _ = multi_progress().println(line.trim_end_matches('\r'));
}

/// `MakeWriter` for tracing that prints through the progress display
#[derive(Default, Clone)]
pub struct LogWriterFactory;

pub struct LogWriter {
    buffer: String,
}

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.push_str(&String::from_utf8_lossy(buf));

        while let Some(idx) = self.buffer.find('\n') {
            emit_line(&self.buffer[..idx]);
            self.buffer.drain(..idx + 1);
        }

        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if !self.buffer.is_empty() {
            emit_line(&self.buffer);
            self.buffer.clear();
        }
        Ok(())
    }
}

impl Drop for LogWriter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

impl<'a> MakeWriter<'a> for LogWriterFactory {
    type Writer = LogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogWriter {
            buffer: String::new(),
        }
    }
}
