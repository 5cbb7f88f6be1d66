//! Progress rendering for the command line.
//!
//! Three modes: JSON lines for machines, one `indicatif` bar per stage on a
//! terminal, and plain styled lines when output is redirected.

use std::collections::HashMap;
use std::io::IsTerminal;

use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use bootkit::progress::{ProgressEvent, Stage, Status};
use bootkit::{OperationResult, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Json,
    Bars,
    Text,
}

impl Mode {
    pub fn detect(json: bool) -> Self {
        if json {
            Mode::Json
        } else if std::io::stderr().is_terminal() {
            Mode::Bars
        } else {
            Mode::Text
        }
    }
}

/// Background task printing events until [`finish`](Self::finish) is called.
pub struct Renderer {
    stop: CancellationToken,
    handle: JoinHandle<()>,
}

impl Renderer {
    pub fn start(mut rx: mpsc::UnboundedReceiver<ProgressEvent>, mode: Mode) -> Self {
        let stop = CancellationToken::new();
        let stopped = stop.clone();

        let handle = tokio::spawn(async move {
            let mut sink = Sink::new(mode);
            loop {
                tokio::select! {
                    event = rx.recv() => match event {
                        Some(event) => sink.show(&event),
                        None => break,
                    },
                    _ = stopped.cancelled() => {
                        while let Ok(event) = rx.try_recv() {
                            sink.show(&event);
                        }
                        break;
                    }
                }
            }
            sink.close();
        });

        Self { stop, handle }
    }

    /// Flush pending events and tear down progress bars.
    pub async fn finish(self) {
        self.stop.cancel();
        if let Err(e) = self.handle.await {
            tracing::debug!("Progress renderer ended abnormally: {}", e);
        }
    }
}

struct Sink {
    mode: Mode,
    multi: MultiProgress,
    bars: HashMap<Stage, ProgressBar>,
    last: HashMap<Stage, (Status, Option<u8>)>,
}

impl Sink {
    fn new(mode: Mode) -> Self {
        Self {
            mode,
            multi: MultiProgress::new(),
            bars: HashMap::new(),
            last: HashMap::new(),
        }
    }

    fn show(&mut self, event: &ProgressEvent) {
        match self.mode {
            Mode::Json => print_json(event),
            Mode::Bars => self.show_bar(event),
            Mode::Text => self.show_text(event),
        }
    }

    fn show_bar(&mut self, event: &ProgressEvent) {
        let multi = &self.multi;
        let bar = self.bars.entry(event.stage).or_insert_with(|| {
            let bar = multi.add(ProgressBar::new(100));
            let template = ProgressStyle::with_template("{prefix:>13.bold} [{bar:30.cyan/blue}] {pos:>3}% {wide_msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-");
            bar.set_style(template);
            bar.set_prefix(event.stage.label());
            bar
        });

        if let Some(percent) = event.percent {
            bar.set_position(percent as u64);
        } else {
            bar.tick();
        }

        match event.status {
            Status::Completed => bar.finish_with_message(style(&event.message).green().to_string()),
            Status::Error => bar.abandon_with_message(style(&event.message).red().to_string()),
            _ => bar.set_message(event.message.clone()),
        }
    }

    fn show_text(&mut self, event: &ProgressEvent) {
        let previous = self.last.insert(event.stage, (event.status, event.percent));
        let label = event.stage.label();

        match event.status {
            Status::Completed => {
                eprintln!("  {} {} {}", style("✓").green(), style(label).white(), style(&event.message).dim());
            }
            Status::Error => {
                eprintln!("  {} {} {}", style("✕").red(), style(label).red(), style(&event.message).red());
            }
            status => {
                // Only status changes and every quarter of progress are worth a line.
                let show = match previous {
                    Some((prev_status, prev_percent)) if prev_status == status => {
                        quarter(event.percent) > quarter(prev_percent)
                    }
                    _ => true,
                };
                if show {
                    let percent = event
                        .percent
                        .map(|p| format!(" {:>3}%", p))
                        .unwrap_or_default();
                    eprintln!(
                        "  {} {}{} {}",
                        style("→").cyan(),
                        style(label).white(),
                        style(percent).yellow(),
                        style(&event.message).dim()
                    );
                }
            }
        }
    }

    fn close(&mut self) {
        for bar in self.bars.values() {
            if !bar.is_finished() {
                bar.abandon();
            }
        }
    }
}

fn quarter(percent: Option<u8>) -> u8 {
    percent.unwrap_or(0) / 25
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string(value) {
        Ok(line) => println!("{}", line),
        Err(e) => tracing::warn!("Could not serialize output: {}", e),
    }
}

#[derive(Serialize)]
struct ResultLine<'a> {
    operation: &'a str,
    #[serde(flatten)]
    result: OperationResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    kind: Option<&'static str>,
}

/// Print the final `{success, error}` line for an operation in JSON mode.
pub fn report<T>(json: bool, operation: &str, result: &Result<T>) {
    if json {
        print_json(&result_line(operation, result));
    }
}

fn result_line<'a, T>(operation: &'a str, result: &Result<T>) -> ResultLine<'a> {
    ResultLine {
        operation,
        result: OperationResult::of(result),
        kind: result.as_ref().err().map(|e| e.kind()),
    }
}

/// Print any serializable value as one JSON line.
pub fn emit<T: Serialize>(value: &T) {
    print_json(value);
}
