//! Typed progress events and the console reporter.
//!
//! The harness core never prints. Drivers publish [`Event`] values to a
//! pluggable [`Reporter`]; the console implementation renders them in one
//! of four styles, selected by configuration or the `TEST_CARLY_STYLE`
//! environment variable.

use carly_core::{AssertionEvent, AssertionKind};
use carly_search::Futures;
use colored::Colorize;
use std::env;
use std::io::Write;
use std::time::Duration;

/// Progress events emitted by the trial and generative drivers.
#[derive(Debug, Clone)]
pub enum Event {
    /// A generated input is about to run.
    TrialStart {
        op_count: usize,
        concurrency: usize,
        repetitions: usize,
    },
    /// One repetition (fresh system) is starting.
    TestStart,
    /// The runner finished applying operations.
    RunOps {
        op_count: usize,
        threads: usize,
        elapsed: Duration,
    },
    /// The search committed a worldline for this repetition.
    TestPass {
        futures: Futures,
        visited: usize,
        elapsed: Duration,
        reports: Vec<AssertionEvent>,
    },
    /// The search exhausted the interleaving space for this repetition.
    TestFail {
        futures: Futures,
        visited: usize,
        elapsed: Duration,
        reports: Vec<AssertionEvent>,
    },
    /// Every repetition of the trial succeeded.
    TrialPass,
    /// A repetition failed; its index is attached.
    TrialFail { repetition: usize },
    /// Whole-run verdict.
    Summary {
        message: String,
        passed: bool,
        num_tests: u32,
        seed: u64,
    },
    /// The minimal failing input after shrinking, with the assertion
    /// events from its final re-run.
    Shrunk {
        depth: usize,
        total_nodes_visited: usize,
        smallest: String,
        reports: Vec<AssertionEvent>,
    },
}

/// Destination for events.
pub trait Reporter: Send + Sync {
    fn publish(&self, event: &Event);
}

/// Reporter that drops everything. Used for shrink re-runs and quiet tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn publish(&self, _event: &Event) {}
}

/// Output style for the console reporter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Style {
    /// Every event on its own line.
    Verbose,
    /// One line per trial.
    Terse,
    /// One character per repetition, summary at the end.
    Dots,
    /// Nothing at all.
    Silent,
}

impl Style {
    fn from_env() -> Option<Style> {
        match env::var("TEST_CARLY_STYLE").ok()?.trim() {
            "verbose" => Some(Style::Verbose),
            "terse" => Some(Style::Terse),
            "dots" => Some(Style::Dots),
            "silent" => Some(Style::Silent),
            _ => None,
        }
    }
}

/// Rendering caps applied to counterexamples and assertion reports.
#[derive(Debug, Clone, Copy)]
pub struct PrettyOptions {
    /// Longest rendered line before truncation.
    pub max_width: usize,
}

impl Default for PrettyOptions {
    fn default() -> Self {
        Self { max_width: 160 }
    }
}

/// Console reporter configuration. Unset fields fall back to the
/// `TEST_CARLY_STYLE` and `TEST_CARLY_COLOR` environment variables.
#[derive(Debug, Clone, Default)]
pub struct ReportConfig {
    pub style: Option<Style>,
    pub print_color: Option<bool>,
    pub pretty: Option<PrettyOptions>,
}

/// Renders events to stdout.
pub struct ConsoleReporter {
    style: Style,
    color: bool,
    pretty: PrettyOptions,
}

impl ConsoleReporter {
    pub fn new(config: &ReportConfig) -> Self {
        Self {
            style: config.style.or_else(Style::from_env).unwrap_or(Style::Dots),
            color: config.print_color.unwrap_or_else(color_from_env),
            pretty: config.pretty.unwrap_or_default(),
        }
    }

    fn green(&self, text: &str) -> String {
        if self.color {
            text.green().to_string()
        } else {
            text.to_string()
        }
    }

    fn red(&self, text: &str) -> String {
        if self.color {
            text.red().to_string()
        } else {
            text.to_string()
        }
    }

    fn clip(&self, text: &str) -> String {
        let max = self.pretty.max_width;
        if text.chars().count() <= max {
            text.to_string()
        } else {
            let mut clipped: String = text.chars().take(max.saturating_sub(1)).collect();
            clipped.push('…');
            clipped
        }
    }

    fn print_reports(&self, reports: &[AssertionEvent]) {
        for report in reports {
            let line = self.clip(&report.to_string());
            match report.kind {
                AssertionKind::Pass => println!("    {}", self.green(&line)),
                _ => println!("    {}", self.red(&line)),
            }
        }
    }
}

impl Reporter for ConsoleReporter {
    fn publish(&self, event: &Event) {
        match self.style {
            Style::Silent => {}
            Style::Dots => match event {
                Event::TestPass { .. } => {
                    print!(".");
                    let _ = std::io::stdout().flush();
                }
                Event::TestFail { .. } => {
                    print!("{}", self.red("F"));
                    let _ = std::io::stdout().flush();
                }
                Event::Summary {
                    message,
                    passed,
                    num_tests,
                    seed,
                } => {
                    println!();
                    let verdict = if *passed {
                        self.green("ok")
                    } else {
                        self.red("FAILED")
                    };
                    println!("{message}: {verdict} ({num_tests} inputs, seed {seed})");
                }
                Event::Shrunk {
                    depth,
                    total_nodes_visited,
                    smallest,
                    reports,
                } => {
                    println!(
                        "  shrunk to minimal failing input (depth {depth}, {total_nodes_visited} candidates):"
                    );
                    println!("    {}", self.clip(smallest));
                    self.print_reports(reports);
                }
                _ => {}
            },
            Style::Terse => match event {
                Event::TrialPass => println!("{}", self.green("trial ok")),
                Event::TrialFail { repetition } => {
                    println!("{} (repetition {repetition})", self.red("trial FAILED"))
                }
                Event::Summary {
                    message,
                    passed,
                    num_tests,
                    seed,
                } => {
                    let verdict = if *passed {
                        self.green("ok")
                    } else {
                        self.red("FAILED")
                    };
                    println!("{message}: {verdict} ({num_tests} inputs, seed {seed})");
                }
                Event::Shrunk {
                    smallest, reports, ..
                } => {
                    println!("  minimal failing input: {}", self.clip(smallest));
                    self.print_reports(reports);
                }
                _ => {}
            },
            Style::Verbose => match event {
                Event::TrialStart {
                    op_count,
                    concurrency,
                    repetitions,
                } => println!(
                    "trial: {op_count} ops across {concurrency} threads, {repetitions} repetitions"
                ),
                Event::TestStart => println!("  repetition starting"),
                Event::RunOps {
                    op_count,
                    threads,
                    elapsed,
                } => println!(
                    "  ran {op_count} ops on {threads} threads in {:.1} ms",
                    elapsed.as_secs_f64() * 1e3
                ),
                Event::TestPass {
                    futures,
                    visited,
                    elapsed,
                    reports,
                } => {
                    println!(
                        "  {}: {futures} futures, {visited} visited, {:.1} ms",
                        self.green("worldline found"),
                        elapsed.as_secs_f64() * 1e3
                    );
                    self.print_reports(reports);
                }
                Event::TestFail {
                    futures,
                    visited,
                    elapsed,
                    reports,
                } => {
                    println!(
                        "  {}: {futures} futures, {visited} visited, {:.1} ms",
                        self.red("no worldline"),
                        elapsed.as_secs_f64() * 1e3
                    );
                    self.print_reports(reports);
                }
                Event::TrialPass => println!("  {}", self.green("trial ok")),
                Event::TrialFail { repetition } => {
                    println!("  {} at repetition {repetition}", self.red("trial FAILED"))
                }
                Event::Summary {
                    message,
                    passed,
                    num_tests,
                    seed,
                } => {
                    let verdict = if *passed {
                        self.green("ok")
                    } else {
                        self.red("FAILED")
                    };
                    println!("{message}: {verdict} ({num_tests} inputs, seed {seed})");
                }
                Event::Shrunk {
                    depth,
                    total_nodes_visited,
                    smallest,
                    reports,
                } => {
                    println!(
                        "shrunk to minimal failing input (depth {depth}, {total_nodes_visited} candidates):"
                    );
                    println!("  {}", self.clip(smallest));
                    self.print_reports(reports);
                }
            },
        }
    }
}

fn color_from_env() -> bool {
    match env::var("TEST_CARLY_COLOR") {
        Ok(value) => !matches!(value.trim(), "0" | "false" | "no"),
        Err(_) => true,
    }
}
