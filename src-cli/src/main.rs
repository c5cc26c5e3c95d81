//! NoiseWatch Command Line Interface
//!
//! Controls the monitoring session of a running noisewatch-service and reads
//! the stored noise history over its HTTP API.

mod client;

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use noisewatch_common::api::{default_base_url, NoiseEventReport, StartSessionRequest};
use noisewatch_common::{DetectionState, HistoryPoint, NoiseStatus, SessionState, SessionStatus};
use serde::Serialize;

use client::Client;

/// Widest bar drawn by `history`
const MAX_BAR_WIDTH: usize = 40;

#[derive(Parser)]
#[command(name = "noisewatch")]
#[command(author = "NoiseWatch")]
#[command(version)]
#[command(about = "Noise monitoring CLI", long_about = None)]
struct Cli {
    /// Service base URL
    #[arg(long, default_value_t = default_base_url())]
    url: String,

    /// Output format
    #[arg(long, default_value = "text")]
    format: OutputFormat,

    /// Suppress non-essential output
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a monitoring session
    Start {
        /// Analysis window (power of two); frames carry half as many bins
        #[arg(long)]
        fft_size: Option<usize>,

        /// WAV recording to monitor
        #[arg(short, long)]
        source: Option<PathBuf>,

        /// Stop replaying when the recording ends
        #[arg(long)]
        no_loop: bool,
    },

    /// Stop the monitoring session
    Stop,

    /// Show the current session status
    Status,

    /// Show the stored noise history
    History,

    /// Submit a noise event by hand
    Report {
        /// Loudness in dB
        #[arg(long)]
        db: f64,

        /// Mark the event as severe noise
        #[arg(long)]
        severe: bool,

        /// RFC 3339 timestamp (defaults to now)
        #[arg(long)]
        timestamp: Option<String>,
    },

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("{}: {}", "Error".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), String> {
    // Handle version separately (doesn't need service)
    if matches!(cli.command, Commands::Version) {
        println!("noisewatch {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let client = Client::new(&cli.url).map_err(|e| e.to_string())?;
    let json = matches!(cli.format, OutputFormat::Json);

    match cli.command {
        Commands::Start {
            fft_size,
            source,
            no_loop,
        } => {
            let request = StartSessionRequest {
                fft_size,
                source,
                looping: no_loop.then_some(false),
            };
            request.validate()?;

            let status = client.start(&request).await.map_err(|e| e.to_string())?;
            if json {
                print_json(&status)?;
            } else if !cli.quiet {
                match status.state {
                    SessionState::Running => {
                        println!("{}", "Monitoring started".green());
                        if let Some(bins) = status.bins {
                            println!("Bins: {}", bins);
                        }
                        if !status.history.is_empty() {
                            println!("History: {} stored readings", status.history.len());
                        }
                    }
                    _ => println!("{}", "Start cancelled".yellow()),
                }
            }
        }

        Commands::Stop => {
            let status = client.stop().await.map_err(|e| e.to_string())?;
            if json {
                print_json(&status)?;
            } else if !cli.quiet {
                println!("{}", "Monitoring stopped".green());
            }
        }

        Commands::Status => {
            let status = client.status().await.map_err(|e| e.to_string())?;
            if json {
                print_json(&status)?;
            } else {
                print_status(&status);
            }
        }

        Commands::History => {
            let history = client.history().await.map_err(|e| e.to_string())?;
            if json {
                print_json(&history)?;
            } else if history.is_empty() {
                println!("No noise events stored");
            } else {
                print_history(&history);
            }
        }

        Commands::Report {
            db,
            severe,
            timestamp,
        } => {
            let report = build_report(db, severe, timestamp.as_deref())?;
            client.report(&report).await.map_err(|e| e.to_string())?;
            if json {
                print_json(&report)?;
            } else if !cli.quiet {
                println!(
                    "{} {} dB at {}",
                    "Reported".green(),
                    report.value,
                    report.timestamp.to_rfc3339()
                );
            }
        }

        Commands::Version => {
            // Already handled above
            unreachable!()
        }
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<(), String> {
    let text = serde_json::to_string_pretty(value).map_err(|e| e.to_string())?;
    println!("{}", text);
    Ok(())
}

fn print_status(status: &SessionStatus) {
    let state_str = match status.state {
        SessionState::Running => "running".green().bold(),
        SessionState::Idle => "idle".dimmed(),
        other => other.display_name().yellow(),
    };
    println!("Session: {}", state_str);

    if status.state == SessionState::Running {
        let detection_str = match status.detection {
            DetectionState::Alerting => "alerting".red().bold(),
            DetectionState::Idle => "quiet".dimmed(),
        };
        println!("Detection: {}", detection_str);
        println!("Level: {:.2} dB", status.current_db);
        if let Some(bins) = status.bins {
            println!("Bins: {}", bins);
        }
        println!("Events: {}", status.events_emitted);
    }
}

fn print_history(history: &[HistoryPoint]) {
    let peak = history
        .iter()
        .map(|p| p.intensity)
        .fold(f64::MIN, f64::max)
        .max(1.0);

    for point in history {
        println!(
            "  {}  {:>7.2} dB  {}",
            point.time.format("%Y-%m-%d %H:%M:%S").to_string().dimmed(),
            point.intensity,
            bar(point.intensity, peak).cyan()
        );
    }
}

/// Bar proportional to `value / peak`.
fn bar(value: f64, peak: f64) -> String {
    let width = ((value.max(0.0) / peak) * MAX_BAR_WIDTH as f64).round() as usize;
    "█".repeat(width.min(MAX_BAR_WIDTH))
}

fn build_report(db: f64, severe: bool, timestamp: Option<&str>) -> Result<NoiseEventReport, String> {
    if !db.is_finite() {
        return Err("--db must be a finite number".into());
    }
    let timestamp = match timestamp {
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| format!("Invalid timestamp {:?}: {}", raw, e))?,
        None => Utc::now(),
    };
    Ok(NoiseEventReport {
        timestamp,
        status: if severe {
            NoiseStatus::SevereNoise
        } else {
            NoiseStatus::NormalNoise
        },
        value: (db * 100.0).round() / 100.0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn start_flags_parse() {
        let cli = Cli::try_parse_from([
            "noisewatch",
            "--url",
            "http://host:9000",
            "start",
            "--fft-size",
            "2048",
            "--source",
            "street.wav",
            "--no-loop",
        ])
        .unwrap();
        assert_eq!(cli.url, "http://host:9000");
        match cli.command {
            Commands::Start {
                fft_size,
                source,
                no_loop,
            } => {
                assert_eq!(fft_size, Some(2048));
                assert_eq!(source, Some(PathBuf::from("street.wav")));
                assert!(no_loop);
            }
            _ => panic!("expected start"),
        }
    }

    #[test]
    fn default_url_points_at_local_service() {
        let cli = Cli::try_parse_from(["noisewatch", "status"]).unwrap();
        assert_eq!(cli.url, "http://127.0.0.1:3000");
    }

    #[test]
    fn report_rounds_and_parses_timestamp() {
        let report = build_report(41.2345, false, Some("2025-06-04T12:00:00Z")).unwrap();
        assert_eq!(report.value, 41.23);
        assert_eq!(report.status, NoiseStatus::NormalNoise);
        assert_eq!(report.timestamp.to_rfc3339(), "2025-06-04T12:00:00+00:00");

        let severe = build_report(55.0, true, None).unwrap();
        assert_eq!(severe.status, NoiseStatus::SevereNoise);
    }

    #[test]
    fn report_rejects_bad_timestamp() {
        assert!(build_report(40.0, false, Some("noon")).is_err());
    }

    #[test]
    fn bar_scales_to_peak() {
        assert_eq!(bar(50.0, 50.0).chars().count(), MAX_BAR_WIDTH);
        assert_eq!(bar(25.0, 50.0).chars().count(), MAX_BAR_WIDTH / 2);
        assert_eq!(bar(-10.0, 50.0), "");
    }
}
