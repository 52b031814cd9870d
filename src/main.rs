use clap::{Parser, ValueEnum};
use proxy_quality_hunter::config::{DEFAULT_ASN, DEFAULT_MAX_ATTEMPTS};
use proxy_quality_hunter::{
    AcquisitionConfig, AcquisitionError, Acquisition, JsonProgress, LogProgress, NoProgress, Progress, ProgressObserver,
    Settings, SingleAttempt,
};
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "proxy-quality-hunter", version, about = "Find a high quality IP by rotating the leased proxy")]
struct Cli {
    #[arg(long, default_value_t = DEFAULT_ASN, help = "ASN the replacement IP is drawn from")]
    asn: u32,
    #[arg(
        long = "max-tries",
        default_value_t = DEFAULT_MAX_ATTEMPTS,
        value_parser = clap::value_parser!(u32).range(1..),
        help = "Maximum number of replacement attempts"
    )]
    max_tries: u32,
    #[arg(long, default_value = ".", help = "Directory for per-IP reports and found_ip.json")]
    output_dir: PathBuf,
    #[arg(long, help = "Replace and check once, print the raw result as JSON, skip scoring")]
    once: bool,
    #[arg(long, value_enum, default_value_t = ProgressMode::Text, help = "How progress is reported")]
    progress: ProgressMode,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum ProgressMode {
    Text,
    Json,
    Log,
    Quiet,
}

/// Console stream progress lines go to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Sink {
    Stdout,
    Stderr,
}

impl Cli {
    /// `--once` keeps stdout for the result object alone.
    fn progress_sink(&self) -> Sink {
        if self.once {
            Sink::Stderr
        } else {
            Sink::Stdout
        }
    }

    /// Console modes already show every checkpoint, so the logger only adds
    /// warnings unless progress itself goes through it.
    fn default_log_filter(&self) -> &'static str {
        match self.progress {
            ProgressMode::Log => "info",
            _ => "warn",
        }
    }
}

/// Prints every checkpoint as a console line.
struct ConsoleProgress {
    sink: Sink,
}

impl ProgressObserver for ConsoleProgress {
    fn on_progress(&self, event: &Progress) {
        let blank = matches!(event, Progress::AttemptStarted { .. });
        match self.sink {
            Sink::Stdout => {
                if blank {
                    println!();
                }
                println!("{}", event);
            }
            Sink::Stderr => {
                if blank {
                    eprintln!();
                }
                eprintln!("{}", event);
            }
        }
    }
}

fn observer(mode: ProgressMode, sink: Sink) -> Box<dyn ProgressObserver> {
    match (mode, sink) {
        (ProgressMode::Text, sink) => Box::new(ConsoleProgress { sink }),
        (ProgressMode::Json, Sink::Stdout) => Box::new(JsonProgress::new(io::stdout())),
        (ProgressMode::Json, Sink::Stderr) => Box::new(JsonProgress::new(io::stderr())),
        (ProgressMode::Log, _) => Box::new(LogProgress),
        (ProgressMode::Quiet, _) => Box::new(NoProgress),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(cli.default_log_filter())).init();

    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return Ok(ExitCode::from(2));
        }
    };

    let config = AcquisitionConfig::builder()
        .asn(cli.asn)
        .max_attempts(cli.max_tries)
        .output_dir(cli.output_dir.clone())
        .build();
    let acquisition = Acquisition::from_settings(&settings, &config)?;
    let progress = observer(cli.progress, cli.progress_sink());

    if cli.once {
        let result = acquisition.attempt_once(config.asn, progress.as_ref()).await;
        println!("{}", serde_json::to_string(&result)?);
        return Ok(match result {
            SingleAttempt::Success { .. } => ExitCode::SUCCESS,
            SingleAttempt::Failed { .. } => ExitCode::from(1),
        });
    }

    match acquisition.run(config.max_attempts, config.asn, progress.as_ref()).await {
        Ok(outcome) => {
            println!("SOCKS5 URL: {}", outcome.socks_url);
            Ok(ExitCode::SUCCESS)
        }
        Err(AcquisitionError::Exhausted { attempts, last }) => {
            eprintln!("Finished {} attempts without finding a suitable IP", attempts);
            if let Some(last) = last {
                eprintln!("Last attempt ended at {:?}: {:?}", last.stage, last.status);
            }
            Ok(ExitCode::from(1))
        }
        Err(AcquisitionError::Configuration(e)) => {
            eprintln!("Configuration error: {}", e);
            Ok(ExitCode::from(2))
        }
        Err(e) => Err(e.into()),
    }
}
