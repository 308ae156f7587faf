use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use groupalarm::alarm::{AlarmError, AlarmService, EventSink, model};
use groupalarm::command::{Command, parse_line};

#[derive(Parser, Debug)]
#[command(
    name = "groupalarm",
    version,
    about = "Grouped alarm command processor"
)]
struct Cli {
    /// JSON file of alarms submitted at startup.
    #[arg(long)]
    alarms: Option<PathBuf>,

    #[arg(long, default_value = "Alarm> ")]
    prompt: String,

    /// Seconds to keep running after stdin closes, so pending alarms
    /// can expire in scripted sessions.
    #[arg(long, default_value_t = 0)]
    linger: u64,
}

fn main() {
    env_logger::init();
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    let sink: EventSink = Arc::new(|event| println!("{event}"));
    let service = AlarmService::start(sink)?;

    if let Some(path) = &cli.alarms {
        for alarm in model::load_alarm_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?
        {
            service
                .submit_alarm(
                    alarm.alarm_id,
                    alarm.group_id,
                    alarm.interval,
                    &alarm.message,
                )
                .with_context(|| format!("failed to preload alarm {}", alarm.alarm_id))?;
        }
    }

    let stdin = io::stdin();
    let mut line = String::new();
    loop {
        print!("{}", cli.prompt);
        io::stdout().flush()?;
        line.clear();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let outcome = match parse_line(trimmed) {
            Ok(Command::Start {
                alarm_id,
                group_id,
                interval_seconds,
                message,
            }) => service.submit_alarm(
                alarm_id,
                group_id,
                Duration::from_secs(interval_seconds),
                &message,
            ),
            Ok(Command::Change {
                alarm_id,
                group_id,
                interval_seconds,
                message,
            }) => service.change_alarm(
                alarm_id,
                group_id,
                Duration::from_secs(interval_seconds),
                &message,
            ),
            Err(err) => {
                eprintln!("error: {err:#}");
                continue;
            }
        };
        match outcome {
            Ok(()) => {}
            // Recoverable: report and keep taking commands.
            Err(err @ (AlarmError::DuplicateId(_) | AlarmError::UnknownAlarm(_))) => {
                eprintln!("error: {err}");
            }
            Err(err) => return Err(err.into()),
        }
    }

    if cli.linger > 0 {
        thread::sleep(Duration::from_secs(cli.linger));
    }
    service.shutdown();
    Ok(())
}
