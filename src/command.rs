use anyhow::{Result, bail};

use crate::alarm::model::INTERVAL_MAX_SECS;

/// A validated console request, ready for the core.
///
/// Grammar: `Start_Alarm(<id>): Group(<group>) <seconds> <message>`
/// and `Change_Alarm(<id>): Group(<group>) <seconds> <message>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start {
        alarm_id: u32,
        group_id: u32,
        interval_seconds: u64,
        message: String,
    },
    Change {
        alarm_id: u32,
        group_id: u32,
        interval_seconds: u64,
        message: String,
    },
}

pub fn parse_line(line: &str) -> Result<Command> {
    let line = line.trim();
    let Some((keyword, rest)) = line.split_once('(') else {
        bail!("bad command");
    };
    let start = match keyword {
        "Start_Alarm" => true,
        "Change_Alarm" => false,
        _ => bail!("bad command"),
    };

    let Some((id_text, rest)) = rest.split_once("):") else {
        bail!("bad command");
    };
    let Ok(alarm_id) = id_text.trim().parse::<u32>() else {
        bail!("bad command");
    };

    let rest = rest.trim_start();
    let Some(rest) = rest.strip_prefix("Group(") else {
        bail!("bad command");
    };
    let Some((group_text, rest)) = rest.split_once(')') else {
        bail!("bad command");
    };
    let Ok(group_id) = group_text.trim().parse::<u32>() else {
        bail!("bad command");
    };

    let rest = rest.trim_start();
    let Some((seconds_text, message)) = rest.split_once(' ') else {
        bail!("bad command");
    };
    let Ok(interval_seconds) = seconds_text.parse::<u64>() else {
        bail!("bad command");
    };
    if interval_seconds == 0 {
        bail!("alarm seconds must be greater than zero");
    }
    if interval_seconds > INTERVAL_MAX_SECS {
        bail!("alarm seconds exceed the {INTERVAL_MAX_SECS}s limit");
    }
    let message = message.trim();
    if message.is_empty() {
        bail!("bad command");
    }

    let message = message.to_string();
    Ok(if start {
        Command::Start {
            alarm_id,
            group_id,
            interval_seconds,
            message,
        }
    } else {
        Command::Change {
            alarm_id,
            group_id,
            interval_seconds,
            message,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_start_command() {
        let command = parse_line("Start_Alarm(12): Group(3) 10 wake up now").expect("valid");
        assert_eq!(
            command,
            Command::Start {
                alarm_id: 12,
                group_id: 3,
                interval_seconds: 10,
                message: "wake up now".to_string(),
            }
        );
    }

    #[test]
    fn parses_change_command_with_punctuation_in_message() {
        let command = parse_line("Change_Alarm(1): Group(2) 5 meet (again) at 5:00").expect("valid");
        assert_eq!(
            command,
            Command::Change {
                alarm_id: 1,
                group_id: 2,
                interval_seconds: 5,
                message: "meet (again) at 5:00".to_string(),
            }
        );
    }

    #[test]
    fn rejects_unknown_keyword() {
        let err = parse_line("Stop_Alarm(1): Group(2) 5 hello").expect_err("should fail");
        assert!(err.to_string().contains("bad command"));
    }

    #[test]
    fn rejects_zero_seconds() {
        let err = parse_line("Start_Alarm(1): Group(2) 0 hello").expect_err("should fail");
        assert!(err.to_string().contains("greater than zero"));
    }

    #[test]
    fn rejects_oversized_seconds() {
        let err = parse_line("Start_Alarm(1): Group(2) 99999999999 hello").expect_err("too large");
        assert!(err.to_string().contains("limit"));
    }

    #[test]
    fn rejects_missing_message() {
        let err = parse_line("Start_Alarm(1): Group(2) 5").expect_err("should fail");
        assert!(err.to_string().contains("bad command"));
    }

    #[test]
    fn rejects_non_numeric_fields() {
        assert!(parse_line("Start_Alarm(abc): Group(2) 5 hi").is_err());
        assert!(parse_line("Start_Alarm(1): Group(x) 5 hi").is_err());
        assert!(parse_line("Start_Alarm(1): Group(2) five hi").is_err());
        assert!(parse_line("").is_err());
    }
}
