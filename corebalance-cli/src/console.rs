// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Line-oriented command console for `corebal run`.

use std::str::FromStr;

use thiserror::Error;

use corebalance_core::ProcessId;

pub const HELP: &str = "\
Commands:
  start              start monitoring
  stop               stop monitoring
  auto on|off        toggle automatic balancing
  high <percent>     set the high threshold
  low <percent>      set the low threshold
  force              balance now, ignoring thresholds
  balance <pid>      pin one process to the least-loaded core
  status             show loop state and configuration
  help               show this help
  quit               stop the balancer and exit";

/// One console command.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Start,
    Stop,
    AutoBalance(bool),
    HighThreshold(f64),
    LowThreshold(f64),
    Force,
    Balance(ProcessId),
    Status,
    Help,
    Quit,
}

#[derive(Debug, Error, PartialEq)]
pub enum ConsoleError {
    #[error("Unknown command '{0}' (type 'help')")]
    Unknown(String),

    #[error("'{command}' expects {expected}")]
    BadArgument {
        command: &'static str,
        expected: &'static str,
    },
}

impl FromStr for ConsoleCommand {
    type Err = ConsoleError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let verb = words.next().unwrap_or_default().to_lowercase();
        let arg = words.next();

        match verb.as_str() {
            "start" => Ok(Self::Start),
            "stop" => Ok(Self::Stop),
            "auto" => match arg.map(str::to_lowercase).as_deref() {
                Some("on") => Ok(Self::AutoBalance(true)),
                Some("off") => Ok(Self::AutoBalance(false)),
                _ => Err(ConsoleError::BadArgument {
                    command: "auto",
                    expected: "'on' or 'off'",
                }),
            },
            "high" => parse_percent(arg, "high").map(Self::HighThreshold),
            "low" => parse_percent(arg, "low").map(Self::LowThreshold),
            "force" => Ok(Self::Force),
            "balance" => arg
                .and_then(|a| a.parse::<u32>().ok())
                .map(|pid| Self::Balance(ProcessId::new(pid)))
                .ok_or(ConsoleError::BadArgument {
                    command: "balance",
                    expected: "a process ID",
                }),
            "status" => Ok(Self::Status),
            "help" | "?" => Ok(Self::Help),
            "quit" | "exit" => Ok(Self::Quit),
            other => Err(ConsoleError::Unknown(other.to_string())),
        }
    }
}

fn parse_percent(arg: Option<&str>, command: &'static str) -> Result<f64, ConsoleError> {
    arg.map(|a| a.trim_end_matches('%'))
        .and_then(|a| a.parse::<f64>().ok())
        .ok_or(ConsoleError::BadArgument {
            command,
            expected: "a percentage",
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!("start".parse(), Ok(ConsoleCommand::Start));
        assert_eq!("  STOP ".parse(), Ok(ConsoleCommand::Stop));
        assert_eq!("auto off".parse(), Ok(ConsoleCommand::AutoBalance(false)));
        assert_eq!("high 85".parse(), Ok(ConsoleCommand::HighThreshold(85.0)));
        assert_eq!("low 25%".parse(), Ok(ConsoleCommand::LowThreshold(25.0)));
        assert_eq!(
            "balance 4242".parse(),
            Ok(ConsoleCommand::Balance(ProcessId::new(4242)))
        );
        assert_eq!("exit".parse(), Ok(ConsoleCommand::Quit));
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            "balance".parse::<ConsoleCommand>(),
            Err(ConsoleError::BadArgument { .. })
        ));
        assert!(matches!(
            "auto maybe".parse::<ConsoleCommand>(),
            Err(ConsoleError::BadArgument { .. })
        ));
        assert!(matches!(
            "reboot".parse::<ConsoleCommand>(),
            Err(ConsoleError::Unknown(_))
        ));
    }
}
