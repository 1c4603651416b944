use std::io::{self, BufRead};
use std::str::FromStr;
use std::sync::mpsc::Sender;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use log::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
    Toggle,
    Quit,
}

impl Command {
    /// Interactive key bindings.
    pub fn from_key(key: char) -> Option<Self> {
        match key.to_ascii_lowercase() {
            'r' => Some(Command::Toggle),
            's' => Some(Command::Start),
            'x' => Some(Command::Stop),
            'q' => Some(Command::Quit),
            _ => None,
        }
    }
}

impl FromStr for Command {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "start" => Ok(Command::Start),
            "stop" => Ok(Command::Stop),
            "toggle" => Ok(Command::Toggle),
            "quit" => Ok(Command::Quit),
            other => Err(anyhow!("unknown command {other:?}")),
        }
    }
}

/// Commands to issue at fixed offsets from the start of playback, written
/// as `2:start,5.5:stop,8:quit`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schedule(Vec<(Duration, Command)>);

impl Schedule {
    pub fn entries(&self) -> &[(Duration, Command)] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromStr for Schedule {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut entries = Vec::new();
        for item in s.split(',').map(str::trim).filter(|i| !i.is_empty()) {
            let (at, command) = item
                .split_once(':')
                .with_context(|| format!("schedule entry {item:?} is not <seconds>:<command>"))?;
            let secs: f64 = at
                .trim()
                .parse()
                .with_context(|| format!("invalid time {at:?} in schedule"))?;
            if !secs.is_finite() || secs < 0.0 {
                bail!("invalid time {at:?} in schedule");
            }
            entries.push((Duration::from_secs_f64(secs), command.parse()?));
        }
        entries.sort_by_key(|(at, _)| *at);
        Ok(Schedule(entries))
    }
}

/// Sends each scheduled command when its time comes.
pub fn spawn_schedule(schedule: Schedule, commands: Sender<Command>) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut elapsed = Duration::ZERO;
        for (at, command) in schedule.0 {
            thread::sleep(at.saturating_sub(elapsed));
            elapsed = at;
            debug!("scheduled {command:?} at {at:?}");
            if commands.send(command).is_err() {
                break;
            }
        }
    })
}

/// Reads key commands from stdin, one per line. End of input quits.
pub fn spawn_stdin(commands: Sender<Command>) -> thread::JoinHandle<()> {
    println!("Keys: r = toggle recording, s = start, x = stop, q = quit (then Enter)");
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else {
                break;
            };
            for key in line.chars().filter(|c| !c.is_whitespace()) {
                match Command::from_key(key) {
                    Some(command) => {
                        if commands.send(command).is_err() {
                            return;
                        }
                    }
                    None => warn!("unknown key {key:?}"),
                }
            }
        }
        let _ = commands.send(Command::Quit);
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_commands() {
        assert_eq!("start".parse::<Command>().unwrap(), Command::Start);
        assert_eq!(" STOP ".parse::<Command>().unwrap(), Command::Stop);
        assert_eq!("toggle".parse::<Command>().unwrap(), Command::Toggle);
        assert_eq!("quit".parse::<Command>().unwrap(), Command::Quit);
        assert!("record".parse::<Command>().is_err());
    }

    #[test]
    fn key_bindings() {
        assert_eq!(Command::from_key('r'), Some(Command::Toggle));
        assert_eq!(Command::from_key('S'), Some(Command::Start));
        assert_eq!(Command::from_key('x'), Some(Command::Stop));
        assert_eq!(Command::from_key('q'), Some(Command::Quit));
        assert_eq!(Command::from_key('z'), None);
    }

    #[test]
    fn parses_schedule_in_time_order() {
        let schedule: Schedule = "5:stop, 2:start,7.5:quit".parse().unwrap();
        assert_eq!(
            schedule.entries(),
            &[
                (Duration::from_secs(2), Command::Start),
                (Duration::from_secs(5), Command::Stop),
                (Duration::from_millis(7500), Command::Quit),
            ]
        );
        assert!("".parse::<Schedule>().unwrap().is_empty());
    }

    #[test]
    fn rejects_malformed_schedule() {
        assert!("2start".parse::<Schedule>().is_err());
        assert!("x:start".parse::<Schedule>().is_err());
        assert!("-1:start".parse::<Schedule>().is_err());
        assert!("2:jump".parse::<Schedule>().is_err());
    }

    #[test]
    fn schedule_thread_sends_in_order() {
        let (tx, rx) = std::sync::mpsc::channel();
        let schedule: Schedule = "0.02:stop,0.01:start".parse().unwrap();
        spawn_schedule(schedule, tx).join().unwrap();
        assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec![Command::Start, Command::Stop]);
    }
}
