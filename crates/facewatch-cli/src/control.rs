//! Start/stop/quit commands and the channel that carries them to the loop.

use std::io::BufRead;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    Start,
    Stop,
    Quit,
}

impl ControlCommand {
    /// `s` starts, `p` stops, `q` quits. Case-insensitive.
    pub fn from_key(key: char) -> Option<Self> {
        match key.to_ascii_lowercase() {
            's' => Some(Self::Start),
            'p' => Some(Self::Stop),
            'q' => Some(Self::Quit),
            _ => None,
        }
    }

    /// A headless stdin line: the first non-blank character is the key.
    pub fn from_line(line: &str) -> Option<Self> {
        line.trim().chars().next().and_then(Self::from_key)
    }
}

/// Receiving end of the command channel. Producers (window keys, stdin pump,
/// Ctrl-C handler) hold clones of [`Controls::sender`].
pub struct Controls {
    tx: Sender<ControlCommand>,
    rx: Receiver<ControlCommand>,
}

impl Controls {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        Self { tx, rx }
    }

    pub fn sender(&self) -> Sender<ControlCommand> {
        self.tx.clone()
    }

    /// Take at most one pending command without blocking.
    pub fn poll(&self) -> Option<ControlCommand> {
        match self.rx.try_recv() {
            Ok(cmd) => Some(cmd),
            Err(TryRecvError::Empty) => None,
            // Unreachable while `self.tx` is alive.
            Err(TryRecvError::Disconnected) => Some(ControlCommand::Quit),
        }
    }

    /// Route Ctrl-C to a quit command.
    pub fn install_ctrlc(&self) -> Result<(), ctrlc::Error> {
        let tx = self.sender();
        ctrlc::set_handler(move || {
            tracing::info!("interrupt received");
            let _ = tx.send(ControlCommand::Quit);
        })
    }

    /// Read commands from stdin lines on a helper thread. End of input means quit.
    pub fn spawn_stdin_pump(&self) -> std::io::Result<()> {
        let tx = self.sender();
        std::thread::Builder::new()
            .name("facewatch-stdin".into())
            .spawn(move || pump_lines(std::io::stdin().lock(), &tx))?;
        Ok(())
    }
}

impl Default for Controls {
    fn default() -> Self {
        Self::new()
    }
}

fn pump_lines<R: BufRead>(reader: R, tx: &Sender<ControlCommand>) {
    for line in reader.lines() {
        let Ok(line) = line else { break };
        match ControlCommand::from_line(&line) {
            Some(cmd) => {
                if tx.send(cmd).is_err() {
                    return;
                }
            }
            None if !line.trim().is_empty() => {
                tracing::info!(input = %line.trim(), "unknown command; use s (start), p (stop) or q (quit)");
            }
            None => {}
        }
    }
    let _ = tx.send(ControlCommand::Quit);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_mapping() {
        assert_eq!(ControlCommand::from_key('s'), Some(ControlCommand::Start));
        assert_eq!(ControlCommand::from_key('P'), Some(ControlCommand::Stop));
        assert_eq!(ControlCommand::from_key('q'), Some(ControlCommand::Quit));
        assert_eq!(ControlCommand::from_key('x'), None);
    }

    #[test]
    fn test_line_mapping() {
        assert_eq!(ControlCommand::from_line("  start\n"), Some(ControlCommand::Start));
        assert_eq!(ControlCommand::from_line(""), None);
    }

    #[test]
    fn test_poll_is_fifo_and_nonblocking() {
        let controls = Controls::new();
        assert_eq!(controls.poll(), None);
        let tx = controls.sender();
        tx.send(ControlCommand::Start).unwrap();
        tx.send(ControlCommand::Stop).unwrap();
        assert_eq!(controls.poll(), Some(ControlCommand::Start));
        assert_eq!(controls.poll(), Some(ControlCommand::Stop));
        assert_eq!(controls.poll(), None);
    }

    #[test]
    fn test_pump_lines_ends_with_quit() {
        let controls = Controls::new();
        let input = std::io::Cursor::new("s\nhello\n\np\n");
        pump_lines(input, &controls.sender());

        let got: Vec<_> = std::iter::from_fn(|| controls.poll()).collect();
        assert_eq!(got, vec![ControlCommand::Start, ControlCommand::Stop, ControlCommand::Quit]);
    }
}
