use crossbeam::channel::{unbounded, Receiver, Sender, TryRecvError};
use tracing::{info, warn};
use uuid::Uuid;

/// Command payload. The enum is closed: unknown commands are
/// unrepresentable, so the original queue-contract violation cannot occur.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    /// Request graceful termination of the processing loop
    Quit,
}

/// A tagged message with a unique id, consumed exactly once by the loop
#[derive(Debug, Clone)]
pub struct Command {
    pub id: Uuid,
    pub kind: CommandKind,
}

impl Command {
    pub fn quit() -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: CommandKind::Quit,
        }
    }
}

/// Create a command channel pair. The queue is safe for concurrent
/// enqueue/dequeue; the loop side polls it non-blockingly once per frame
/// iteration.
pub fn command_channel() -> (CommandSender, CommandReceiver) {
    let (tx, rx) = unbounded();
    (
        CommandSender { tx },
        CommandReceiver {
            rx,
            disconnected: false,
        },
    )
}

/// Producer half, cloneable so signal handlers and interactive input can
/// each hold one.
#[derive(Clone)]
pub struct CommandSender {
    tx: Sender<Command>,
}

impl CommandSender {
    /// Enqueue a quit request; the single shutdown entry point.
    pub fn request_quit(&self) {
        let command = Command::quit();
        info!("adding quit command with uid = {}", command.id);
        if self.tx.send(command).is_err() {
            warn!("command channel is closed, quit request dropped");
        }
    }
}

/// Consumer half, owned by the processing loop.
pub struct CommandReceiver {
    rx: Receiver<Command>,
    disconnected: bool,
}

impl CommandReceiver {
    /// Non-blocking poll: `None` when the queue is empty.
    ///
    /// All senders gone is logged once and treated as a permanently empty
    /// queue; the loop keeps running, it just can no longer be commanded.
    pub fn try_next(&mut self) -> Option<Command> {
        if self.disconnected {
            return None;
        }
        match self.rx.try_recv() {
            Ok(command) => Some(command),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                warn!("all command senders dropped, loop can no longer be commanded");
                self.disconnected = true;
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commands_arrive_in_fifo_order() {
        let (sender, mut receiver) = command_channel();
        sender.request_quit();
        sender.request_quit();

        let first = receiver.try_next().expect("first command");
        let second = receiver.try_next().expect("second command");
        assert_eq!(first.kind, CommandKind::Quit);
        assert_eq!(second.kind, CommandKind::Quit);
        assert_ne!(first.id, second.id);
        assert!(receiver.try_next().is_none());
    }

    #[test]
    fn test_empty_queue_yields_none() {
        let (_sender, mut receiver) = command_channel();
        assert!(receiver.try_next().is_none());
    }

    #[test]
    fn test_cloned_senders_share_the_queue() {
        let (sender, mut receiver) = command_channel();
        let other = sender.clone();
        other.request_quit();
        assert!(receiver.try_next().is_some());
    }

    #[test]
    fn test_disconnected_channel_goes_quiet() {
        let (sender, mut receiver) = command_channel();
        drop(sender);
        assert!(receiver.try_next().is_none());
        // Subsequent polls stay quiet without re-logging
        assert!(receiver.try_next().is_none());
    }

    #[test]
    fn test_enqueue_from_another_thread() {
        let (sender, mut receiver) = command_channel();
        let handle = std::thread::spawn(move || {
            sender.request_quit();
        });
        handle.join().unwrap();
        assert!(receiver.try_next().is_some());
    }
}
