//! Bounded channels between the HCI transport and the ranging task.
//!
//! The board's Bluetooth stack drains [`CommandChannel`] into the controller,
//! pushes LE Meta events into [`EventChannel`] and reports link lifecycle and
//! Ranging Service data through [`NoticeChannel`].

use cs_ranging_core::hci::{CommandPacket, CsCommand, EventPacket};
use cs_ranging_core::procedure::{CommandStatus, ConnHandle, CsCommandSink, LinkError, LinkRole};
use embassy_sync::channel::{Channel, Receiver, Sender, TrySendError};
use heapless::Vec;

#[cfg(not(target_os = "none"))]
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
#[cfg(target_os = "none")]
use embassy_sync::blocking_mutex::raw::ThreadModeRawMutex;

#[cfg(target_os = "none")]
pub(crate) type LinkMutex = ThreadModeRawMutex;
#[cfg(not(target_os = "none"))]
pub(crate) type LinkMutex = NoopRawMutex;

/// Depth of each bounded HCI channel.
pub const HCI_QUEUE_DEPTH: usize = 4;

/// Largest peer step-data payload forwarded in one notice.
pub const REMOTE_DATA_CAPACITY: usize = 256;

/// HCI "unspecified error", reported when a command cannot be encoded.
const STATUS_UNSPECIFIED: u8 = 0x1F;

/// Encoded command bound for the controller.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OutboundCommand {
    pub conn: ConnHandle,
    pub packet: CommandPacket,
}

/// Link lifecycle and out-of-band data reported by the host stack.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkNotice {
    /// The peer advertised ranging support on an established link.
    RangingSupported { conn: ConnHandle, role: LinkRole },
    Disconnected(ConnHandle),
    /// Peer step data received through the Ranging Service.
    RemoteData {
        conn: ConnHandle,
        procedure_counter: u16,
        steps: Vec<u8, REMOTE_DATA_CAPACITY>,
    },
}

pub type CommandChannel = Channel<LinkMutex, OutboundCommand, HCI_QUEUE_DEPTH>;
pub type CommandSender<'a> = Sender<'a, LinkMutex, OutboundCommand, HCI_QUEUE_DEPTH>;

pub type EventChannel = Channel<LinkMutex, EventPacket, HCI_QUEUE_DEPTH>;
pub type EventReceiver<'a> = Receiver<'a, LinkMutex, EventPacket, HCI_QUEUE_DEPTH>;

pub type NoticeChannel = Channel<LinkMutex, LinkNotice, HCI_QUEUE_DEPTH>;
pub type NoticeReceiver<'a> = Receiver<'a, LinkMutex, LinkNotice, HCI_QUEUE_DEPTH>;

/// Bundles the HCI channels so tasks can share a single instance.
pub struct HciQueues {
    pub commands: CommandChannel,
    pub events: EventChannel,
    pub notices: NoticeChannel,
}

impl HciQueues {
    pub const fn new() -> Self {
        Self {
            commands: Channel::new(),
            events: Channel::new(),
            notices: Channel::new(),
        }
    }
}

impl Default for HciQueues {
    fn default() -> Self {
        Self::new()
    }
}

/// Adapter that exposes the command channel as a [`CsCommandSink`].
pub struct ChannelCommandSink<'a> {
    sender: CommandSender<'a>,
}

impl<'a> ChannelCommandSink<'a> {
    pub fn new(sender: CommandSender<'a>) -> Self {
        Self { sender }
    }
}

impl CsCommandSink for ChannelCommandSink<'_> {
    fn send(&mut self, conn: ConnHandle, command: &CsCommand) -> Result<CommandStatus, LinkError> {
        let packet = command
            .encode(conn)
            .map_err(|_| LinkError::Rejected(STATUS_UNSPECIFIED))?;
        match self.sender.try_send(OutboundCommand { conn, packet }) {
            Ok(()) => Ok(completion_mode(command)),
            Err(TrySendError::Full(_)) => Err(LinkError::Busy),
        }
    }
}

/// Commands answered by Command Complete produce no LE Meta event.
const fn completion_mode(command: &CsCommand) -> CommandStatus {
    match command {
        CsCommand::SetDefaultSettings(_) | CsCommand::SetProcedureParams { .. } => {
            CommandStatus::Completed
        }
        _ => CommandStatus::Pending,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn(raw: u16) -> ConnHandle {
        ConnHandle::new(raw).expect("valid handle")
    }

    #[test]
    fn sink_forwards_encoded_packets() {
        let queues = HciQueues::new();
        let mut sink = ChannelCommandSink::new(queues.commands.sender());

        assert_eq!(
            sink.send(conn(7), &CsCommand::SecurityEnable),
            Ok(CommandStatus::Pending)
        );
        let outbound = queues.commands.try_receive().expect("command queued");
        assert_eq!(outbound.conn, conn(7));
        assert_eq!(
            outbound.packet.as_slice(),
            CsCommand::SecurityEnable
                .encode(conn(7))
                .expect("encodes")
                .as_slice()
        );
    }

    #[test]
    fn full_queue_reports_busy() {
        let queues = HciQueues::new();
        let mut sink = ChannelCommandSink::new(queues.commands.sender());
        for _ in 0..HCI_QUEUE_DEPTH {
            sink.send(conn(1), &CsCommand::ReadRemoteFaeTable)
                .expect("queue has room");
        }
        assert_eq!(
            sink.send(conn(1), &CsCommand::ReadRemoteFaeTable),
            Err(LinkError::Busy)
        );
    }

    #[test]
    fn parameter_commands_complete_locally() {
        let queues = HciQueues::new();
        let mut sink = ChannelCommandSink::new(queues.commands.sender());
        let settings = cs_ranging_core::config::DefaultSettings::DEFAULT;
        assert_eq!(
            sink.send(conn(2), &CsCommand::SetDefaultSettings(settings)),
            Ok(CommandStatus::Completed)
        );
    }
}
