mod channel;
mod connectionless;
mod endpoint;
mod error;
mod fragment;
mod handshake;
mod loopback;
mod message;
mod protocol;
mod rate_limit;
mod reliable;
mod simulator;
mod stats;
mod tracking;
mod transport;
mod usercmd;

pub use channel::{
    split_header, Channel, ChannelConfig, ChannelState, PacketFlags, FRAGMENT_HEADER_SIZE,
    PACKET_HEADER_SIZE,
};
pub use connectionless::{
    ConnectParams, ConnectionlessPacket, Dispatch, Dispatcher, DispatcherConfig,
    DuplicateConnectPolicy, PlayerStatus, ServerInfo, SessionView,
};
pub use endpoint::{QueuedUdpEndpoint, UdpEndpoint};
pub use error::NetError;
pub use fragment::{FragmentArena, FragmentBuffer, FRAGMENT_SLOTS, MAX_FRAGMENTED_SIZE};
pub use handshake::{Handshake, HandshakeOutcome, HandshakeState};
pub use loopback::{LoopbackNetwork, LoopbackTransport};
pub use message::{
    decode_client_payload, encode_client_payload, encode_server_disconnect,
    encode_server_snapshot, ClientMessage,
};
pub use protocol::{
    is_connectionless, next_sequence, sequence_greater_than, ClientOp, ServerOp,
    CONNECTIONLESS_MARKER, DEFAULT_PORT, DEFAULT_TICK_RATE, ENTITY_BITS, ENTITY_SENTINEL,
    MAX_COMMAND_LENGTH, MAX_ENTITIES, MAX_PACKET_SIZE, MAX_PACKET_USERCMDS,
    MAX_RELIABLE_COMMANDS, MAX_RELIABLE_WINDOW, PACKET_BACKUP, PROTOCOL_VERSION,
};
pub use rate_limit::{Bucket, RateLimiter};
pub use reliable::{ReliableInbox, ReliableQueue};
pub use simulator::NetworkSimulator;
pub use stats::{rand_percent, rand_u64, NetworkStats, PacketLossSimulation};
pub use tracking::RttEstimator;
pub use transport::Transport;
pub use usercmd::{
    angle_to_short, read_usercmds, short_to_angle, write_usercmds, Buttons, UserCmd,
};
