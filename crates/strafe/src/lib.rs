pub mod bitstream;
pub mod client;
pub mod net;
pub mod server;
pub mod snapshot;

pub use bitstream::{BitReader, BitWriter, CodecError, FieldDescriptor, FieldKind, NetState};
pub use client::{ClientConfig, ClientEvent, ClientHost, ClientState};
pub use net::{
    Channel, ChannelConfig, ChannelState, ConnectionlessPacket, Dispatcher, DispatcherConfig,
    LoopbackNetwork, NetError, NetworkSimulator, NetworkStats, PacketLossSimulation,
    QueuedUdpEndpoint, Transport, UdpEndpoint, UserCmd, DEFAULT_PORT, DEFAULT_TICK_RATE,
    MAX_PACKET_SIZE, PROTOCOL_VERSION,
};
pub use server::{DisconnectReason, ServerConfig, ServerEvent, ServerHost};
pub use snapshot::{
    ConnectionState, EntityFlags, EntityState, EntityType, EntityWorld, PlayerState, Snapshot,
    SnapshotBuilder, SnapshotConfig, SnapshotDiff, SnapshotError, SnapshotReconstructor,
    WorldSource,
};
