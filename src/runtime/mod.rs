//! Runtime support: packets, the packet bus and the session event loop

pub mod bus;
pub mod channel;
pub mod errors;
pub mod packet;
pub mod sample;
pub mod session;

pub use bus::{FeedState, PacketBus, PacketSink, PublishReport};
pub use channel::{ChannelSink, PacketReceiver};
pub use errors::{DeliveryError, SinkResult};
pub use packet::{
    AnalogPayload, FEED_VERSION, Header, LogicPayload, Packet, PacketKind, ProtocolId,
};
pub use sample::{AnalogValue, SampleBuffer, SampleWidth, read_sample};
pub use session::{Readiness, Session, SessionHandle, SourceCallback, SourceControl, SourceId};
