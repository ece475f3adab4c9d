pub mod connection;
pub mod data_channel;
pub mod ice;
pub mod state;
pub mod transport;
pub mod types;

pub use connection::{RtcTransport, RtcTransportFactory};
pub use state::{PeerSession, Role, SessionSnapshot, SessionState};
pub use transport::{
    MediaTransport, ToneSender, TransportEvent, TransportEventKind, TransportFactory,
    TransportNotifier,
};
pub use types::{Connectivity, IceCandidate, PeerId, SdpKind, ServerConfig, SessionDescription};
