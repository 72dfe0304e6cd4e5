// Module declarations
pub(crate) mod channel;
pub(crate) mod decode;
pub(crate) mod reassembly;
pub(crate) mod registry;
pub(crate) mod stats;

pub use channel::{WatchChannel, WatchDriver, WatchHandle};
pub use decode::{decode_envelope, decode_game_server, decode_proto};
pub use reassembly::MessageBuffer;
pub use registry::{SubscriberId, WatchCallback};
pub use stats::WatchStats;
