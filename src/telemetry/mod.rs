//! Telemetry relay.
//!
//! Devices publish positions on a pub/sub topic. The relay decodes them,
//! records liveness, pushes `location_update` events to observers and, when
//! enabled, links each sample to the ongoing reservation of its vehicle.
//! A separate sweep raises `car_inactive` alerts for devices gone quiet.

mod decode;
mod liveness;
mod relay;
mod transport;

pub use decode::{decode, DecodeError};
pub use liveness::{AlertPolicy, LivenessTracker, SilentDevice};
pub use relay::{Relay, RelayConfig};
pub use transport::{LocalBroker, PubSub, Subscription, TransportError};
