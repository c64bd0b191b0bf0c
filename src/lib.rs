pub mod bluetooth;
pub mod error;
pub mod feeder;
pub mod firmware;
pub mod motors;
pub mod protocol;
pub mod queue;
pub mod registry;
pub mod sensor;
pub mod transport;

pub mod prelude {
    pub use crate::error::{FeederError, PayloadSizeError, TransportFailure};
    pub use crate::feeder::{DataListener, SlidingWindowFeeder, SubscriptionParams};
    pub use crate::motors::{ActuatorSession, ActuatorSnapshot, ActuatorState};
    pub use crate::protocol::Sample;
    pub use crate::queue::OperationQueue;
    pub use crate::registry::{MemoryPreferences, PreferenceStore, SensorId, SensorRegistry};
    pub use crate::sensor::{
        ConnectionState, DeviceSession, Sensor, SessionConfig, VibrationLength,
    };
    pub use crate::transport::{LinkEvent, PendingOperation, TransportLink};
    pub use crate::{
        bluetooth, error, feeder, firmware, motors, protocol, queue, registry, sensor, transport,
    };

    #[derive(Clone, Copy)]
    pub struct App {
        pub verbose: u8,
        pub scantime: f32,
    }
}
