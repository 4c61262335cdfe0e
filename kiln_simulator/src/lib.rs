// kiln_simulator: deterministic kiln plant and simulated hardware used by
// the host's sim driver and by integration tests.

pub mod clock;
pub mod plant;
pub mod probe;

pub use clock::SimClock;
pub use plant::FirstOrderPlant;
pub use probe::{encode_frame, SharedPlant, SimProbe, SimSwitch};
