// kiln_host: the kiln controller proper. The sensor sampler, safety
// supervisor and firing engine are synchronous cores driven by periodic
// tokio tasks, so the same code runs against real hardware, the
// simulator, and deterministic tests.

pub mod clock;
pub mod engine;
pub mod events;
pub mod kiln_os;
pub mod safety;
pub mod sensor;
pub mod storage;

pub use engine::{CommandError, FiringEngine};
pub use events::EventBus;
pub use kiln_os::{KilnHandle, KilnHardware, KilnOs};
pub use safety::SafetySupervisor;
pub use sensor::{decode_frame, ReadingCell, SensorSampler};
