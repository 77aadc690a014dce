pub mod kind;
pub mod state;
pub mod supervisor;
pub mod health;

pub use kind::{
    DriverConfig, DriverKind, PolledConfig, ServiceConfig, ServiceName, SimulatedConfig, StreamingConfig,
};
pub use state::{ConnectionState, StartOutcome, StatusRecord, StopOutcome};
pub use supervisor::ServiceSupervisor;
pub use health::HealthMonitor;
