pub mod observation;
pub mod liveness;
pub mod geofence;
pub mod decision;
pub mod engine;
pub mod access_gate;
pub mod security_event;
pub mod retry;

pub use observation::{Coordinate, FrameObservation, Subject, SubjectId};

pub use liveness::{LivenessConfig, LivenessStatus, LivenessTracker};

pub use geofence::{
    haversine_m, Boundary, BoundaryRegistry, ConfigError, GeofenceStatus, EARTH_RADIUS_M,
};

pub use decision::{AttendanceDecision, Outcome, ReasonCode};

pub use engine::{AttendanceEngine, EngineConfig};

pub use access_gate::{hash_password, AccessGate, AuthError, GateConfig, Session};

pub use security_event::{
    SecurityEvent,          // One append-only log entry
    SecurityEventType,      // Event taxonomy
    SecurityLog,            // Bounded in-memory tail plus optional sink
};

pub use retry::RetryPolicy;
