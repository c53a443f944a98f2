//! Core reconciliation logic
//!
//! Everything that talks to the outside world does so through a trait
//! defined here (`PortProbe`, `ProtocolClient`, `ServiceController`) or in
//! `config`/`backup`, so the controller can be driven by test doubles.

pub mod diagnostic;
pub mod probe;
pub mod protocol;
pub mod remediation;
pub mod service;

// Test doubles for the controller's collaborators (tests only)
#[cfg(test)]
pub mod mock_session;

pub use diagnostic::{
    DiagnosticController, DiagnosticOptions, DiagnosticOutcome, Inventory, OutcomeStatus, Step,
    StepRecord, StepStatus,
};
pub use probe::{ListenTableProbe, PortProbe, ProbeMethod, TcpProbeResult};
pub use protocol::{classify_response, AmiClient, ProtocolClient, ProtocolOutcome, ProtocolResult};
pub use remediation::{apply_known_good, choose_secret, generate_secret, AclPolicy, SecretSource};
pub use service::{ServiceController, SystemdService};
