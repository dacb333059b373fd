#![doc = "Data pipeline for the leak-detection edge backend: cycle FSM, feature extraction, inference, fault reporting, health checks, and the processing loop orchestrator."]

pub mod alarm;
pub mod faults;
pub mod features;
pub mod fsm;
pub mod health;
pub mod inference;
pub mod polling;
pub mod processing_loop;
pub mod result_sender;

pub use alarm::{AlarmPusher, FailureCallback};
pub use faults::{FaultCallback, FaultCode, FaultEvent, FaultReporter, FaultSummary};
pub use features::{compute_features, features_to_vector, FeatureVector};
pub use fsm::{CabinFsm, CabinState, CycleData, FsmManager};
pub use health::{HealthChecker, HealthProbeSources, HealthReport, ProbeReport, ProbeStatus};
pub use inference::{InferenceAdapter, InferenceModel, InferenceResult, LinearModel, ModelError};
pub use polling::{PollingEngine, PollingHandle};
pub use processing_loop::{CabinDiagnostic, LoopDiagnostics, ProcessingLoop};
pub use result_sender::{PlcWriteError, ResultSender};
