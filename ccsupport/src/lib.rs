//! ccsupport - chaincode runtime orchestration and invocation broker
//!
//! Launches chaincode containers on demand, deduplicates concurrent launches
//! of the same chaincode, and multiplexes INIT / TRANSACTION requests over one
//! stream per chaincode with timeout and cleanup semantics.
//!
//! The entry point is [`ChaincodeSupport`]. It is built from a [`Runtime`]
//! (how containers are started), a [`Lifecycle`] (how definitions are
//! resolved) and a [`PackageProvider`] (where code packages come from).

pub mod acceptor;
pub mod config;
pub mod container;
pub mod handler;
pub mod launcher;
pub mod lifecycle;
pub mod logging;
pub mod metrics;
pub mod package;
pub mod registry;
pub mod shim;
pub mod support;
pub mod transport;
pub mod types;

pub use acceptor::ConnectionAcceptor;
pub use config::{InitPolicy, LoggingConfig, SupportConfig};
pub use container::{InProcRuntime, ProcessRuntime, Runtime};
pub use handler::{Handler, HandlerOptions, HandlerState};
pub use launcher::{Launcher, RuntimeLauncher};
pub use lifecycle::{LedgerLifecycle, Lifecycle, StaticLifecycle};
pub use logging::init_logging;
pub use metrics::{HandlerMetrics, LaunchMetrics};
pub use package::{FsPackageProvider, PackageProvider};
pub use registry::{HandlerRegistry, LaunchState, WorkerStatus};
pub use shim::{Chaincode, ChaincodeStub};
pub use support::{ChaincodeSupport, process_chaincode_execution_result};
pub use transport::{ChaincodeStream, ChannelStream, FramedStream};
pub use types::{
    ChaincodeContext, ChaincodeDefinition, ContainerInfo, ContainerType, ExecutionResult,
    QueryExecutor, TransactionParams,
};

pub use ccsupport_shared::{
    ChaincodeError, ChaincodeEvent, ChaincodeInput, ChaincodeKey, ChaincodeMessage, ChaincodeResult,
    MessageKind, Response,
};
