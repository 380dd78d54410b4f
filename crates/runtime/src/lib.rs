//! Conflux Runtime: per-execution state and connection lifecycle for federated plans.
//!
//! This crate sits between a compiled execution plan and the backing stores it touches.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐      copy()       ┌──────────────────┐
//! │ ExecutionContext │ ────────────────▶ │ ExecutionContext │
//! └────────┬─────────┘                   └────────┬─────────┘
//!          │ RelationalStoreState                 │
//!          ▼                                      ▼
//!   ┌─────────────────────────┐  aliases  ┌─────────────────────────┐
//!   │ BlockConnectionContext  │ ◀───────▶ │ BlockConnectionContext  │
//!   └────────────┬────────────┘           └─────────────────────────┘
//!                │ provision (credential resolution, pool-state registration)
//!                ▼
//!         ConnectionProvisioner
//! ```
//!
//! Process-wide services ([`ConnectionPoolStateCache`], the credential registry, worker pools)
//! are wired by [`RuntimeServices`].

pub mod block_connection;
pub mod bootstrap;
pub mod codegen;
pub mod connection;
pub mod context;
pub mod error;
pub mod pool_state;
pub mod store;

pub use block_connection::{
    BlockConnection, BlockConnectionContext, BlockConnectionLease, BlockConnectionState,
};
pub use bootstrap::RuntimeServices;
pub use codegen::{compile_with_fallback, CompiledPlan, ExecutableUnit, NodeCodeProvider};
pub use connection::{
    ConnectionKey, ConnectionProvisioner, ConnectionRequest, RawConnection, Statement,
    TargetDescriptor,
};
pub use context::{ExecutionContext, ExecutionResult, WorkerPool};
pub use error::RuntimeError;
pub use pool_state::{ConnectionPoolStateCache, PoolLookup, PoolStateHousekeeper};
pub use store::{AcquiredConnection, RelationalStoreState, StoreExecutionState, StoreKind};
