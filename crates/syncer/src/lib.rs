//! vsync syncer: keeps selected kinds consistent between a virtual store and a host store.
//!
//! Per kind, a [`Syncer`] supplies a [`Translator`] and the create/update logic;
//! the engine runs the forward, backward, import or fake state machines on top,
//! fed by store watches and a periodic garbage-collection pass.

#![forbid(unsafe_code)]

pub mod config;
pub mod context;
pub mod controller;
pub mod error;
pub mod gc;
pub mod generic;
pub mod reconciler;
pub mod register;
pub mod syncer;
pub mod translator;

pub use config::EngineConfig;
pub use context::SyncContext;
pub use controller::Controller;
pub use error::{SyncError, SyncResult};
pub use generic::{GenericSyncer, ImportSyncer};
pub use register::{register_fake, register_import, register_syncer, Direction, Registration};
pub use syncer::{
    Action, BackwardCreator, BackwardDeleter, BackwardLifecycle, BackwardSyncer, FakeSyncer, ForwardSyncer, Starter,
    Syncer, SyncerOptions,
};
pub use translator::Translator;

pub mod prelude {
    pub use super::{
        register_fake, register_import, register_syncer, Action, EngineConfig, FakeSyncer, ForwardSyncer, SyncContext,
        SyncError, SyncResult, Syncer, SyncerOptions, Translator,
    };
}
