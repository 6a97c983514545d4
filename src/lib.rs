#![allow(non_snake_case)]

// Хранилище
pub mod engine; // src/engine/{mod,mvcc,batch_log,store}.rs
pub mod lock;

// Протокол и серверная часть
pub mod error;
pub mod protocol; // src/protocol/{mod,envelope,frame,messages,method}.rs
pub mod session; // src/session/{mod,handles,snapshots,batches,iterators,lookup}.rs
pub mod server; // src/server/{mod,pool,connection,http}.rs
pub mod client;

// Общее
pub mod cli;
pub mod config;
pub mod consts;
pub mod metrics;
pub mod util;

// Удобные реэкспорты
pub use client::{error_kind, Client, ClientTransport, PendingReply};
pub use config::ServerConfig;
pub use engine::{Engine, KeyRange, Seq, Store, StoreStats, WriteOp};
pub use error::{ErrorKind, ProtoError, ProtoResult};
pub use protocol::{Method, ParamBag, Request, Response};
pub use server::Server;
pub use session::{Session, SessionLimits, SessionStats};
