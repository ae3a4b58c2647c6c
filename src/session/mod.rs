//! Persistence sessions
//!
//! ```text
//! ConnectionResolver ──► SessionFactory ──create()──► PersistenceSession
//!                          │   │                        │ records::<T>()
//!      DatabaseProvider ───┘   │                        │ commit()
//!                              ├── AuditInterceptor ────┤ stamp before flush
//!                              └── CommitObserver ──────┘ once after commit
//! ```

pub mod factory;
pub mod interceptor;
pub mod observer;
pub mod resolver;
mod tracking;
pub mod unit_of_work;

pub use factory::{SessionFactory, SessionFactoryBuilder};
pub use interceptor::{AuditInterceptor, Clock, SystemClock};
pub use observer::{CommitObserver, NoopObserver};
pub use resolver::{
    ConfigConnectionResolver, ConnectionResolver, EnvConnectionResolver,
    StaticConnectionResolver,
};
pub use tracking::ChangeState;
pub use unit_of_work::{CommitSummary, PersistenceSession, RecordSet, SessionState};
