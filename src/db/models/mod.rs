pub mod session;

pub use session::{Session, SessionKind, SessionStatus};
