pub mod event;
pub mod id;
pub mod session;
pub mod user;

pub use event::SessionEvent;
pub use id::{generate_id, SessionId, UserId};
pub use session::{PendingVote, Session, SessionState};
pub use user::{MemberRole, User, NO_ESTIMATE, UNSURE_ESTIMATE};
