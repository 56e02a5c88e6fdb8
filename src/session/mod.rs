pub mod manager;

pub use manager::{JourneyStage, Profile, QueryRecord, Session, SessionManager};
