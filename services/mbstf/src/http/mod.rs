pub mod dist_sessions;
pub mod response;
