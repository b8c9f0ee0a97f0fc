pub mod feedback;
pub mod notifications;
