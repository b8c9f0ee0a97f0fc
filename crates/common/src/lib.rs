// civica-common: shared types and the wire protocol for the Civica workspace

pub mod protocol;
pub mod types;
