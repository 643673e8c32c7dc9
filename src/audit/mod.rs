// Audit logging: sensitive-field masking and the sink that records it

pub mod logger;
pub mod masker;
