// Bearer token lifecycle: issuance, revocation, rotation on expiry

pub mod rotation;
pub mod store;
