//! Domain models shared by the store, the gateway and the HTTP layer.

pub mod audit;
pub mod auth;
pub mod session;

pub use audit::{
    AuditAction, AuditDetails, AuditFilter, AuditLogEntry, AuditMetadata, AuditStatus,
    NewAuditEntry,
};
pub use auth::{
    AuthorizationCode, ClientInfo, NewAuthorizationCode, PkceChallenge, Project,
    ProjectMembership, SetupCode, User,
};
pub use session::{ProjectSession, RateLimitEntry};
