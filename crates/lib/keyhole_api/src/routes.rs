//! Route paths.

pub const GET_HEALTH: &str = "/health";
pub const POST_TOKEN: &str = "/token";
pub const POST_API_TOKEN: &str = "/api/token";
pub const POST_SESSION_VERIFY: &str = "/session/verify";
pub const POST_SESSION_LOGOUT: &str = "/session/logout";
pub const POST_SETUP_CODE: &str = "/setup-code";
pub const POST_SETUP_CODE_EXCHANGE: &str = "/setup-code/exchange";
pub const GET_ADMIN_SESSIONS: &str = "/admin/sessions";
pub const DELETE_ADMIN_SESSIONS_USER_ID: &str = "/admin/sessions/{user_id}";
pub const GET_ADMIN_AUDIT: &str = "/admin/audit";
pub const GET_ADMIN_SECURITY_BRUTE_FORCE: &str = "/admin/security/brute-force";
pub const POST_ADMIN_API_KEY_ROTATE: &str = "/admin/api-key/rotate";
