pub mod gateway_identity;

pub use gateway_identity::{GatewayIdentityMiddleware, ViewerId, VIEWER_ID_HEADER};
