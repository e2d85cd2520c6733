use super::guard::RouteClass;
use super::session::SessionClaims;

/// Per-request view handed to dashboard handlers once the guard lets a request through.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub claims: Option<SessionClaims>,
    pub request_id: String,
    pub route: RouteClass,
}

impl RequestContext {
    pub fn new(claims: Option<SessionClaims>, route: RouteClass) -> Self {
        Self { claims, request_id: uuid::Uuid::new_v4().to_string(), route }
    }
}
