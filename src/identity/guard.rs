//! Route access guard for the dashboard tree.
//!
//! Every request under `/dashboard` is classified and then checked against the
//! session claims. The rules run in a fixed order and the first match wins;
//! coordinators skip all location scoping.

use super::principal::Location;
use super::session::SessionClaims;

pub const LOGIN_PATH: &str = "/login";
pub const DASHBOARD_ROOT: &str = "/dashboard";
pub const HOSPITAL_HOME: &str = "/dashboard/hospital";
pub const SELECT_LOCATION: &str = "/dashboard/select-location";

const HOSPITAL_SECTION: &str = "hospital";
const SELECT_LOCATION_SECTION: &str = "select-location";
/// Sections any authenticated principal may open, whatever its location.
const SHARED_SECTIONS: &[&str] = &["inventory", "settings", "about"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteClass {
    /// Outside the protected tree.
    Public,
    HospitalScoped,
    CafScoped,
    CoordinatorOnly,
    /// Open to every authenticated principal.
    Shared,
}

impl RouteClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteClass::Public => "public",
            RouteClass::HospitalScoped => "hospital",
            RouteClass::CafScoped => "caf",
            RouteClass::CoordinatorOnly => "coordinator",
            RouteClass::Shared => "shared",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardDecision {
    Allow,
    Redirect(&'static str),
}

/// Strip a trailing slash (except for "/") and any query string.
fn normalize(path: &str) -> &str {
    let path = path.split(['?', '#']).next().unwrap_or(path);
    if path.len() > 1 { path.trim_end_matches('/') } else { path }
}

/// First path segment below `/dashboard`, `Some("")` for the root itself, `None` outside the tree.
fn dashboard_section(path: &str) -> Option<&str> {
    let rest = normalize(path).strip_prefix(DASHBOARD_ROOT)?;
    if rest.is_empty() {
        return Some("");
    }
    let rest = rest.strip_prefix('/')?;
    Some(rest.split('/').next().unwrap_or(""))
}

pub fn is_dashboard_root(path: &str) -> bool { dashboard_section(path) == Some("") }

pub fn classify(path: &str) -> RouteClass {
    match dashboard_section(path) {
        None => RouteClass::Public,
        Some(HOSPITAL_SECTION) => RouteClass::HospitalScoped,
        Some(SELECT_LOCATION_SECTION) => RouteClass::CoordinatorOnly,
        Some(s) if SHARED_SECTIONS.contains(&s) => RouteClass::Shared,
        Some(_) => RouteClass::CafScoped,
    }
}

/// Decide what happens to a request for `path`. `claims` is `None` when the token is
/// missing, malformed or expired; all three are handled the same way.
pub fn evaluate(claims: Option<&SessionClaims>, path: &str) -> GuardDecision {
    let class = classify(path);
    if class == RouteClass::Public {
        return GuardDecision::Allow;
    }
    let Some(claims) = claims else { return GuardDecision::Redirect(LOGIN_PATH); };

    if claims.is_coordinator() {
        // Coordinators pick a working context before landing anywhere
        if is_dashboard_root(path) {
            return GuardDecision::Redirect(SELECT_LOCATION);
        }
        return GuardDecision::Allow;
    }

    let at_hospital = claims.location == Location::Hospital;
    if at_hospital && class != RouteClass::HospitalScoped && class != RouteClass::Shared {
        return GuardDecision::Redirect(HOSPITAL_HOME);
    }
    if !at_hospital && class == RouteClass::HospitalScoped {
        return GuardDecision::Redirect(DASHBOARD_ROOT);
    }
    if class == RouteClass::CoordinatorOnly {
        return GuardDecision::Redirect(DASHBOARD_ROOT);
    }
    GuardDecision::Allow
}

/// Landing page for a location, used after a coordinator picks a working context.
pub fn home_for(location: Location) -> &'static str {
    match location {
        Location::Caf => DASHBOARD_ROOT,
        Location::Hospital => HOSPITAL_HOME,
    }
}
