//! Identity, session and access control for NexusFarma.
//! Keep the public surface thin and split implementation across sub-modules.

mod principal;
mod session;
mod provider;
mod directory;
mod authenticator;
mod request_context;
pub mod guard;

pub use principal::{AccessLevel, Location, NewUser, Principal, ProfilePatch, Role, SubRole};
pub use session::{ephemeral_secret, SessionClaims, SessionIssuer, TokenError, WeakSecret, MIN_SECRET_LEN};
pub use provider::{IdentityProvider, IdentityRecord, LocalIdentityProvider, LogMailer, ResetMailer};
pub use directory::UserDirectory;
pub use authenticator::{CredentialAuthenticator, LoginRequest, MissingPrincipalPolicy};
pub use request_context::RequestContext;
pub use guard::{classify, evaluate, GuardDecision, RouteClass};
