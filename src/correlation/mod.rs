//! Request correlation
//!
//! Every inbound unit of work (one API request, one sync job) carries an
//! opaque request id, and messages published while handling it are stamped
//! with that id. One request can trigger more than one outbound message (a
//! "cascade"): the primary reply carries the request id itself, the derived
//! ones carry `cascade-<request id>` so consumers can tell them apart.
//!
//! The id lives in task-local storage. Each unit of work runs inside
//! `request_scope` (or `with_request_id`), and code inside that scope, at any
//! depth, sees only its own id. Outside a scope the id reads as `"NONE"`.
//!
//! Work spawned onto other tasks does not inherit the scope; capture a
//! `RequestContext` with `current_context()` and re-enter it with
//! `RequestContext::scope` there.

use std::cell::RefCell;
use std::future::Future;

use tracing::warn;

use crate::utils::RouterError;

/// Value reported when no request id has been set.
pub const NO_REQUEST_ID: &str = "NONE";

/// Prefix that marks derived (cascaded) messages.
pub const CASCADE_PREFIX: &str = "cascade-";

tokio::task_local! {
    static CURRENT_REQUEST: RefCell<RequestContext>;
}

/// The correlation state of one unit of work.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    request_id: Option<String>,
}

impl RequestContext {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: Some(request_id.into()),
        }
    }

    pub fn request_id(&self) -> &str {
        self.request_id.as_deref().unwrap_or(NO_REQUEST_ID)
    }

    pub fn cascade_id(&self) -> String {
        format!("{CASCADE_PREFIX}{}", self.request_id())
    }

    pub fn is_set(&self) -> bool {
        self.request_id.is_some()
    }

    /// Runs `fut` as a unit of work holding this context.
    pub async fn scope<F: Future>(self, fut: F) -> F::Output {
        CURRENT_REQUEST.scope(RefCell::new(self), fut).await
    }
}

/// Runs `fut` as a new unit of work with no request id set yet.
pub async fn request_scope<F: Future>(fut: F) -> F::Output {
    RequestContext::default().scope(fut).await
}

/// Runs `fut` as a new unit of work whose request id is `request_id`.
pub async fn with_request_id<F: Future>(request_id: impl Into<String>, fut: F) -> F::Output {
    RequestContext::new(request_id).scope(fut).await
}

/// Replaces the request id of the current unit of work.
///
/// Outside a scope there is nowhere to store it and
/// `RouterError::NoRequestScope` is returned.
pub fn set_current_request_id(request_id: impl Into<String>) -> Result<(), RouterError> {
    let request_id = request_id.into();
    CURRENT_REQUEST
        .try_with(|ctx| ctx.borrow_mut().request_id = Some(request_id.clone()))
        .map_err(|_| {
            warn!(request_id = %request_id, "request id set outside a request scope");
            RouterError::NoRequestScope(request_id)
        })
}

/// The current request id, or `"NONE"`.
pub fn current_request_id() -> String {
    CURRENT_REQUEST
        .try_with(|ctx| ctx.borrow().request_id().to_string())
        .unwrap_or_else(|_| NO_REQUEST_ID.to_string())
}

/// `"cascade-"` followed by the current request id.
pub fn cascade_id() -> String {
    format!("{CASCADE_PREFIX}{}", current_request_id())
}

/// Snapshot of the current context, for handing to spawned work.
pub fn current_context() -> RequestContext {
    CURRENT_REQUEST
        .try_with(|ctx| ctx.borrow().clone())
        .unwrap_or_default()
}
