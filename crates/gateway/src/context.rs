//! Per-request user context (§5, §9).
//!
//! `rmcp`'s `#[tool]` macro fixes every tool method's signature to
//! `(&self, Parameters<T>)`, so a caller-id cannot be threaded in as an
//! ordinary parameter without forking the macro. A `tokio::task_local!`
//! scoped by the auth middleware around the single request-handling task is
//! the narrowest mechanism available: it is set in exactly one place (the
//! middleware wrapping `/mcp`, i.e. the HTTP handler boundary), read in
//! exactly one place (`current_user`, from tool bodies), and is dropped by
//! `TaskLocalFuture` on every exit path of that task — including panics and
//! cancellation — without requiring any explicit teardown code. This is not
//! the kind of free-floating global the source's task-locals amounted to:
//! there is one producer and the value never outlives the request task.

use rmcp::model::ErrorData;

tokio::task_local! {
    static CURRENT_USER: String;
}

/// Run `fut` with `user_id` bound as the current request's user context.
pub async fn scope<F>(user_id: String, fut: F) -> F::Output
where
    F: std::future::Future,
{
    CURRENT_USER.scope(user_id, fut).await
}

/// The user id bound to the current task by [`scope`]. Tool bodies call this
/// first; absence means the request reached a tool handler without passing
/// through the auth middleware, which should not happen in practice.
pub fn current_user() -> Result<String, ErrorData> {
    CURRENT_USER
        .try_with(|u| u.clone())
        .map_err(|_| ErrorData::internal_error("missing authenticated user context", None))
}
