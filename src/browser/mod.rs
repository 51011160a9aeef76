//! Browser session capabilities used by the fetch workers.
//!
//! The pipeline never talks to Chrome directly. It works against two traits:
//!
//! - [`BrowserSession`]: one reusable tab that can navigate, run a script and
//!   hand back the rendered HTML
//! - [`SessionFactory`]: opens and releases sessions on an already running
//!   browser, so a batch can borrow tabs without restarting the browser
//!
//! [`chrome`] provides the production implementation on top of `chromiumoxide`.
//! Tests substitute in-memory fakes.

use std::time::Duration;
use thiserror::Error;

pub mod chrome;

/// Failures reported by a browser session or its factory.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to launch browser: {0}")]
    Launch(String),
    #[error("failed to open browser tab: {0}")]
    Open(String),
    #[error("navigation failed: {0}")]
    Navigation(String),
    #[error("navigation timed out after {0:?}")]
    Timeout(Duration),
    #[error("script evaluation failed: {0}")]
    Script(String),
    #[error("failed to read page content: {0}")]
    Content(String),
}

/// A reusable browser tab.
///
/// Sessions are reused across navigations without being reset, so callers
/// must not assume any state left behind by a previous page is clean.
pub trait BrowserSession {
    /// Navigate to `url` and wait until the page is ready, for at most `timeout`.
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<(), SessionError>;

    /// Run a script in the current page, discarding its result.
    async fn evaluate(&self, script: &str) -> Result<(), SessionError>;

    /// Serialized HTML of the page as currently rendered.
    async fn content(&self) -> Result<String, SessionError>;
}

/// Source of sessions for one batch.
pub trait SessionFactory {
    type Session: BrowserSession;

    /// Open a fresh session on the running browser.
    async fn open(&self) -> Result<Self::Session, SessionError>;

    /// Give a session back. The underlying browser keeps running.
    async fn release(&self, session: Self::Session);

    /// Tear down the underlying browser once no more batches will run.
    async fn shutdown(self)
    where
        Self: Sized,
    {
    }
}

/// A borrowed factory hands out sessions but leaves shutdown to its owner.
impl<T: SessionFactory> SessionFactory for &T {
    type Session = T::Session;

    async fn open(&self) -> Result<Self::Session, SessionError> {
        (**self).open().await
    }

    async fn release(&self, session: Self::Session) {
        (**self).release(session).await
    }
}
