//! The outbound fetch loop.
//!
//! [`Client::fetch`] dispatches a [`Request`] through the host and follows
//! redirects according to the request's (or the client's)
//! [`RedirectPolicy`]. Each dispatch is a single host call; host failures end
//! the loop and are never retried.
//!
//! ```rust
//! use isolate_fetch::host::{BoundaryError, LocalHost, ResponseDescriptor};
//! use isolate_fetch::{fetch, Envelope, Request};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> isolate_fetch::Result<()> {
//! let host = LocalHost::new().with_handler(|host, request| async move {
//!     let body = host.stream_from_bytes(format!("you asked for {}", request.url))?;
//!     Ok::<_, BoundaryError>(ResponseDescriptor {
//!         header_pairs: vec![("content-type".into(), "text/plain".into())],
//!         status: 200,
//!         body_stream_id: Some(body),
//!         url: None,
//!     })
//! });
//!
//! let text = host
//!     .run(async {
//!         let mut response = fetch(Request::get("https://example.com/")?).await?;
//!         Ok::<_, isolate_fetch::Error>(response.text().await?)
//!     })
//!     .await?;
//! assert_eq!(text.as_str(), "you asked for https://example.com/");
//! # Ok(())
//! # }
//! ```
use tracing::debug;

use crate::abort::Aborted;
use crate::error::Result;
use crate::host::{self, AnyHost};
use crate::redirect::{self, RedirectError, RedirectPolicy};
use crate::{Request, Response};

/// Default number of redirects followed before giving up.
pub const DEFAULT_MAX_REDIRECTS: u32 = 20;

/// Fetch configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Client {
    max_redirects: u32,
    redirect: RedirectPolicy,
}

impl Default for Client {
    fn default() -> Self {
        Self {
            max_redirects: DEFAULT_MAX_REDIRECTS,
            redirect: RedirectPolicy::Follow,
        }
    }
}

impl Client {
    /// A client following up to 20 redirects.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets how many redirects are followed.
    pub fn max_redirects(mut self, max: u32) -> Self {
        self.max_redirects = max;
        self
    }

    /// Sets the policy for requests that do not set their own.
    pub fn redirect(mut self, policy: RedirectPolicy) -> Self {
        self.redirect = policy;
        self
    }

    /// Fetches through the current host.
    pub async fn fetch(&self, request: Request) -> Result<Response> {
        let host = host::current()?;
        self.fetch_with(&host, request).await
    }

    /// Fetches through `host`.
    ///
    /// # Errors
    ///
    /// - [`Aborted`] when the request's signal fired before a dispatch.
    /// - [`BodyError`](crate::BodyError) when the request body failed while
    ///   the host was reading it.
    /// - [`RedirectError`] when a redirect cannot or may not be followed.
    /// - A [`BoundaryError`](crate::host::BoundaryError) from the host.
    pub async fn fetch_with(&self, host: &AnyHost, mut request: Request) -> Result<Response> {
        let policy = request.redirect_policy().unwrap_or(self.redirect);
        let mut hops: u32 = 0;

        loop {
            if request.abort_signal().is_some_and(|signal| signal.aborted()) {
                return Err(Aborted::new().into());
            }

            let (descriptor, body_pump) = request.to_descriptor(host)?;
            debug!(method = %request.method(), url = %request.url(), hops, "dispatching");
            let reply = host.dispatch(descriptor).await;
            if let Some(err) = body_pump.as_ref().and_then(|pump| pump.take_error()) {
                return Err(err.into());
            }
            let reply = reply?;
            let mut response = Response::from_descriptor(host, reply, request.url())?;

            let status = response.status();
            if !redirect::is_redirect(status) {
                response.set_redirected(hops > 0);
                return Ok(response);
            }

            match policy {
                RedirectPolicy::Error => {
                    return Err(RedirectError::RedirectAttempted { status }.into())
                }
                RedirectPolicy::Manual => {
                    response.set_redirected(hops > 0);
                    return Ok(response);
                }
                RedirectPolicy::Follow => {}
            }

            let Some(next) = redirect::location(response.headers(), request.url())? else {
                response.set_redirected(hops > 0);
                return Ok(response);
            };

            if hops >= self.max_redirects {
                return Err(RedirectError::TooManyRedirects {
                    limit: self.max_redirects,
                }
                .into());
            }
            hops += 1;

            if status != 303 && request.body().stream_was_sent() {
                return Err(RedirectError::StreamBodyAlreadyConsumed.into());
            }

            debug!(status, from = %request.url(), to = %next, hops, "following redirect");
            redirect::rewrite(&mut request, status, response.headers(), next);
        }
    }
}

/// Fetches `request` through the current host with a default [`Client`].
pub async fn fetch(request: Request) -> Result<Response> {
    Client::new().fetch(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{BoundaryError, LocalHost, ResponseDescriptor};
    use crate::ErrorKind;

    fn redirecting_host(status: u16, location: &'static str) -> LocalHost {
        LocalHost::new().with_handler(move |_, _| async move {
            Ok::<_, BoundaryError>(ResponseDescriptor {
                header_pairs: vec![("location".to_owned(), location.to_owned())],
                status,
                body_stream_id: None,
                url: None,
            })
        })
    }

    #[tokio::test]
    async fn without_host_fails_at_the_boundary() {
        let err = fetch(Request::get("https://example.com/").unwrap())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Boundary);
    }

    #[tokio::test]
    async fn zero_limit_rejects_first_redirect() {
        let local = redirecting_host(302, "/next");
        let err = Client::new()
            .max_redirects(0)
            .fetch_with(&local.to_any(), Request::get("https://example.com/").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RedirectError>(),
            Some(RedirectError::TooManyRedirects { limit: 0 })
        ));
    }

    #[tokio::test]
    async fn request_policy_overrides_client() {
        let local = redirecting_host(301, "/next");
        let response = Client::new()
            .redirect(RedirectPolicy::Error)
            .fetch_with(
                &local.to_any(),
                Request::get("https://example.com/")
                    .unwrap()
                    .redirect(RedirectPolicy::Manual),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), 301);
        assert!(!response.redirected());
    }

    #[tokio::test]
    async fn failing_request_body_fails_the_fetch() {
        let local = LocalHost::new().with_handler(|host, request| async move {
            if let Some(id) = request.body_stream_id {
                host.read_stream(id).await?;
            }
            Ok::<_, BoundaryError>(ResponseDescriptor {
                header_pairs: vec![],
                status: 200,
                body_stream_id: None,
                url: None,
            })
        });
        let short = crate::Blob::from_stream(crate::ByteStream::from_bytes("abc"), 5, "");
        let request = Request::post("https://example.com/upload")
            .unwrap()
            .with_body(short)
            .unwrap();

        let err = local
            .run(Client::new().fetch_with(&local.to_any(), request))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Decode);
        assert!(matches!(
            err.downcast_ref::<crate::BodyError>(),
            Some(crate::BodyError::Truncated { expected: 5, received: 3 })
        ));
    }

    #[tokio::test]
    async fn bad_location_is_a_redirect_error() {
        let local = redirecting_host(302, "mailto:someone@example.com");
        let err = Client::new()
            .fetch_with(&local.to_any(), Request::get("https://example.com/").unwrap())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Redirect);
    }
}
