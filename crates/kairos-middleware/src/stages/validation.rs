//! Required-header validation.
//!
//! Registered only when `HEADER_VALIDATION_ENABLED` is set. Requests to
//! reserved runtime paths are exempt.

use http::HeaderName;
use kairos_core::{response, BoxFuture, ErrorCategory, Request, RequestContext, Response};

use crate::middleware::{Middleware, Next};
use crate::stages::is_reserved_path;

/// Rejects requests that lack any of the required headers with 400.
#[derive(Debug, Clone)]
pub struct HeaderValidationMiddleware {
    required: Vec<HeaderName>,
}

impl HeaderValidationMiddleware {
    /// Requires every header in `required`.
    #[must_use]
    pub const fn new(required: Vec<HeaderName>) -> Self {
        Self { required }
    }

    /// Headers every request must carry.
    #[must_use]
    pub fn required(&self) -> &[HeaderName] {
        &self.required
    }
}

impl Middleware for HeaderValidationMiddleware {
    fn name(&self) -> &'static str {
        "header_validation"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        if !is_reserved_path(request.uri().path()) {
            let missing = self
                .required
                .iter()
                .find(|name| !request.headers().contains_key(*name));
            if let Some(name) = missing {
                tracing::debug!(parent: ctx.span(), header = %name, "required header missing");
                let response = response::category_error(
                    ErrorCategory::Validation,
                    &format!("missing required header: {name}"),
                );
                return Box::pin(async move { response });
            }
        }
        next.run(ctx, request)
    }
}
