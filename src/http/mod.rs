//! HTTP execution of [`UrlDescriptor`](crate::config_parser::UrlDescriptor)s.
//!
//! A single descriptor is sent with [`HttpExecutor::http_request`]. Lists of
//! descriptors go through [`HttpExecutor::multiple_http_requests`], which honours
//! `repeat`, `delayBeforeExecution` and `delay(<ms>)` pause steps under the
//! executor's [`ExecutionStrategy`].

mod executor;
mod request;

pub use executor::{ExecutionStrategy, HttpExecutor, RequestOutcome};
pub use request::{HttpResponse, Replacement, is_http_success_code};
