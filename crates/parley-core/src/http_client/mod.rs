use bytes::Bytes;
use futures::Stream;
use http::StatusCode;
pub use http::{HeaderMap, HeaderValue, Method, Request, Response, Uri, request::Builder};
use std::future::Future;
use std::pin::Pin;

pub mod retry;
pub mod sse;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Http error: {0}")]
    Protocol(#[from] http::Error),
    #[error("Invalid status code: {0}")]
    InvalidStatusCode(StatusCode),
    #[error("Invalid status code {0} with message: {1}")]
    InvalidStatusCodeWithMessage(StatusCode, String),
    #[error("Stream ended")]
    StreamEnded,
    #[error("Invalid content type was returned: {0:?}")]
    InvalidContentType(HeaderValue),
    #[error("Http client error: {0}")]
    Instance(#[from] Box<dyn std::error::Error + Send + Sync + 'static>),
}

impl Error {
    /// The upstream status code, when the error was caused by a non-success response.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::InvalidStatusCode(status) | Error::InvalidStatusCodeWithMessage(status, _) => {
                Some(*status)
            }
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

pub(crate) fn instance_error<E: std::error::Error + Send + Sync + 'static>(error: E) -> Error {
    Error::Instance(error.into())
}

pub type LazyBody<T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'static>>;

pub type BoxedStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

pub type StreamingResponse<T> = Response<T>;

/// A helper trait to make generic requests (both regular and SSE) possible.
pub trait HttpClientExt: Send + Sync {
    /// Send a HTTP request, get a response back (as bytes). Non-success statuses are
    /// returned as [`Error::InvalidStatusCodeWithMessage`] carrying the response body.
    fn send<T, U>(
        &self,
        req: Request<T>,
    ) -> impl Future<Output = Result<Response<LazyBody<U>>>> + Send + 'static
    where
        T: Into<Bytes>,
        T: Send,
        U: From<Bytes>,
        U: Send + 'static;

    /// Send a HTTP request, get a streamed response back (as a stream of [`bytes::Bytes`].)
    fn send_streaming<T>(
        &self,
        req: Request<T>,
    ) -> impl Future<Output = Result<StreamingResponse<BoxedStream>>> + Send + 'static
    where
        T: Into<Bytes>;
}

impl HttpClientExt for reqwest::Client {
    fn send<T, U>(
        &self,
        req: Request<T>,
    ) -> impl Future<Output = Result<Response<LazyBody<U>>>> + Send + 'static
    where
        T: Into<Bytes>,
        U: From<Bytes> + Send + 'static,
    {
        let (parts, body) = req.into_parts();
        let req = self
            .request(parts.method, parts.uri.to_string())
            .headers(parts.headers)
            .body(body.into());

        async move {
            let response = req.send().await.map_err(instance_error)?;
            if !response.status().is_success() {
                let status = response.status();
                let message = response.text().await.map_err(instance_error)?;
                return Err(Error::InvalidStatusCodeWithMessage(status, message));
            }

            let mut res = Response::builder().status(response.status());

            if let Some(hs) = res.headers_mut() {
                *hs = response.headers().clone();
            }

            let body: LazyBody<U> = Box::pin(async {
                let bytes = response.bytes().await.map_err(instance_error)?;

                let body = U::from(bytes);
                Ok(body)
            });

            res.body(body).map_err(Error::Protocol)
        }
    }

    fn send_streaming<T>(
        &self,
        req: Request<T>,
    ) -> impl Future<Output = Result<StreamingResponse<BoxedStream>>> + Send + 'static
    where
        T: Into<Bytes>,
    {
        let (parts, body) = req.into_parts();

        let req = self
            .request(parts.method, parts.uri.to_string())
            .headers(parts.headers)
            .body(body.into())
            .build()
            .map_err(instance_error);

        let client = self.clone();

        async move {
            let response: reqwest::Response = client.execute(req?).await.map_err(instance_error)?;
            if !response.status().is_success() {
                let status = response.status();
                let message = response.text().await.map_err(instance_error)?;
                return Err(Error::InvalidStatusCodeWithMessage(status, message));
            }

            let mut res = Response::builder()
                .status(response.status())
                .version(response.version());

            if let Some(hs) = res.headers_mut() {
                *hs = response.headers().clone();
            }

            use futures::StreamExt;

            let mapped_stream: BoxedStream = Box::pin(
                response
                    .bytes_stream()
                    .map(|chunk| chunk.map_err(instance_error)),
            );

            res.body(mapped_stream).map_err(Error::Protocol)
        }
    }
}

#[cfg(feature = "reqwest-middleware")]
impl HttpClientExt for reqwest_middleware::ClientWithMiddleware {
    fn send<T, U>(
        &self,
        req: Request<T>,
    ) -> impl Future<Output = Result<Response<LazyBody<U>>>> + Send + 'static
    where
        T: Into<Bytes>,
        U: From<Bytes> + Send + 'static,
    {
        let (parts, body) = req.into_parts();
        let req = self
            .request(parts.method, parts.uri.to_string())
            .headers(parts.headers)
            .body(body.into());

        async move {
            let response = req.send().await.map_err(instance_error)?;
            if !response.status().is_success() {
                let status = response.status();
                let message = response.text().await.map_err(instance_error)?;
                return Err(Error::InvalidStatusCodeWithMessage(status, message));
            }

            let mut res = Response::builder().status(response.status());

            if let Some(hs) = res.headers_mut() {
                *hs = response.headers().clone();
            }

            let body: LazyBody<U> = Box::pin(async {
                let bytes = response.bytes().await.map_err(instance_error)?;
                Ok(U::from(bytes))
            });

            res.body(body).map_err(Error::Protocol)
        }
    }

    fn send_streaming<T>(
        &self,
        req: Request<T>,
    ) -> impl Future<Output = Result<StreamingResponse<BoxedStream>>> + Send + 'static
    where
        T: Into<Bytes>,
    {
        let (parts, body) = req.into_parts();
        let req = self
            .request(parts.method, parts.uri.to_string())
            .headers(parts.headers)
            .body(body.into());

        async move {
            let response = req.send().await.map_err(instance_error)?;
            if !response.status().is_success() {
                let status = response.status();
                let message = response.text().await.map_err(instance_error)?;
                return Err(Error::InvalidStatusCodeWithMessage(status, message));
            }

            let mut res = Response::builder()
                .status(response.status())
                .version(response.version());

            if let Some(hs) = res.headers_mut() {
                *hs = response.headers().clone();
            }

            use futures::StreamExt;

            let mapped_stream: BoxedStream = Box::pin(
                response
                    .bytes_stream()
                    .map(|chunk| chunk.map_err(instance_error)),
            );

            res.body(mapped_stream).map_err(Error::Protocol)
        }
    }
}
