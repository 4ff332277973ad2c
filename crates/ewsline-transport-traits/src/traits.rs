//! Core transport trait.

use std::future::Future;
use std::pin::Pin;

use crate::error::TransportResult;
use crate::message::{TransportRequest, TransportResponse};
use crate::metrics::TransportMetrics;

/// The boundary between the protocol engine and the network.
///
/// A transport performs exactly one HTTP round trip per [`send`](Self::send):
/// it posts the envelope and returns as soon as the status line and headers
/// are available. Status interpretation (success, SOAP fault, anything else)
/// is left to the caller, and the body is handed back unread so that a
/// hanging request can be consumed incrementally.
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Posts one serialized envelope and returns the unread response.
    fn send(
        &self,
        request: TransportRequest,
    ) -> Pin<Box<dyn Future<Output = TransportResult<TransportResponse>> + Send + '_>>;

    /// Returns a snapshot of the transport's counters.
    fn metrics(&self) -> TransportMetrics {
        TransportMetrics::default()
    }

    /// Returns the endpoint address or identifier for this transport, if applicable.
    fn endpoint(&self) -> Option<String> {
        None
    }
}

impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    fn send(
        &self,
        request: TransportRequest,
    ) -> Pin<Box<dyn Future<Output = TransportResult<TransportResponse>> + Send + '_>> {
        (**self).send(request)
    }

    fn metrics(&self) -> TransportMetrics {
        (**self).metrics()
    }

    fn endpoint(&self) -> Option<String> {
        (**self).endpoint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Test that the trait can be used as a trait object
    fn _test_transport_object(_t: &dyn Transport) {}
}
