//! Function-based service wrapper
//!
//! This allows using plain async closures as services without writing a
//! `Service` impl.

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use std::future::Future;

use crate::coord::action::{Service, ServiceRequest};

/// Type alias for the boxed handler signature
pub type ServiceFunction =
    Box<dyn Fn(ServiceRequest) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>;

/// Wrapper for closure-based services
pub struct FnService {
    name: String,
    func: ServiceFunction,
}

impl FnService {
    pub fn new<F, Fut>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(ServiceRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        Self {
            name: name.into(),
            func: Box::new(move |request| Box::pin(func(request))),
        }
    }
}

#[async_trait]
impl Service for FnService {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, request: &ServiceRequest) -> anyhow::Result<Value> {
        (self.func)(request.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_closure_receives_request() {
        let upper = FnService::new("upper", |req: ServiceRequest| async move {
            Ok::<Value, anyhow::Error>(json!(req.input_text().to_uppercase()))
        });
        assert_eq!(upper.name(), "upper");

        let output = upper
            .invoke(&ServiceRequest::new("n", json!("quiet")))
            .await
            .unwrap();
        assert_eq!(output, json!("QUIET"));
    }
}
