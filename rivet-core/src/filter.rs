// Request and response filters

use crate::{Dto, RequestContext, Response, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// Runs before the service. A filter stops the pipeline by closing the
/// response (`ctx.response().close()` or `end_with`); returning `Err`
/// turns the request into a fault.
#[async_trait]
pub trait RequestFilter: Send + Sync {
    async fn filter(&self, ctx: &Arc<RequestContext>, request: &dyn Dto) -> Result<()>;

    /// Lower runs first.
    fn priority(&self) -> i32 {
        0
    }
}

/// Runs after the service with its response, fault or not.
#[async_trait]
pub trait ResponseFilter: Send + Sync {
    async fn filter(&self, ctx: &Arc<RequestContext>, response: &Response) -> Result<()>;

    fn priority(&self) -> i32 {
        0
    }
}

/// Closure-backed request filter
pub struct FnRequestFilter<F>
where
    F: Fn(&Arc<RequestContext>, &dyn Dto) -> Result<()> + Send + Sync,
{
    filter: F,
    priority: i32,
}

impl<F> FnRequestFilter<F>
where
    F: Fn(&Arc<RequestContext>, &dyn Dto) -> Result<()> + Send + Sync,
{
    pub fn new(filter: F) -> Self {
        Self {
            filter,
            priority: 0,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

#[async_trait]
impl<F> RequestFilter for FnRequestFilter<F>
where
    F: Fn(&Arc<RequestContext>, &dyn Dto) -> Result<()> + Send + Sync,
{
    async fn filter(&self, ctx: &Arc<RequestContext>, request: &dyn Dto) -> Result<()> {
        (self.filter)(ctx, request)
    }

    fn priority(&self) -> i32 {
        self.priority
    }
}

/// Closure-backed response filter
pub struct FnResponseFilter<F>
where
    F: Fn(&Arc<RequestContext>, &Response) -> Result<()> + Send + Sync,
{
    filter: F,
    priority: i32,
}

impl<F> FnResponseFilter<F>
where
    F: Fn(&Arc<RequestContext>, &Response) -> Result<()> + Send + Sync,
{
    pub fn new(filter: F) -> Self {
        Self {
            filter,
            priority: 0,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

#[async_trait]
impl<F> ResponseFilter for FnResponseFilter<F>
where
    F: Fn(&Arc<RequestContext>, &Response) -> Result<()> + Send + Sync,
{
    async fn filter(&self, ctx: &Arc<RequestContext>, response: &Response) -> Result<()> {
        (self.filter)(ctx, response)
    }

    fn priority(&self) -> i32 {
        self.priority
    }
}

/// An ordered set of filters for one pipeline stage.
pub struct FilterChain<T: ?Sized> {
    filters: Vec<Arc<T>>,
}

impl<T: ?Sized> Default for FilterChain<T> {
    fn default() -> Self {
        Self {
            filters: Vec::new(),
        }
    }
}

impl<T: ?Sized> Clone for FilterChain<T> {
    fn clone(&self) -> Self {
        Self {
            filters: self.filters.clone(),
        }
    }
}

impl<T: ?Sized> FilterChain<T> {
    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<T>> {
        self.filters.iter()
    }
}

macro_rules! impl_filter_chain {
    ($filter:ident) => {
        impl FilterChain<dyn $filter> {
            /// Append, keeping ascending priority with ties in insertion order.
            pub fn push(&mut self, filter: Arc<dyn $filter>) {
                let at = self
                    .filters
                    .partition_point(|f| f.priority() <= filter.priority());
                self.filters.insert(at, filter);
            }

            /// Per-operation filters around the global ones: negative
            /// priorities before, the rest after.
            pub fn merged(global: &Self, operation: &Self) -> Self {
                let (before, after): (Vec<_>, Vec<_>) = operation
                    .filters
                    .iter()
                    .cloned()
                    .partition(|f| f.priority() < 0);
                let mut filters = before;
                filters.extend(global.filters.iter().cloned());
                filters.extend(after);
                Self { filters }
            }
        }
    };
}

impl_filter_chain!(RequestFilter);
impl_filter_chain!(ResponseFilter);

impl FilterChain<dyn RequestFilter> {
    /// Run in order; stops once a filter closes the response.
    pub async fn apply(&self, ctx: &Arc<RequestContext>, request: &dyn Dto) -> Result<bool> {
        for filter in &self.filters {
            filter.filter(ctx, request).await?;
            if ctx.response().is_closed() {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

impl FilterChain<dyn ResponseFilter> {
    pub async fn apply(&self, ctx: &Arc<RequestContext>, response: &Response) -> Result<bool> {
        for filter in &self.filters {
            filter.filter(ctx, response).await?;
            if ctx.response().is_closed() {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use parking_lot::Mutex;

    fn recording(log: &Arc<Mutex<Vec<i32>>>, priority: i32) -> Arc<dyn RequestFilter> {
        let log = Arc::clone(log);
        Arc::new(
            FnRequestFilter::new(move |_, _| {
                log.lock().push(priority);
                Ok(())
            })
            .with_priority(priority),
        )
    }

    #[tokio::test]
    async fn test_priority_order_with_stable_ties() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut chain = FilterChain::<dyn RequestFilter>::default();
        chain.push(recording(&log, 5));
        chain.push(recording(&log, -1));
        chain.push(recording(&log, 5));
        chain.push(recording(&log, 0));

        let ctx = Arc::new(RequestContext::basic());
        let closed = chain.apply(&ctx, &"req".to_string()).await.unwrap();
        assert!(!closed);
        assert_eq!(*log.lock(), vec![-1, 0, 5, 5]);
    }

    #[tokio::test]
    async fn test_merge_places_negative_operation_filters_first() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut global = FilterChain::<dyn RequestFilter>::default();
        global.push(recording(&log, -10));
        global.push(recording(&log, 100));
        let mut operation = FilterChain::<dyn RequestFilter>::default();
        operation.push(recording(&log, -1));
        operation.push(recording(&log, 1));

        let merged = FilterChain::<dyn RequestFilter>::merged(&global, &operation);
        let ctx = Arc::new(RequestContext::basic());
        merged.apply(&ctx, &"req".to_string()).await.unwrap();
        assert_eq!(*log.lock(), vec![-1, -10, 100, 1]);
    }

    #[tokio::test]
    async fn test_close_short_circuits() {
        let calls = Arc::new(Mutex::new(0));
        let mut chain = FilterChain::<dyn RequestFilter>::default();
        chain.push(Arc::new(FnRequestFilter::new(|ctx, _| {
            ctx.response().close();
            Ok(())
        })));
        let counter = Arc::clone(&calls);
        chain.push(Arc::new(
            FnRequestFilter::new(move |_, _| {
                *counter.lock() += 1;
                Ok(())
            })
            .with_priority(1),
        ));

        let ctx = Arc::new(RequestContext::basic());
        assert!(chain.apply(&ctx, &"req".to_string()).await.unwrap());
        assert_eq!(*calls.lock(), 0);
    }

    #[tokio::test]
    async fn test_error_propagates() {
        let mut chain = FilterChain::<dyn ResponseFilter>::default();
        chain.push(Arc::new(FnResponseFilter::new(|_, _| {
            Err(Error::Forbidden("blocked".into()))
        })));
        let ctx = Arc::new(RequestContext::basic());
        let result = chain.apply(&ctx, &Response::Empty).await;
        assert!(matches!(result, Err(Error::Forbidden(_))));
    }
}
