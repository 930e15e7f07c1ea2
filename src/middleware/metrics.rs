use crate::state::AppState;
use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    web, Error,
};
use futures_util::future::LocalBoxFuture;
use std::{
    future::{ready, Ready},
    time::Instant,
};

/// Records request counts, error counts and durations in `AppState`.
///
/// Endpoints are keyed by method and route pattern, so unmatched paths all
/// land under `"<METHOD> unmatched"` instead of growing the map per URL.
pub struct MetricsMiddleware;

impl<S, B> Transform<S, ServiceRequest> for MetricsMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = MetricsMiddlewareService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(MetricsMiddlewareService { service }))
    }
}

pub struct MetricsMiddlewareService<S> {
    service: S,
}

impl<S, B> Service<ServiceRequest> for MetricsMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let start_time = Instant::now();
        let method = req.method().to_string();
        let app_state = req.app_data::<web::Data<AppState>>().cloned();

        if let Some(app_state) = &app_state {
            app_state.increment_request_count();
        }

        let fut = self.service.call(req);

        Box::pin(async move {
            let result = fut.await;
            let duration_ms = start_time.elapsed().as_millis() as u64;

            let Some(app_state) = app_state else {
                return result;
            };

            let (route, is_error) = match &result {
                Ok(response) => {
                    let status = response.status();
                    (
                        response.request().match_pattern(),
                        status.is_client_error() || status.is_server_error(),
                    )
                }
                Err(_) => (None, true),
            };
            let endpoint = format!(
                "{} {}",
                method,
                route.as_deref().unwrap_or("unmatched")
            );

            app_state.record_endpoint_request(&endpoint, duration_ms, is_error);
            if is_error {
                app_state.increment_error_count();
            }

            result
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::transcription::testing::ScriptedModel;
    use actix_web::{test, App, HttpResponse};
    use std::sync::Arc;

    #[actix_web::test]
    async fn test_counts_requests_and_errors_per_route() {
        let state = AppState::new(AppConfig::default(), Arc::new(ScriptedModel::new(4000)));
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .wrap(MetricsMiddleware)
                .route("/ok", web::get().to(|| async { HttpResponse::Ok().finish() }))
                .route("/bad", web::get().to(|| async { HttpResponse::BadRequest().finish() })),
        )
        .await;

        test::call_service(&app, test::TestRequest::get().uri("/ok").to_request()).await;
        test::call_service(&app, test::TestRequest::get().uri("/bad").to_request()).await;
        test::call_service(&app, test::TestRequest::get().uri("/nowhere").to_request()).await;

        let metrics = state.get_metrics_snapshot();
        assert_eq!(metrics.request_count, 3);
        assert_eq!(metrics.error_count, 2);
        assert_eq!(metrics.endpoint_metrics["GET /ok"].error_count, 0);
        assert_eq!(metrics.endpoint_metrics["GET /bad"].error_count, 1);
        assert_eq!(metrics.endpoint_metrics["GET unmatched"].request_count, 1);
    }
}
