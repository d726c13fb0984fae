use crate::events::OutputEvent;
use crate::server::error::AppError;
use crate::server::routes_api::parse_job_id;
use crate::server::AppContext;
use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
    Router,
};
use futures::stream::{Stream, StreamExt};
use std::convert::Infallible;
use std::time::Duration;

pub fn sse_routes() -> Router<AppContext> {
    Router::new().route("/jobs/:id/events", get(job_events))
}

/// Live output of one job.
///
/// Event names are `status`, `outputLine` and `carriageReturn`; the data is
/// the state name, the line text, or empty. The stream ends when the job
/// does. A finished job yields its final status and ends immediately.
pub async fn job_events(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let id = parse_job_id(&id)?;
    let subscription = ctx.engine.subscribe(id)?;
    tracing::debug!(job_id = %id, "Client subscribed to job events");

    let stream = subscription.map(|event: OutputEvent| {
        Ok(Event::default()
            .event(event.event_name())
            .data(event.data()))
    });

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keepAlive"),
    ))
}
