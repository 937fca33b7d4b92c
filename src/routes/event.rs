use crate::{app::AppState, domain::fields::UserApp};
use async_stream::stream as event_stream;
use axum::{
    extract::State,
    response::{
        sse::{Event, KeepAlive},
        Sse,
    },
    Extension,
};
use futures::Stream;
use std::{convert::Infallible, sync::Arc};
use tokio::sync::broadcast::error::RecvError;

/// Server-sent lifecycle events for referrals owned by the acting user.
pub async fn stream(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<UserApp>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    tracing::info!(user_id = %user.id, "new connection to sse stream >>>");

    let mut rx = state.get_sender().subscribe();

    Sse::new(event_stream! {
        loop {
            match rx.recv().await {
                Ok(event) if event.concerns(user.id) => {
                    match serde_json::to_string(&event) {
                        Ok(data) => yield Ok(Event::default().data(data)),
                        Err(e) => tracing::error!(error = ?e, "failed to serialize event"),
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "sse subscriber lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
    .keep_alive(KeepAlive::default())
}
