use std::convert::Infallible;

use axum::extract::State;
use axum::response::sse::{Event, Sse};
use futures::stream::{Stream, StreamExt};

use crate::http::{AppError, StreamUser};
use crate::realtime::StreamFrame;
use crate::AppState;

/// `GET /notifications/stream`: live notifications as server-sent events.
pub async fn notification_stream(
    user: StreamUser,
    State(state): State<AppState>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let stream = state.gateway.open(user.user_id).await.map_err(|err| {
        tracing::error!(error = ?err, user_id = %user.user_id, "failed to open notification stream");
        AppError::internal("failed to open notification stream")
    })?;

    Ok(Sse::new(stream.map(|frame| Ok(sse_event(frame)))))
}

fn sse_event(frame: StreamFrame) -> Event {
    match frame {
        StreamFrame::Event { event, data } => Event::default().event(event).data(data),
        StreamFrame::KeepAlive => Event::default().comment("ping"),
    }
}
