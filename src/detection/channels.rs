// Progress channel for detection runs
use super::types::{PipelineStage, ProgressEvent};
use tokio::sync::mpsc;

/// Helper function to create a bounded progress channel
pub fn create_progress_channel(
    capacity: usize,
) -> (mpsc::Sender<ProgressEvent>, mpsc::Receiver<ProgressEvent>) {
    mpsc::channel(capacity.max(1))
}

/// Send a progress event from synchronous pipeline code.
///
/// Outside a tokio runtime the send waits while the channel is full. Inside
/// one it never blocks and drops the event instead. A dropped receiver is
/// ignored.
pub(crate) fn report(
    progress: Option<&mpsc::Sender<ProgressEvent>>,
    percent: u8,
    stage: PipelineStage,
    message: impl Into<String>,
) {
    let Some(tx) = progress else {
        return;
    };
    let event = ProgressEvent {
        percent: percent.min(100),
        stage,
        message: message.into(),
    };
    log::debug!("⏳ {}% {}: {}", event.percent, stage.label(), event.message);
    if tokio::runtime::Handle::try_current().is_ok() {
        if let Err(mpsc::error::TrySendError::Full(event)) = tx.try_send(event) {
            log::debug!("⚠️ Progress channel full, dropped {}% event", event.percent);
        }
    } else {
        let _ = tx.blocking_send(event);
    }
}
