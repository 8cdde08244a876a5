use tokio::sync::mpsc;

/// Receives progress notifications from a running cycle.
///
/// Calls are fire-and-forget: implementations must return promptly and never
/// block the pipeline waiting on a consumer.
pub trait ProgressObserver: Send + Sync {
    fn update(&self, label: &str, value: usize, max: usize);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProgress;

impl ProgressObserver for NoopProgress {
    fn update(&self, _label: &str, _value: usize, _max: usize) {}
}

/// Reports progress through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgress;

impl ProgressObserver for LogProgress {
    fn update(&self, label: &str, value: usize, max: usize) {
        tracing::info!(value, max, "{}", label);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub label: String,
    pub value: usize,
    pub max: usize,
}

/// Forwards updates to a bounded channel, dropping them when it is full.
#[derive(Debug, Clone)]
pub struct ChannelProgress {
    tx: mpsc::Sender<ProgressUpdate>,
}

impl ChannelProgress {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<ProgressUpdate>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

impl ProgressObserver for ChannelProgress {
    fn update(&self, label: &str, value: usize, max: usize) {
        let update = ProgressUpdate {
            label: label.to_string(),
            value,
            max,
        };
        if let Err(e) = self.tx.try_send(update) {
            tracing::trace!("dropped progress update: {}", e);
        }
    }
}
