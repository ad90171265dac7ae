use crate::output::ProcessStatistics;
use crate::process::Process;
use tokio::sync::mpsc;

/// Receives finished processes
pub trait CompletionNotifier: Send + Sync {
    fn process_done(&self, process: &Process, stats: &ProcessStatistics);
}

/// Logs completed processes
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl CompletionNotifier for LogNotifier {
    fn process_done(&self, process: &Process, stats: &ProcessStatistics) {
        tracing::info!(
            "Process {} done: {} active paths, {} triples used, {} triples stored",
            process.pid,
            stats.active_paths(),
            stats.process_triples,
            stats.total_triples
        );
    }
}

/// Forwards completed process ids over a channel
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    sender: mpsc::UnboundedSender<i64>,
}

impl ChannelNotifier {
    pub fn new(sender: mpsc::UnboundedSender<i64>) -> Self {
        Self { sender }
    }
}

impl CompletionNotifier for ChannelNotifier {
    fn process_done(&self, process: &Process, _stats: &ProcessStatistics) {
        let _ = self.sender.send(process.pid);
    }
}
