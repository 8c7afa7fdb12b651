//! Thread-per-node scheduler for streaming graphs
//!
//! Spawns a dedicated thread for each node and manages their lifecycle.
//!
//! Two threading models are supported:
//!
//! 1. **Regular nodes**: the scheduler calls `work()` repeatedly in a loop;
//!    the node processes one batch per call.
//! 2. **Self-threading nodes**: the node manages its own worker threads.
//!    The scheduler calls `work()` once to start it, then waits on
//!    `should_stop()`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver as StdReceiver, Sender as StdSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info};

use super::errors::WorkError;
use super::node::ProcessNode;
use super::ports::{InputPort, OutputPort};

/// Runtime scheduler that executes a streaming graph
pub struct Scheduler {
    threads: Vec<(String, JoinHandle<()>)>,
    stop_signal: Arc<AtomicBool>,
    completion_tx: StdSender<String>,
    completion_rx: Option<StdReceiver<String>>,
}

impl Scheduler {
    /// Create a new scheduler
    pub fn new() -> Self {
        let (completion_tx, completion_rx) = channel();
        Self {
            threads: Vec::new(),
            stop_signal: Arc::new(AtomicBool::new(false)),
            completion_tx,
            completion_rx: Some(completion_rx),
        }
    }

    /// Start a process node in its own thread
    pub fn start_process(
        &mut self,
        mut node: Box<dyn ProcessNode>,
        inputs: Vec<InputPort>,
        outputs: Vec<OutputPort>,
    ) {
        let stop_signal = Arc::clone(&self.stop_signal);
        let completion_tx = self.completion_tx.clone();
        let name = node.name().to_string();
        let thread_name = name.clone();

        debug!("Starting process node: {}", name);

        let handle = thread::spawn(move || {
            if node.is_self_threading() {
                if let Err(e) = node.work(&inputs, &outputs) {
                    error!("[{}] Failed to start self-threading node: {}", thread_name, e);
                } else {
                    loop {
                        if stop_signal.load(Ordering::Relaxed) {
                            info!("[{}] Stop signal received", thread_name);
                            break;
                        }
                        if node.should_stop() {
                            info!("[{}] Self-threading node completed", thread_name);
                            break;
                        }
                        thread::sleep(std::time::Duration::from_millis(100));
                    }
                }
            } else {
                let mut items_produced = 0usize;

                loop {
                    if stop_signal.load(Ordering::Relaxed) || node.should_stop() {
                        break;
                    }

                    match node.work(&inputs, &outputs) {
                        Ok(n) => items_produced += n,
                        Err(WorkError::Shutdown) => {
                            debug!("[{}] End of stream", thread_name);
                            break;
                        }
                        Err(e) => {
                            error!("[{}] Work error: {}", thread_name, e);
                            break;
                        }
                    }
                }

                info!("[{}] Shutdown. Produced {} items.", thread_name, items_produced);
            }

            // Dropping the ports closes the channels so downstream nodes see
            // end of stream.
            drop(outputs);
            drop(inputs);
            drop(node);

            let _ = completion_tx.send(thread_name);
        });

        self.threads.push((name, handle));
    }

    /// Signal all nodes to stop
    pub fn stop(&self) {
        self.stop_signal.store(true, Ordering::Relaxed);
    }

    /// Wait for all node threads to complete, joining them as they finish
    pub fn wait(mut self) {
        let completion_rx = self
            .completion_rx
            .take()
            .expect("completion_rx already taken");

        // Drop the main completion sender so the channel closes when all
        // threads complete.
        drop(self.completion_tx);

        let total_threads = self.threads.len();
        let mut completed = 0;

        info!("Waiting for {} threads to complete...", total_threads);

        let mut threads_by_name: HashMap<String, JoinHandle<()>> =
            self.threads.into_iter().collect();

        while completed < total_threads {
            match completion_rx.recv() {
                Ok(thread_name) => {
                    completed += 1;
                    if let Some(handle) = threads_by_name.remove(&thread_name) {
                        match handle.join() {
                            Ok(_) => debug!(
                                "[{}] Thread completed ({}/{})",
                                thread_name, completed, total_threads
                            ),
                            Err(e) => error!(
                                "[{}] Thread panicked ({}/{}): {:?}",
                                thread_name, completed, total_threads, e
                            ),
                        }
                    }
                }
                Err(_) => break,
            }
        }

        info!("All {} threads completed", total_threads);
    }

    /// Get the number of running threads
    pub fn num_threads(&self) -> usize {
        self.threads.len()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::errors::{WorkError, WorkResult};
    use crate::runtime::sender::{ChannelMessage, Sender};
    use crossbeam_channel::bounded;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct TestSource {
        count: u32,
        max: u32,
    }

    impl ProcessNode for TestSource {
        fn name(&self) -> &str {
            "test_source"
        }
        fn num_inputs(&self) -> usize {
            0
        }
        fn num_outputs(&self) -> usize {
            1
        }
        fn work(&mut self, _inputs: &[InputPort], outputs: &[OutputPort]) -> WorkResult<usize> {
            let output = outputs[0]
                .get::<u32>()
                .ok_or_else(|| WorkError::Node("Missing output channel".to_string()))?;

            if self.count < self.max {
                output.send(self.count)?;
                self.count += 1;
                Ok(1)
            } else {
                output.close();
                Err(WorkError::Shutdown)
            }
        }
    }

    struct TestSink {
        received: Arc<Mutex<Vec<u32>>>,
    }

    impl ProcessNode for TestSink {
        fn name(&self) -> &str {
            "test_sink"
        }
        fn num_inputs(&self) -> usize {
            1
        }
        fn num_outputs(&self) -> usize {
            0
        }
        fn work(&mut self, inputs: &[InputPort], _outputs: &[OutputPort]) -> WorkResult<usize> {
            let mut buffer = VecDeque::new();
            let mut input = inputs[0]
                .get::<u32>(&mut buffer)
                .ok_or_else(|| WorkError::Node("Missing input channel".to_string()))?;

            let value = input.recv()?;
            self.received.lock().unwrap().push(value);
            Ok(1)
        }
    }

    #[test]
    fn source_to_sink_runs_to_completion() {
        let mut scheduler = Scheduler::new();

        let (tx, rx) = bounded::<ChannelMessage<u32>>(10);

        let source = TestSource { count: 0, max: 5 };
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = TestSink {
            received: Arc::clone(&received),
        };

        scheduler.start_process(
            Box::new(source),
            vec![],
            vec![OutputPort::from_sender(Sender::new(vec![tx]))],
        );
        scheduler.start_process(Box::new(sink), vec![InputPort::from_receiver(rx)], vec![]);

        scheduler.wait();

        assert_eq!(*received.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }
}
